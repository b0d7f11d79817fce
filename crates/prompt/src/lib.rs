//! Prompt system for hrdesk.
//!
//! This crate provides:
//! - YAML-based prompt set loading (router prompts and per-route templates)
//! - Strict Handlebars template rendering
//! - Context block and conversation history injection

pub mod builder;
pub mod loader;
pub mod types;

// Re-export main types
pub use builder::{
    build_answer_prompt, format_context, render_history_block, render_router, AnswerPromptInput,
    SourcePassage, HISTORY_HEADER,
};
pub use loader::{ensure_route_templates, load_prompts};
pub use types::{PromptSet, RouterPrompts};
