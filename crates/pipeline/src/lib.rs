//! Question-answering pipeline for hrdesk.
//!
//! Ties the other crates together per question:
//! - Routing (keyword rules, then a structured model fallback)
//! - Retrieval and reranking
//! - Per-user session memory
//! - Prompt assembly and generation, in one call or as an event stream
//!
//! # Example
//! ```no_run
//! use hrdesk_core::AppConfig;
//! use hrdesk_pipeline::{build_pipeline, ChatRequest};
//! use hrdesk_prompt::PromptSet;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::load()?;
//! let pipeline = build_pipeline(&config, &PromptSet::default()).await?;
//! let result = pipeline
//!     .answer_once(&ChatRequest::new("How many vacation days do I get?").with_user("u1"))
//!     .await?;
//! println!("[{}] {}", result.route, result.answer);
//! # Ok(())
//! # }
//! ```

pub mod events;
pub mod factory;
pub mod memory;
pub mod orchestrator;
pub mod route;

pub use events::{ChatEvent, ChatRequest, ChatResult, ChatStream, ANONYMOUS_USER};
pub use factory::build_pipeline;
pub use memory::{ConversationTurn, Session, SessionHandle, SessionStore, TurnRole};
pub use orchestrator::{Pipeline, PipelineSettings, PipelineStage};
pub use route::{Route, RouteDecision, RouteMethod, RouteSet, Router};
