//! Prompt assembly: template rendering with context and history injection.
//!
//! Answer templates receive four variables:
//! - `question`: the user's question
//! - `role`: the caller's role
//! - `context`: numbered source blocks, empty when nothing was retrieved
//! - `admin_roles`: the configured admin roles joined with ", "
//!
//! Rendering is strict: a template referencing any other variable fails with
//! a prompt (configuration) error instead of rendering an empty string.

use crate::types::RouterPrompts;
use handlebars::Handlebars;
use hrdesk_core::{AppError, AppResult};
use std::collections::HashMap;

/// Header placed above the conversation history.
pub const HISTORY_HEADER: &str = "Conversation so far:";

/// A ranked passage as it appears in the context block.
#[derive(Debug, Clone, Copy)]
pub struct SourcePassage<'a> {
    pub text: &'a str,
    pub path: &'a str,
    pub page: Option<u32>,
}

/// Inputs of an answer prompt.
#[derive(Debug, Clone, Copy)]
pub struct AnswerPromptInput<'a> {
    pub question: &'a str,
    pub role: &'a str,
    /// Passages in reranker order
    pub passages: &'a [SourcePassage<'a>],
    pub admin_roles: &'a [String],
    /// Rendered history lines, oldest first
    pub history: &'a [String],
}

/// Build the final answer prompt from a route template.
///
/// The result is the history block (if any history exists) followed by the
/// rendered template.
///
/// # Example
/// ```
/// use hrdesk_prompt::{build_answer_prompt, AnswerPromptInput};
///
/// let prompt = build_answer_prompt(
///     "Q: {{question}}",
///     &AnswerPromptInput {
///         question: "How many vacation days?",
///         role: "employee",
///         passages: &[],
///         admin_roles: &[],
///         history: &[],
///     },
/// )
/// .unwrap();
/// assert_eq!(prompt, "Q: How many vacation days?");
/// ```
pub fn build_answer_prompt(template: &str, input: &AnswerPromptInput<'_>) -> AppResult<String> {
    let mut variables = HashMap::new();
    variables.insert("question".to_string(), input.question.to_string());
    variables.insert("role".to_string(), input.role.to_string());
    variables.insert("context".to_string(), format_context(input.passages));
    variables.insert("admin_roles".to_string(), input.admin_roles.join(", "));

    let rendered = render_template(template, &variables)?;

    tracing::debug!(
        passages = input.passages.len(),
        history_lines = input.history.len(),
        "Assembled answer prompt"
    );

    Ok(format!("{}{}", render_history_block(input.history), rendered))
}

/// Render the router system and user prompts.
pub fn render_router(
    prompts: &RouterPrompts,
    question: &str,
    role: &str,
    routes: &[String],
) -> AppResult<(String, String)> {
    let mut variables = HashMap::new();
    variables.insert("question".to_string(), question.to_string());
    variables.insert("role".to_string(), role.to_string());
    variables.insert("routes".to_string(), routes.join(", "));

    Ok((
        render_template(&prompts.system, &variables)?,
        render_template(&prompts.user, &variables)?,
    ))
}

/// Format passages as numbered source blocks joined by blank lines.
pub fn format_context(passages: &[SourcePassage<'_>]) -> String {
    passages
        .iter()
        .enumerate()
        .map(|(i, passage)| {
            let page = passage
                .page
                .map(|p| p.to_string())
                .unwrap_or_else(|| "N/A".to_string());
            format!(
                "Source [{}] (Page: {}, File: {})\n{}",
                i + 1,
                page,
                passage.path,
                passage.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Render the history block, or an empty string when there is no history.
pub fn render_history_block(lines: &[String]) -> String {
    if lines.is_empty() {
        return String::new();
    }
    format!("{}\n{}\n\n", HISTORY_HEADER, lines.join("\n"))
}

/// Check that a template parses.
pub fn check_template(name: &str, template: &str) -> AppResult<()> {
    Handlebars::new()
        .register_template_string(name, template)
        .map_err(|e| AppError::Prompt(format!("Invalid template '{}': {}", name, e)))
}

/// Render a Handlebars template with variables in strict mode.
pub fn render_template(template: &str, variables: &HashMap<String, String>) -> AppResult<String> {
    let mut handlebars = Handlebars::new();

    // Disable HTML escaping for plain text
    handlebars.register_escape_fn(handlebars::no_escape);
    handlebars.set_strict_mode(true);

    handlebars
        .register_template_string("prompt", template)
        .map_err(|e| AppError::Prompt(format!("Failed to register template: {}", e)))?;

    handlebars
        .render("prompt", variables)
        .map_err(|e| AppError::Prompt(format!("Failed to render template: {}", e)))
}
