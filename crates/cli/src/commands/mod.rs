//! Command handlers for the hrdesk CLI.
//!
//! This module organizes all CLI commands into separate submodules.

pub mod ask;
pub mod retrieve;
pub mod route;
pub mod serve;

// Re-export command types for convenience
pub use ask::AskCommand;
pub use retrieve::RetrieveCommand;
pub use route::RouteCommand;
pub use serve::ServeCommand;

use hrdesk_core::{config::AppConfig, AppError, AppResult};
use hrdesk_pipeline::{build_pipeline, Pipeline};
use hrdesk_prompt::load_prompts;

/// Load the workspace prompt set and build the configured pipeline.
pub async fn load_pipeline(config: &AppConfig) -> AppResult<Pipeline> {
    let prompts = load_prompts(&config.prompts_path())?;
    build_pipeline(config, &prompts).await
}

/// Print a value as pretty JSON on stdout.
pub fn print_json<T: serde::Serialize>(value: &T) -> AppResult<()> {
    let json =
        serde_json::to_string_pretty(value).map_err(|e| AppError::Serialization(e.to_string()))?;
    println!("{}", json);
    Ok(())
}
