//! Ask command handler.
//!
//! Sends one question through the full pipeline, streaming the answer to
//! stdout by default.

use super::{load_pipeline, print_json};
use clap::Args;
use futures::StreamExt;
use hrdesk_core::{config::AppConfig, AppError, AppResult};
use hrdesk_pipeline::{ChatEvent, ChatRequest, ChatResult, Pipeline};
use std::io::Write;

/// Ask a question
#[derive(Args, Debug)]
pub struct AskCommand {
    /// The question to ask
    pub question: String,

    /// Role of the person asking (default: roles.defaultRole)
    #[arg(long, default_value = "")]
    pub role: String,

    /// User id whose conversation memory is used
    #[arg(long, default_value = "cli")]
    pub user: String,

    /// Wait for the full answer instead of streaming it
    #[arg(long)]
    pub no_stream: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl AskCommand {
    /// Execute the ask command.
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing ask command");
        tracing::debug!("Ask command options: {:?}", self);

        let pipeline = load_pipeline(config).await?;
        let request = ChatRequest::new(self.question.clone())
            .with_role(self.role.clone())
            .with_user(self.user.clone());

        if self.no_stream {
            self.handle_non_streaming(&pipeline, &request).await
        } else {
            self.handle_streaming(&pipeline, request).await
        }
    }

    async fn handle_non_streaming(&self, pipeline: &Pipeline, request: &ChatRequest) -> AppResult<()> {
        let result = pipeline.answer_once(request).await?;

        if self.json {
            print_json(&result)
        } else {
            println!("{}", result.answer);
            tracing::debug!("Answered via route {}", result.route);
            Ok(())
        }
    }

    async fn handle_streaming(&self, pipeline: &Pipeline, request: ChatRequest) -> AppResult<()> {
        let mut stream = pipeline.answer_stream(request).await?;
        let mut route = String::new();
        let mut answer = String::new();

        while let Some(event) = stream.next().await {
            match event {
                ChatEvent::Route { route: name } => {
                    tracing::debug!("Route: {}", name);
                    route = name;
                }
                ChatEvent::Token { text } => {
                    if !self.json {
                        // Stream to stdout in real-time
                        print!("{}", text);
                        std::io::stdout().flush().ok();
                    }
                    answer.push_str(&text);
                }
                ChatEvent::End => break,
                ChatEvent::Error { message } => {
                    if !self.json {
                        println!();
                    }
                    return Err(AppError::Pipeline(message));
                }
            }
        }

        if self.json {
            print_json(&ChatResult { route, answer })
        } else {
            // Add newline after streaming output
            println!();
            Ok(())
        }
    }
}
