//! Route command handler.

use super::{load_pipeline, print_json};
use clap::Args;
use hrdesk_core::{config::AppConfig, AppResult};
use hrdesk_pipeline::ChatRequest;

/// Show how a question would be routed
#[derive(Args, Debug)]
pub struct RouteCommand {
    /// The question to classify
    pub question: String,

    /// Role of the person asking (default: roles.defaultRole)
    #[arg(long, default_value = "")]
    pub role: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl RouteCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing route command");

        let pipeline = load_pipeline(config).await?;
        let request = ChatRequest::new(self.question.clone()).with_role(self.role.clone());
        let decision = pipeline.classify(&request).await;

        if self.json {
            return print_json(&decision);
        }

        println!("Route:      {}", decision.route);
        println!("Method:     {:?}", decision.method);
        println!("Confidence: {:.2}", decision.confidence);
        if !decision.reason.is_empty() {
            println!("Reason:     {}", decision.reason);
        }
        Ok(())
    }
}
