//! Generation backend implementations.

mod lines;
pub mod mock;
pub mod ollama;
pub mod openai;

pub use mock::{MockClient, Responder};
pub use ollama::OllamaClient;
pub use openai::{OpenAiClient, DEFAULT_OPENAI_BASE_URL};
