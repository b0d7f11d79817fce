//! Request, result and stream event types exchanged with transports.

use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// User id used when a request carries none.
pub const ANONYMOUS_USER: &str = "anonymous";

/// A question from an authenticated caller.
///
/// `role` and `user_id` come from the authentication layer and are trusted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub question: String,

    /// Empty means the configured default role
    #[serde(default)]
    pub role: String,

    #[serde(default = "default_user_id", alias = "userId")]
    pub user_id: String,
}

fn default_user_id() -> String {
    ANONYMOUS_USER.to_string()
}

impl ChatRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            role: String::new(),
            user_id: default_user_id(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }
}

/// Answer of a non-streaming request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResult {
    pub route: String,
    pub answer: String,
}

/// One event of a streamed answer.
///
/// A stream is `Route`, any number of `Token`s, then exactly one of `End`
/// or `Error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    Route { route: String },
    Token { text: String },
    End,
    Error { message: String },
}

impl ChatEvent {
    /// Whether no event follows this one.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChatEvent::End | ChatEvent::Error { .. })
    }
}

/// Stream of answer events.
pub type ChatStream = Pin<Box<dyn Stream<Item = ChatEvent> + Send>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_format() {
        let token = serde_json::to_value(ChatEvent::Token {
            text: "Hel".to_string(),
        })
        .unwrap();
        assert_eq!(token, serde_json::json!({"type": "token", "text": "Hel"}));

        let end = serde_json::to_value(ChatEvent::End).unwrap();
        assert_eq!(end, serde_json::json!({"type": "end"}));
    }

    #[test]
    fn test_request_defaults() {
        let request: ChatRequest =
            serde_json::from_str(r#"{"question": "How do I get a badge?"}"#).unwrap();
        assert_eq!(request.user_id, ANONYMOUS_USER);
        assert!(request.role.is_empty());

        let request: ChatRequest =
            serde_json::from_str(r#"{"question": "q", "userId": "u7", "role": "admin"}"#).unwrap();
        assert_eq!(request.user_id, "u7");
        assert_eq!(request.role, "admin");
    }

    #[test]
    fn test_terminal_events() {
        assert!(ChatEvent::End.is_terminal());
        assert!(ChatEvent::Error {
            message: "x".to_string()
        }
        .is_terminal());
        assert!(!ChatEvent::Route {
            route: "r".to_string()
        }
        .is_terminal());
    }
}
