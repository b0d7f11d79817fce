//! Schema-constrained (structured) completions.
//!
//! A structured completion asks the backend for a JSON object and parses it
//! into a typed value. Parse and request failures are expected outcomes here:
//! they never surface as errors. Instead the caller always receives a value,
//! tagged with whether it was parsed and a diagnostic describing the failure.

use crate::client::{LlmClient, LlmRequest};
use serde::de::DeserializeOwned;

/// A type that can be requested as a structured completion.
pub trait StructuredSchema: DeserializeOwned + Sized {
    /// Formatting instructions appended to the user prompt.
    fn format_instructions() -> String;

    /// Value used when the backend fails or replies with something unparseable.
    fn fallback(raw: &str, reason: &str) -> Self;
}

/// Outcome of a structured completion.
#[derive(Debug, Clone)]
pub struct Structured<T> {
    /// Parsed value, or the schema's fallback
    pub value: T,

    /// Whether `value` came from the backend reply
    pub parsed: bool,

    /// Raw reply text (empty if the request itself failed)
    pub raw: String,

    /// Why parsing or the request failed
    pub diagnostic: Option<String>,
}

impl<T: StructuredSchema> Structured<T> {
    fn failed(raw: impl Into<String>, reason: impl Into<String>) -> Self {
        let raw = raw.into();
        let reason = reason.into();
        Self {
            value: T::fallback(&raw, &reason),
            parsed: false,
            raw,
            diagnostic: Some(reason),
        }
    }
}

/// Request a structured completion and parse it into `T`.
///
/// JSON mode is enabled on a copy of `request` and the schema's format
/// instructions are appended to its prompt.
pub async fn complete_structured<T: StructuredSchema>(
    client: &dyn LlmClient,
    request: &LlmRequest,
) -> Structured<T> {
    let mut request = request.clone().with_json_output();
    request.prompt = format!("{}\n\n{}", request.prompt, T::format_instructions());

    match client.complete(&request).await {
        Ok(response) => parse_structured(&response.content),
        Err(e) => {
            tracing::warn!("Structured completion request failed: {}", e);
            Structured::failed("", format!("request failed: {}", e))
        }
    }
}

/// Parse a raw backend reply into a structured value.
pub fn parse_structured<T: StructuredSchema>(raw: &str) -> Structured<T> {
    let Some(object) = extract_json_object(raw) else {
        return Structured::failed(raw, "JSON parsing error: no JSON object in response");
    };

    match serde_json::from_str::<T>(object) {
        Ok(value) => Structured {
            value,
            parsed: true,
            raw: raw.to_string(),
            diagnostic: None,
        },
        Err(e) => Structured::failed(raw, format!("JSON parsing error: {}", e)),
    }
}

/// Locate the outermost JSON object in a reply that may carry prose or code fences.
pub fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::MockClient;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Verdict {
        label: String,
        score: f32,
    }

    impl StructuredSchema for Verdict {
        fn format_instructions() -> String {
            r#"Reply with {"label": string, "score": number}"#.to_string()
        }

        fn fallback(_raw: &str, reason: &str) -> Self {
            Self {
                label: format!("unknown ({})", reason),
                score: 0.0,
            }
        }
    }

    #[test]
    fn test_extract_json_from_fenced_reply() {
        let raw = "```json\n{\"label\": \"a\", \"score\": 1}\n```";
        assert_eq!(
            extract_json_object(raw),
            Some("{\"label\": \"a\", \"score\": 1}")
        );
    }

    #[test]
    fn test_extract_json_none() {
        assert_eq!(extract_json_object("no braces here"), None);
        assert_eq!(extract_json_object("} backwards {"), None);
    }

    #[test]
    fn test_parse_structured_success() {
        let out: Structured<Verdict> =
            parse_structured("Sure! {\"label\": \"good\", \"score\": 0.9}");
        assert!(out.parsed);
        assert!(out.diagnostic.is_none());
        assert_eq!(out.value.label, "good");
    }

    #[test]
    fn test_parse_structured_failure_returns_fallback() {
        let out: Structured<Verdict> = parse_structured("I think it's good");
        assert!(!out.parsed);
        assert_eq!(out.raw, "I think it's good");
        assert_eq!(out.value.score, 0.0);
        assert!(out.diagnostic.unwrap().contains("JSON parsing error"));
    }

    #[test]
    fn test_parse_structured_wrong_shape() {
        let out: Structured<Verdict> = parse_structured("{\"label\": 3}");
        assert!(!out.parsed);
        assert!(out.value.label.starts_with("unknown"));
    }

    #[tokio::test]
    async fn test_complete_structured_sets_json_mode() {
        let client = MockClient::new().with_json_reply(r#"{"label": "x", "score": 2.5}"#);
        let request = LlmRequest::new("Classify this", "mock");

        let out: Structured<Verdict> = complete_structured(&client, &request).await;

        assert!(out.parsed);
        assert_eq!(out.value.score, 2.5);
        assert_eq!(client.json_calls(), 1);
        let seen = client.requests();
        assert!(seen[0].json_mode);
        assert!(seen[0].prompt.starts_with("Classify this"));
        assert!(seen[0].prompt.contains("Reply with"));
    }

    #[tokio::test]
    async fn test_complete_structured_request_failure() {
        let client = MockClient::failing("backend down");
        let request = LlmRequest::new("Classify this", "mock");

        let out: Structured<Verdict> = complete_structured(&client, &request).await;

        assert!(!out.parsed);
        assert!(out.raw.is_empty());
        assert!(out.diagnostic.unwrap().contains("backend down"));
    }
}
