//! Question routing.
//!
//! A question is routed by keyword rules first. Rules are checked in
//! configuration order and the first keyword found in the lower-cased
//! question wins without any backend call. Questions matching no rule are
//! classified by a structured completion; anything that goes wrong there
//! (timeout, request error, unparseable reply) falls back to the default
//! route. Routing never fails.

use hrdesk_core::config::{KeywordRoute, RoutingConfig};
use hrdesk_core::{AppError, AppResult};
use hrdesk_llm::{complete_structured, LlmClient, LlmRequest, StructuredSchema};
use hrdesk_prompt::{render_router, RouterPrompts};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A configured route name.
///
/// Values only come from a [`RouteSet`], so every `Route` names a route the
/// configuration declares.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Route(String);

impl Route {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The enumerated set of routes.
#[derive(Debug, Clone)]
pub struct RouteSet {
    names: Vec<String>,
    default: Route,
}

impl RouteSet {
    pub fn new(names: Vec<String>, default_route: &str) -> AppResult<Self> {
        if names.is_empty() {
            return Err(AppError::Config("Route set cannot be empty".to_string()));
        }
        if !names.iter().any(|name| name == default_route) {
            return Err(AppError::Config(format!(
                "Default route '{}' is not one of: {}",
                default_route,
                names.join(", ")
            )));
        }
        Ok(Self {
            default: Route(default_route.to_string()),
            names,
        })
    }

    pub fn from_config(config: &RoutingConfig) -> AppResult<Self> {
        Self::new(config.routes.clone(), &config.default_route)
    }

    /// The route named `name`, if configured.
    pub fn get(&self, name: &str) -> Option<Route> {
        self.names
            .iter()
            .find(|candidate| candidate.as_str() == name)
            .map(|candidate| Route(candidate.clone()))
    }

    pub fn default_route(&self) -> &Route {
        &self.default
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// How a route was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteMethod {
    Keyword,
    Model,
    Fallback,
}

/// Outcome of routing one question.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteDecision {
    pub route: Route,
    /// 0.0 to 1.0
    pub confidence: f32,
    pub reason: String,
    pub method: RouteMethod,
}

/// Reply shape requested from the classification model.
#[derive(Debug, Clone, Deserialize)]
struct RouterReply {
    route: String,
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    reason: String,
}

impl StructuredSchema for RouterReply {
    fn format_instructions() -> String {
        r#"Respond with only a JSON object of the form {"route": "<one of the routes above>", "confidence": <number from 0.0 to 1.0>, "reason": "<one short sentence>"}"#
            .to_string()
    }

    fn fallback(_raw: &str, reason: &str) -> Self {
        Self {
            route: String::new(),
            confidence: 0.0,
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct KeywordRule {
    route: Route,
    keywords: Vec<String>,
}

/// Routes questions to a configured route.
pub struct Router {
    routes: RouteSet,
    rules: Vec<KeywordRule>,
    prompts: RouterPrompts,
    client: Arc<dyn LlmClient>,
    model: String,
    timeout: Duration,
}

impl Router {
    /// Create a router.
    ///
    /// Fails with a configuration error when a keyword rule names an unknown
    /// route or the router prompts cannot be rendered.
    pub fn new(
        routes: RouteSet,
        keyword_routes: &[KeywordRoute],
        prompts: RouterPrompts,
        client: Arc<dyn LlmClient>,
        model: impl Into<String>,
    ) -> AppResult<Self> {
        let rules = keyword_routes
            .iter()
            .map(|rule| {
                let route = routes.get(&rule.route).ok_or_else(|| {
                    AppError::Config(format!("Keyword rule targets unknown route '{}'", rule.route))
                })?;
                let keywords = rule
                    .keywords
                    .iter()
                    .map(|keyword| keyword.trim().to_lowercase())
                    .filter(|keyword| !keyword.is_empty())
                    .collect();
                Ok(KeywordRule { route, keywords })
            })
            .collect::<AppResult<Vec<_>>>()?;

        // Surface template mistakes at startup rather than on the first question
        render_router(&prompts, "", "", routes.names())?;

        Ok(Self {
            routes,
            rules,
            prompts,
            client,
            model: model.into(),
            timeout: Duration::from_secs(60),
        })
    }

    /// Deadline for the classification call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn routes(&self) -> &RouteSet {
        &self.routes
    }

    /// Route by keyword rules alone.
    pub fn match_keywords(&self, question: &str) -> Option<RouteDecision> {
        let question = question.to_lowercase();

        self.rules.iter().find_map(|rule| {
            rule.keywords
                .iter()
                .find(|keyword| question.contains(keyword.as_str()))
                .map(|keyword| RouteDecision {
                    route: rule.route.clone(),
                    confidence: 1.0,
                    reason: format!("matched keyword '{}'", keyword),
                    method: RouteMethod::Keyword,
                })
        })
    }

    /// Route a question.
    pub async fn classify(&self, question: &str, role: &str) -> RouteDecision {
        if let Some(decision) = self.match_keywords(question) {
            tracing::debug!(route = %decision.route, reason = %decision.reason, "Keyword route");
            return decision;
        }

        let (system, user) = match render_router(&self.prompts, question, role, self.routes.names()) {
            Ok(rendered) => rendered,
            Err(e) => return self.fallback(format!("router prompt failed: {}", e)),
        };

        let request = LlmRequest::new(user, self.model.clone())
            .with_system(system)
            .with_temperature(0.0);

        let reply = match tokio::time::timeout(
            self.timeout,
            complete_structured::<RouterReply>(self.client.as_ref(), &request),
        )
        .await
        {
            Ok(reply) => reply,
            Err(_) => {
                tracing::warn!(timeout_secs = self.timeout.as_secs(), "Router classification timed out");
                return self.fallback("classification timed out".to_string());
            }
        };

        if !reply.parsed {
            let reason = reply
                .diagnostic
                .unwrap_or_else(|| "unparseable classification".to_string());
            tracing::warn!(reason = %reason, "Router fell back to default route");
            return self.fallback(reason);
        }

        let value = reply.value;
        let confidence = value.confidence.clamp(0.0, 1.0);

        match self.routes.get(value.route.trim()) {
            Some(route) => RouteDecision {
                route,
                confidence,
                reason: value.reason,
                method: RouteMethod::Model,
            },
            None => {
                tracing::warn!(route = %value.route, "Model chose an unconfigured route");
                RouteDecision {
                    route: self.routes.default_route().clone(),
                    confidence,
                    reason: format!(
                        "model chose unknown route '{}'; {}",
                        value.route, value.reason
                    ),
                    method: RouteMethod::Fallback,
                }
            }
        }
    }

    fn fallback(&self, reason: String) -> RouteDecision {
        RouteDecision {
            route: self.routes.default_route().clone(),
            confidence: 0.0,
            reason,
            method: RouteMethod::Fallback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hrdesk_llm::MockClient;

    fn route_set() -> RouteSet {
        RouteSet::new(
            vec!["hr_policy".to_string(), "onboarding".to_string()],
            "hr_policy",
        )
        .unwrap()
    }

    fn rules() -> Vec<KeywordRoute> {
        vec![KeywordRoute {
            route: "onboarding".to_string(),
            keywords: vec!["badge".to_string(), "First Day".to_string()],
        }]
    }

    fn router(client: Arc<MockClient>) -> Router {
        Router::new(route_set(), &rules(), RouterPrompts::default(), client, "mock").unwrap()
    }

    #[test]
    fn test_route_set_rejects_unknown_default() {
        let err = RouteSet::new(vec!["a".to_string()], "b").unwrap_err();
        assert!(err.is_config());
        assert!(RouteSet::new(Vec::new(), "a").is_err());
    }

    #[test]
    fn test_get_only_configured_routes() {
        let routes = route_set();
        assert_eq!(routes.get("onboarding").unwrap().as_str(), "onboarding");
        assert_eq!(routes.default_route().as_str(), "hr_policy");
        assert!(routes.get("payroll").is_none());
    }

    #[test]
    fn test_rule_with_unknown_route_is_config_error() {
        let rules = vec![KeywordRoute {
            route: "payroll".to_string(),
            keywords: vec!["salary".to_string()],
        }];
        let client: Arc<dyn LlmClient> = Arc::new(MockClient::new());
        let err = Router::new(route_set(), &rules, RouterPrompts::default(), client, "m")
            .err()
            .unwrap();
        assert!(err.is_config());
    }

    #[test]
    fn test_bad_router_template_is_config_error() {
        let prompts = RouterPrompts {
            system: "Classify.".to_string(),
            user: "{{question}} {{department}}".to_string(),
        };
        let client: Arc<dyn LlmClient> = Arc::new(MockClient::new());
        let err = Router::new(route_set(), &rules(), prompts, client, "m")
            .err()
            .unwrap();
        assert!(err.is_config());
    }

    #[tokio::test]
    async fn test_keyword_is_case_insensitive() {
        let client = Arc::new(MockClient::new());
        let decision = router(Arc::clone(&client))
            .classify("What happens on my FIRST DAY?", "employee")
            .await;

        assert_eq!(decision.route.as_str(), "onboarding");
        assert_eq!(decision.method, RouteMethod::Keyword);
        assert_eq!(decision.confidence, 1.0);
        assert_eq!(client.complete_calls(), 0);
    }

    #[tokio::test]
    async fn test_model_route() {
        let client = Arc::new(MockClient::new().with_json_reply(
            r#"{"route": "onboarding", "confidence": 0.8, "reason": "asks about setup"}"#,
        ));
        let decision = router(Arc::clone(&client))
            .classify("Who do I talk to about my desk?", "employee")
            .await;

        assert_eq!(decision.route.as_str(), "onboarding");
        assert_eq!(decision.method, RouteMethod::Model);
        assert!((decision.confidence - 0.8).abs() < f32::EPSILON);
        assert_eq!(client.json_calls(), 1);

        let request = &client.requests()[0];
        assert!(request.system.is_some());
        assert!(request.prompt.contains("hr_policy, onboarding"));
    }

    #[tokio::test]
    async fn test_unknown_model_route_normalizes() {
        let client = Arc::new(
            MockClient::new().with_json_reply(r#"{"route": "payroll", "confidence": 0.9}"#),
        );
        let decision = router(client).classify("When is payday?", "employee").await;

        assert_eq!(decision.route.as_str(), "hr_policy");
        assert_eq!(decision.method, RouteMethod::Fallback);
        assert!(decision.reason.contains("payroll"));
    }

    #[tokio::test]
    async fn test_confidence_is_clamped() {
        let client = Arc::new(
            MockClient::new().with_json_reply(r#"{"route": "hr_policy", "confidence": 7}"#),
        );
        let decision = router(client).classify("Sick leave?", "employee").await;
        assert_eq!(decision.confidence, 1.0);
    }

    #[tokio::test]
    async fn test_backend_error_falls_back() {
        let client = Arc::new(MockClient::failing("connection refused"));
        let decision = router(client).classify("Sick leave?", "employee").await;

        assert_eq!(decision.route.as_str(), "hr_policy");
        assert_eq!(decision.confidence, 0.0);
        assert!(decision.reason.contains("connection refused"));
    }

    #[tokio::test]
    async fn test_timeout_falls_back() {
        let client = Arc::new(MockClient::new().with_delay(Duration::from_millis(200)));
        let decision = router(client)
            .with_timeout(Duration::from_millis(20))
            .classify("Sick leave?", "employee")
            .await;

        assert_eq!(decision.method, RouteMethod::Fallback);
        assert_eq!(decision.confidence, 0.0);
        assert!(decision.reason.contains("timed out"));
    }
}
