//! Prompt set types.
//!
//! A prompt set holds the router prompts and one answer template per route.
//! Templates use Handlebars syntax; see [`crate::builder`] for the variables
//! each template receives.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Prompts used by the model stage of the router.
///
/// Both templates receive `question` and `role`; the user template also
/// receives `routes`, the comma-separated list of configured route names.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouterPrompts {
    pub system: String,
    pub user: String,
}

impl Default for RouterPrompts {
    fn default() -> Self {
        Self {
            system: DEFAULT_ROUTER_SYSTEM.to_string(),
            user: DEFAULT_ROUTER_USER.to_string(),
        }
    }
}

/// Every prompt the pipeline renders, as loaded from `prompts.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromptSet {
    #[serde(default)]
    pub router: RouterPrompts,

    /// Answer template per route name
    #[serde(default)]
    pub routes: BTreeMap<String, String>,
}

impl PromptSet {
    /// Answer template of a route.
    pub fn route_template(&self, route: &str) -> Option<&str> {
        self.routes.get(route).map(String::as_str)
    }
}

impl Default for PromptSet {
    fn default() -> Self {
        let mut routes = BTreeMap::new();
        routes.insert("hr_policy".to_string(), DEFAULT_HR_POLICY_TEMPLATE.to_string());
        routes.insert("onboarding".to_string(), DEFAULT_ONBOARDING_TEMPLATE.to_string());

        Self {
            router: RouterPrompts::default(),
            routes,
        }
    }
}

const DEFAULT_ROUTER_SYSTEM: &str = "You classify employee questions for an HR help desk. \
The person asking has the role '{{role}}'. Reply with a single JSON object and nothing else.";

const DEFAULT_ROUTER_USER: &str = "Choose the route that best fits the question.
Available routes: {{routes}}

Question: {{question}}";

const DEFAULT_HR_POLICY_TEMPLATE: &str = "You are an HR policy assistant. Answer using only the sources below.
The person asking has the role '{{role}}'. Details reserved for {{admin_roles}} must not be shared with other roles.
If the sources do not contain the answer, say that you could not find it.

Sources:
{{context}}

Question: {{question}}
Answer:";

const DEFAULT_ONBOARDING_TEMPLATE: &str = "You are an onboarding assistant helping new hires get set up.
The person asking has the role '{{role}}'. Administrative steps for {{admin_roles}} may be mentioned only to those roles.
Use the sources below and give concrete, ordered steps where possible.

Sources:
{{context}}

Question: {{question}}
Answer:";
