//! Task actions: notifications the server fires when a task hits a trigger.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// An action attached to a task.
///
/// `trigger` is a server-side trigger expression such as `"success"`,
/// `"error,stale"` or `"*/50%"`.
///
/// # Examples
///
/// ```
/// use taskbadger::Action;
///
/// let action = Action::email("error", "ops@example.com");
/// assert_eq!(action.integration, "email");
/// assert_eq!(action.config["to"], "ops@example.com");
///
/// let hook = Action::webhook("success", "wh_123");
/// assert_eq!(hook.integration, "webhook:wh_123");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// When the action fires.
    pub trigger: String,
    /// Integration identifier.
    pub integration: String,
    /// Integration-specific configuration.
    #[serde(default)]
    pub config: Value,
}

impl Action {
    /// Action with an arbitrary integration and configuration.
    pub fn new(trigger: impl Into<String>, integration: impl Into<String>, config: Value) -> Self {
        Self {
            trigger: trigger.into(),
            integration: integration.into(),
            config,
        }
    }

    /// Send an email to `to` when `trigger` fires.
    pub fn email(trigger: impl Into<String>, to: impl Into<String>) -> Self {
        Self::new(trigger, "email", json!({ "to": to.into() }))
    }

    /// Call the configured webhook `webhook_id` when `trigger` fires.
    pub fn webhook(trigger: impl Into<String>, webhook_id: impl AsRef<str>) -> Self {
        Self::new(
            trigger,
            format!("webhook:{}", webhook_id.as_ref()),
            json!({}),
        )
    }
}
