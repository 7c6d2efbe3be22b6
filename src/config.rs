//! Client settings and initialization.
//!
//! [`Settings`] is an immutable bundle of credentials, integrations and
//! hooks. It is shared as `Arc<Settings>` and replaced wholesale on
//! reconfiguration, so a request already in flight keeps the settings it
//! started with.
//!
//! [`init`] resolves settings from explicit options and `TASKBADGER_*`
//! environment variables and binds them.
//!
//! # Environment
//!
//! | Variable              | Option              |
//! |-----------------------|---------------------|
//! | `TASKBADGER_HOST`     | `host`              |
//! | `TASKBADGER_ORG`      | `organization_slug` |
//! | `TASKBADGER_PROJECT`  | `project_slug`      |
//! | `TASKBADGER_API_KEY`  | `token`             |

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{Map, Value};

use crate::api::Connector;
use crate::badger::Badger;
use crate::error::{Error, Result};

/// Default API host.
pub const DEFAULT_HOST: &str = "https://taskbadger.net";

/// Pre-create hook.
///
/// Receives the fully assembled create payload and returns the payload to
/// send, or `None` to veto the request.
pub type BeforeCreate = Arc<dyn Fn(Map<String, Value>) -> Option<Map<String, Value>> + Send + Sync>;

/// A framework integration registered on [`Settings`].
///
/// Integrations are looked up by identifier and downcast to their concrete
/// type, e.g. `settings.system::<CelerySystemIntegration>("celery")`.
pub trait System: Send + Sync + fmt::Debug {
    /// Unique identifier of the integration.
    fn identifier(&self) -> &'static str;

    /// Access to the concrete type.
    fn as_any(&self) -> &dyn Any;
}

/// Credentials and integrations for one configuration binding.
///
/// # Examples
///
/// ```
/// use taskbadger::Settings;
///
/// let settings = Settings::new("https://taskbadger.net", "token", "org", "project")
///     .with_before_create(|mut payload| {
///         payload.remove("data");
///         Some(payload)
///     });
/// assert_eq!(settings.organization_slug, "org");
/// ```
#[derive(Clone)]
pub struct Settings {
    /// API base URL.
    pub base_url: String,
    /// API token.
    pub token: String,
    /// Organization slug.
    pub organization_slug: String,
    /// Project slug.
    pub project_slug: String,
    systems: HashMap<&'static str, Arc<dyn System>>,
    before_create: Option<BeforeCreate>,
    connector: Arc<dyn Connector>,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("base_url", &self.base_url)
            .field("token", &"[REDACTED]")
            .field("organization_slug", &self.organization_slug)
            .field("project_slug", &self.project_slug)
            .field("systems", &self.systems.keys().collect::<Vec<_>>())
            .field("before_create", &self.before_create.is_some())
            .finish()
    }
}

impl Settings {
    /// Settings using the default HTTP connector.
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        organization_slug: impl Into<String>,
        project_slug: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            token: token.into(),
            organization_slug: organization_slug.into(),
            project_slug: project_slug.into(),
            systems: HashMap::new(),
            before_create: None,
            connector: default_connector(),
        }
    }

    /// Register a framework integration.
    pub fn with_system(mut self, system: impl System + 'static) -> Self {
        self.systems.insert(system.identifier(), Arc::new(system));
        self
    }

    /// Install a pre-create hook.
    pub fn with_before_create<F>(mut self, hook: F) -> Self
    where
        F: Fn(Map<String, Value>) -> Option<Map<String, Value>> + Send + Sync + 'static,
    {
        self.before_create = Some(Arc::new(hook));
        self
    }

    /// Replace the connector used to open HTTP resources.
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    /// The connector used to open HTTP resources.
    pub fn connector(&self) -> &Arc<dyn Connector> {
        &self.connector
    }

    /// Look up an integration by identifier and concrete type.
    pub fn system<T: System + 'static>(&self, identifier: &str) -> Option<&T> {
        self.systems
            .get(identifier)
            .and_then(|system| system.as_any().downcast_ref::<T>())
    }

    /// Run the pre-create hook, if any.
    pub(crate) fn call_before_create(
        &self,
        payload: Map<String, Value>,
    ) -> Option<Map<String, Value>> {
        match &self.before_create {
            Some(hook) => hook(payload).filter(|payload| !payload.is_empty()),
            None => Some(payload),
        }
    }
}

#[cfg(feature = "http-client")]
fn default_connector() -> Arc<dyn Connector> {
    Arc::new(crate::http::HttpConnector::new())
}

#[cfg(not(feature = "http-client"))]
fn default_connector() -> Arc<dyn Connector> {
    Arc::new(crate::api::UnavailableConnector)
}

/// Options for [`init`]. Unset values fall back to the environment.
#[derive(Default)]
pub struct InitOptions {
    /// API host; `TASKBADGER_HOST`, then [`DEFAULT_HOST`].
    pub host: Option<String>,
    /// Organization slug; `TASKBADGER_ORG`.
    pub organization_slug: Option<String>,
    /// Project slug; `TASKBADGER_PROJECT`.
    pub project_slug: Option<String>,
    /// API token or project key; `TASKBADGER_API_KEY`.
    pub token: Option<String>,
    /// Integrations to register.
    pub systems: Vec<Arc<dyn System>>,
    /// Tags applied to every task created in the initializing context.
    pub tags: BTreeMap<String, String>,
    /// Pre-create hook.
    pub before_create: Option<BeforeCreate>,
    /// Connector override.
    pub connector: Option<Arc<dyn Connector>>,
}

impl fmt::Debug for InitOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InitOptions")
            .field("host", &self.host)
            .field("organization_slug", &self.organization_slug)
            .field("project_slug", &self.project_slug)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("systems", &self.systems)
            .field("tags", &self.tags)
            .finish()
    }
}

impl InitOptions {
    /// Options with only a token (typically a project key).
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            ..Self::default()
        }
    }

    /// Set the organization and project slugs.
    pub fn project(
        mut self,
        organization_slug: impl Into<String>,
        project_slug: impl Into<String>,
    ) -> Self {
        self.organization_slug = Some(organization_slug.into());
        self.project_slug = Some(project_slug.into());
        self
    }

    /// Set the API host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Register an integration.
    pub fn system(mut self, system: impl System + 'static) -> Self {
        self.systems.push(Arc::new(system));
        self
    }

    /// Add a default tag.
    pub fn tag(mut self, namespace: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(namespace.into(), value.into());
        self
    }

    /// Install a pre-create hook.
    pub fn before_create<F>(mut self, hook: F) -> Self
    where
        F: Fn(Map<String, Value>) -> Option<Map<String, Value>> + Send + Sync + 'static,
    {
        self.before_create = Some(Arc::new(hook));
        self
    }

    /// Override the connector.
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Resolve the options into [`Settings`] without binding them.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationMissing`] naming every parameter that
    /// is absent from both the options and the environment.
    pub fn into_settings(self) -> Result<(Settings, BTreeMap<String, String>)> {
        let host = self
            .host
            .or_else(|| from_env("HOST"))
            .unwrap_or_else(|| DEFAULT_HOST.to_string());
        let mut organization_slug = self.organization_slug.or_else(|| from_env("ORG"));
        let mut project_slug = self.project_slug.or_else(|| from_env("PROJECT"));
        let mut token = self.token.or_else(|| from_env("API_KEY"));

        if let Some(raw) = token.take() {
            match parse_project_key(&raw) {
                Some(key) => {
                    organization_slug = Some(key.organization_slug);
                    project_slug = Some(key.project_slug);
                    token = Some(key.api_key);
                },
                None => {
                    tracing::warn!(
                        "Legacy API keys are deprecated. Please switch to a project API key."
                    );
                    token = Some(raw);
                },
            }
        }

        let (Some(organization_slug), Some(project_slug), Some(token)) =
            (organization_slug.clone(), project_slug.clone(), token.clone())
        else {
            let missing = [
                ("organization_slug", organization_slug.is_none()),
                ("project_slug", project_slug.is_none()),
                ("token", token.is_none()),
            ]
            .into_iter()
            .filter_map(|(name, absent)| absent.then_some(name))
            .collect();
            return Err(Error::ConfigurationMissing { missing });
        };

        let mut settings = Settings::new(host, token, organization_slug, project_slug);
        for system in self.systems {
            settings.systems.insert(system.identifier(), system);
        }
        settings.before_create = self.before_create;
        if let Some(connector) = self.connector {
            settings.connector = connector;
        }
        Ok((settings, self.tags))
    }
}

/// Initialize the client.
///
/// Binds the resolved settings (and tags) to the calling context and makes
/// them the process-wide default for contexts created afterwards. Contexts
/// that already exist on other threads keep their settings.
///
/// # Examples
///
/// ```no_run
/// use taskbadger::{init, InitOptions};
///
/// init(InitOptions::with_token("bXlvcmcvbXlwcm9qZWN0L3NlY3JldA==")).unwrap();
/// assert!(taskbadger::is_configured());
/// ```
pub fn init(options: InitOptions) -> Result<()> {
    let (settings, tags) = options.into_settings()?;
    let settings = Arc::new(settings);
    Badger::configure_default(Some(settings.clone()));
    Badger::current().bind(Some(settings), tags);
    Ok(())
}

/// A decoded project API key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectKey {
    /// Organization slug.
    pub organization_slug: String,
    /// Project slug.
    pub project_slug: String,
    /// The API key proper.
    pub api_key: String,
}

/// Decode a project API key (`base64("org/project/key")`).
///
/// Returns `None` for legacy keys and anything else that is not exactly
/// three non-empty `/`-separated parts.
///
/// # Examples
///
/// ```
/// use taskbadger::config::parse_project_key;
///
/// let key = parse_project_key("b3JnMS9wcm9qMS9hcGlrZXk=").unwrap();
/// assert_eq!(key.organization_slug, "org1");
/// assert_eq!(key.project_slug, "proj1");
/// assert_eq!(key.api_key, "apikey");
///
/// assert!(parse_project_key("some-legacy-api-key").is_none());
/// ```
pub fn parse_project_key(token: &str) -> Option<ProjectKey> {
    let decoded = STANDARD.decode(token).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let parts: Vec<&str> = decoded.split('/').collect();
    match parts.as_slice() {
        [org, project, key] if !org.is_empty() && !project.is_empty() && !key.is_empty() => {
            Some(ProjectKey {
                organization_slug: (*org).to_string(),
                project_slug: (*project).to_string(),
                api_key: (*key).to_string(),
            })
        },
        _ => None,
    }
}

fn from_env(name: &str) -> Option<String> {
    std::env::var(format!("TASKBADGER_{name}"))
        .ok()
        .filter(|value| !value.is_empty())
}
