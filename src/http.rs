//! Blocking HTTP transport backed by `reqwest`.
//!
//! Each [`HttpTaskApi`] owns one `reqwest::blocking::Client` (and so one
//! connection pool). The reentrant session keeps a single instance alive
//! for as long as any call in the context is nested inside it.

use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder};
use reqwest::Method;
use serde_json::Value;
use url::Url;

use crate::api::{ApiResponse, Connector, TaskApi};
use crate::config::Settings;
use crate::error::{Error, Result};

const USER_AGENT: &str = concat!("taskbadger-rust/", env!("CARGO_PKG_VERSION"));

/// Opens [`HttpTaskApi`] clients.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use taskbadger::http::HttpConnector;
///
/// let connector = HttpConnector::new().with_timeout(Duration::from_secs(5));
/// assert_eq!(connector.timeout(), Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
pub struct HttpConnector {
    timeout: Duration,
}

impl Default for HttpConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpConnector {
    /// Connector with a 30 second request timeout.
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The per-request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Connector for HttpConnector {
    fn connect(&self, settings: &Settings) -> Result<Arc<dyn TaskApi>> {
        let api = HttpTaskApi::new(&settings.base_url, &settings.token, self.timeout)?;
        Ok(Arc::new(api))
    }
}

/// [`TaskApi`] over HTTPS with bearer-token authentication.
pub struct HttpTaskApi {
    client: Client,
    base_url: Url,
    token: String,
}

impl std::fmt::Debug for HttpTaskApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTaskApi")
            .field("base_url", &self.base_url.as_str())
            .finish()
    }
}

impl HttpTaskApi {
    /// Build a client for `base_url`.
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| Error::Transport(format!("Invalid base URL '{}': {}", base_url, e)))?;
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            token: token.to_string(),
        })
    }

    fn tasks_url(&self, organization: &str, project: &str, task_id: Option<&str>) -> Result<Url> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|()| {
                Error::Transport(format!("Base URL cannot be a base: {}", self.base_url))
            })?;
            segments
                .pop_if_empty()
                .extend(["api", organization, project, "tasks"]);
            if let Some(id) = task_id {
                segments.push(id);
            }
            // trailing slash
            segments.push("");
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        tracing::debug!("{} {}", method, url);
        self.client
            .request(method, url)
            .bearer_auth(&self.token)
            .header(reqwest::header::ACCEPT, "application/json")
    }

    fn send(&self, builder: RequestBuilder) -> Result<ApiResponse> {
        let response = builder
            .send()
            .map_err(|e| Error::Transport(format!("Request failed: {}", e)))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .map_err(|e| Error::Transport(format!("Failed to read response body: {}", e)))?;
        tracing::debug!("response status {}", status);
        Ok(ApiResponse::new(status, body.to_vec()))
    }
}

impl TaskApi for HttpTaskApi {
    fn create(
        &self,
        organization: &str,
        project: &str,
        body: &Value,
        monitor_id: Option<&str>,
    ) -> Result<ApiResponse> {
        let mut url = self.tasks_url(organization, project, None)?;
        if let Some(monitor_id) = monitor_id {
            url.query_pairs_mut().append_pair("monitor_id", monitor_id);
        }
        self.send(self.request(Method::POST, url).json(body))
    }

    fn partial_update(
        &self,
        organization: &str,
        project: &str,
        task_id: &str,
        body: &Value,
    ) -> Result<ApiResponse> {
        let url = self.tasks_url(organization, project, Some(task_id))?;
        self.send(self.request(Method::PATCH, url).json(body))
    }

    fn get(&self, organization: &str, project: &str, task_id: &str) -> Result<ApiResponse> {
        let url = self.tasks_url(organization, project, Some(task_id))?;
        self.send(self.request(Method::GET, url))
    }

    fn list(
        &self,
        organization: &str,
        project: &str,
        cursor: Option<&str>,
        page_size: Option<u32>,
    ) -> Result<ApiResponse> {
        let mut url = self.tasks_url(organization, project, None)?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(cursor) = cursor {
                query.append_pair("cursor", cursor);
            }
            if let Some(page_size) = page_size {
                query.append_pair("page_size", &page_size.to_string());
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }
        self.send(self.request(Method::GET, url))
    }
}
