//! The REST boundary between the task API and the remote service.
//!
//! [`TaskApi`] is the raw resource interface: each call returns the HTTP
//! status and the undecoded body, and the task layer decides what a status
//! means. [`Connector`] opens a `TaskApi` from [`Settings`]; the reentrant
//! session calls it at most once per nesting of
//! [`ReentrantSession`](crate::session::ReentrantSession).
//!
//! The default connector is [`HttpConnector`](crate::http::HttpConnector)
//! (feature `http-client`).

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::Settings;
use crate::error::{Error, Result};

/// Raw response from a [`TaskApi`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    /// HTTP status code
    pub status: u16,
    /// Response body
    pub body: Vec<u8>,
}

impl ApiResponse {
    /// Create a new response.
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Returns `true` for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Maps the status to an error, or decodes the body on success.
    pub fn parse<T: DeserializeOwned>(self) -> Result<T> {
        if !self.is_success() {
            return Err(Error::from_status(self.status, self.body));
        }
        serde_json::from_slice(&self.body).map_err(|e| Error::InvalidResponse(e.to_string()))
    }
}

/// Task resource operations on the remote service.
///
/// Implementations block the calling thread for the round trip. A transport
/// failure (no HTTP response at all) is reported as
/// [`Error::Transport`]; any HTTP response, including error statuses, is
/// returned as an [`ApiResponse`].
pub trait TaskApi: Send + Sync {
    /// `POST /api/{org}/{project}/tasks/`
    fn create(
        &self,
        organization: &str,
        project: &str,
        body: &Value,
        monitor_id: Option<&str>,
    ) -> Result<ApiResponse>;

    /// `PATCH /api/{org}/{project}/tasks/{id}/`
    fn partial_update(
        &self,
        organization: &str,
        project: &str,
        task_id: &str,
        body: &Value,
    ) -> Result<ApiResponse>;

    /// `GET /api/{org}/{project}/tasks/{id}/`
    fn get(&self, organization: &str, project: &str, task_id: &str) -> Result<ApiResponse>;

    /// `GET /api/{org}/{project}/tasks/`
    fn list(
        &self,
        organization: &str,
        project: &str,
        cursor: Option<&str>,
        page_size: Option<u32>,
    ) -> Result<ApiResponse>;

    /// Called when the owning session's depth returns to zero.
    fn close(&self) {}
}

/// Opens [`TaskApi`] resources for a session.
pub trait Connector: Send + Sync {
    /// Open a resource authenticated with `settings`.
    fn connect(&self, settings: &Settings) -> Result<Arc<dyn TaskApi>>;
}

/// Connector used when no HTTP client is compiled in.
#[cfg(not(feature = "http-client"))]
#[derive(Debug, Default)]
pub(crate) struct UnavailableConnector;

#[cfg(not(feature = "http-client"))]
impl Connector for UnavailableConnector {
    fn connect(&self, _settings: &Settings) -> Result<Arc<dyn TaskApi>> {
        Err(Error::Transport(
            "no HTTP client available; enable the `http-client` feature or supply a connector"
                .to_string(),
        ))
    }
}
