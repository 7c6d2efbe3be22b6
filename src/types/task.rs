//! Task wire types exchanged with the Task Badger API.
//!
//! [`TaskRecord`] is the server's representation of a task. The client never
//! edits a record in place; every create or update call replaces the local
//! mirror with the record the server returns.
//!
//! [`CreateTask`] and [`TaskUpdate`] are the option sets for the create and
//! partial-update calls. Unset options are omitted from the request body
//! entirely, so the server never mistakes "not supplied" for "clear".

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use super::action::Action;

/// Task lifecycle status.
///
/// Terminal states (`Success`, `Error`, `Cancelled`, `Stale`) are never left
/// by the automatic Celery instrumentation; a job body that finalizes its own
/// task keeps that status.
///
/// # Examples
///
/// ```
/// use taskbadger::TaskStatus;
///
/// assert!(!TaskStatus::Processing.is_terminal());
/// assert!(TaskStatus::Stale.is_terminal());
/// assert_eq!(TaskStatus::PreProcessing.to_string(), "pre_processing");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created but not started.
    #[default]
    Pending,
    /// Preparing to run.
    PreProcessing,
    /// Running.
    Processing,
    /// Finishing up.
    PostProcessing,
    /// Completed successfully (terminal).
    Success,
    /// Failed (terminal).
    Error,
    /// Cancelled (terminal).
    Cancelled,
    /// Stopped reporting within its stale timeout (terminal).
    Stale,
}

impl TaskStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [TaskStatus; 8] = [
        Self::Pending,
        Self::PreProcessing,
        Self::Processing,
        Self::PostProcessing,
        Self::Success,
        Self::Error,
        Self::Cancelled,
        Self::Stale,
    ];

    /// Returns `true` for `success`, `error`, `cancelled` and `stale`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Success | Self::Error | Self::Cancelled | Self::Stale
        )
    }

    /// Wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::PreProcessing => "pre_processing",
            Self::Processing => "processing",
            Self::PostProcessing => "post_processing",
            Self::Success => "success",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
            Self::Stale => "stale",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A task as returned by the API.
///
/// Unknown properties returned by the server are kept in `extra` so newer
/// API fields survive a round trip through the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Task ID assigned by the server.
    pub id: String,

    /// Organization slug.
    #[serde(default)]
    pub organization: String,

    /// Project slug.
    #[serde(default)]
    pub project: String,

    /// Task name.
    pub name: String,

    /// Current status.
    #[serde(default)]
    pub status: TaskStatus,

    /// Current progress value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<i64>,

    /// Value at which the task is complete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_max: Option<i64>,

    /// Server-computed progress percentage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_percent: Option<i64>,

    /// Custom metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,

    /// Namespace to value tags.
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: BTreeMap<String, String>,

    /// Maximum expected runtime in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_runtime: Option<i64>,

    /// Maximum allowed seconds between updates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stale_timeout: Option<i64>,

    /// Creation timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,

    /// Last update timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,

    /// When the task entered `processing`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    /// When the task reached a terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,

    /// Dashboard URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Public (shareable) URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,

    /// Properties not modelled above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One page of a task listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPage {
    /// URL of the next page.
    #[serde(default)]
    pub next: Option<String>,
    /// URL of the previous page.
    #[serde(default)]
    pub previous: Option<String>,
    /// Tasks on this page.
    #[serde(default)]
    pub results: Vec<TaskRecord>,
}

impl TaskPage {
    /// Extracts the `cursor` query parameter from the `next` link.
    ///
    /// # Examples
    ///
    /// ```
    /// use taskbadger::TaskPage;
    ///
    /// let page = TaskPage {
    ///     next: Some("https://taskbadger.net/api/o/p/tasks/?cursor=abc&page_size=10".into()),
    ///     ..TaskPage::default()
    /// };
    /// assert_eq!(page.next_cursor().as_deref(), Some("abc"));
    /// ```
    pub fn next_cursor(&self) -> Option<String> {
        let next = url::Url::parse(self.next.as_deref()?).ok()?;
        next.query_pairs()
            .find(|(key, _)| key == "cursor")
            .map(|(_, value)| value.into_owned())
    }
}

/// Options for creating a task.
///
/// Also deserializable, so option sets that travel inside Celery message
/// headers can be turned back into a `CreateTask` on the other side.
///
/// # Examples
///
/// ```
/// use taskbadger::{CreateTask, TaskStatus};
/// use serde_json::json;
///
/// let opts = CreateTask::new()
///     .status(TaskStatus::Processing)
///     .value_max(500)
///     .data_entry("source", json!("s3://bucket/export.csv"))
///     .tag("env", "prod");
/// assert_eq!(opts.value_max, Some(500));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateTask {
    /// Initial status; `pending` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    /// Initial value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<i64>,
    /// Maximum value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_max: Option<i64>,
    /// Custom data, merged over the scope data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
    /// Maximum expected runtime in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_runtime: Option<i64>,
    /// Maximum allowed seconds between updates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stale_timeout: Option<i64>,
    /// Actions to attach.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<Action>,
    /// Monitor to associate the task with.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monitor_id: Option<String>,
    /// Tags, merged over the scope tags.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl CreateTask {
    /// Empty option set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the initial status.
    pub fn status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Set the initial value.
    pub fn value(mut self, value: i64) -> Self {
        self.value = Some(value);
        self
    }

    /// Set the maximum value.
    pub fn value_max(mut self, value_max: i64) -> Self {
        self.value_max = Some(value_max);
        self
    }

    /// Replace the custom data.
    pub fn data(mut self, data: Map<String, Value>) -> Self {
        self.data = Some(data);
        self
    }

    /// Add a single data entry.
    pub fn data_entry(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data
            .get_or_insert_with(Map::new)
            .insert(key.into(), value);
        self
    }

    /// Set the maximum runtime in seconds.
    pub fn max_runtime(mut self, seconds: i64) -> Self {
        self.max_runtime = Some(seconds);
        self
    }

    /// Set the stale timeout in seconds.
    pub fn stale_timeout(mut self, seconds: i64) -> Self {
        self.stale_timeout = Some(seconds);
        self
    }

    /// Attach an action.
    pub fn action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    /// Associate the task with a monitor.
    pub fn monitor_id(mut self, monitor_id: impl Into<String>) -> Self {
        self.monitor_id = Some(monitor_id.into());
        self
    }

    /// Add a tag.
    pub fn tag(mut self, namespace: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(namespace.into(), value.into());
        self
    }
}

/// Fields to change in a partial update.
///
/// Serializes straight to the PATCH body: `None` fields and empty
/// collections are left out of the JSON.
///
/// # Examples
///
/// ```
/// use taskbadger::{TaskStatus, TaskUpdate};
///
/// let update = TaskUpdate::new().status(TaskStatus::Success).value(100);
/// let body = serde_json::to_value(&update).unwrap();
/// assert_eq!(body, serde_json::json!({"status": "success", "value": 100}));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskUpdate {
    /// New name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// New status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    /// New value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<i64>,
    /// New maximum value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_max: Option<i64>,
    /// Replacement data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
    /// New maximum runtime in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_runtime: Option<i64>,
    /// New stale timeout in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stale_timeout: Option<i64>,
    /// Actions to add.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<Action>,
    /// Tags to set.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl TaskUpdate {
    /// Update that changes nothing (a heartbeat).
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the status.
    pub fn status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Set the value.
    pub fn value(mut self, value: i64) -> Self {
        self.value = Some(value);
        self
    }

    /// Set the value, leaving it untouched when `None`.
    pub fn maybe_value(mut self, value: Option<i64>) -> Self {
        self.value = value;
        self
    }

    /// Set the maximum value.
    pub fn value_max(mut self, value_max: i64) -> Self {
        self.value_max = Some(value_max);
        self
    }

    /// Replace the data.
    pub fn data(mut self, data: Map<String, Value>) -> Self {
        self.data = Some(data);
        self
    }

    /// Set the maximum runtime in seconds.
    pub fn max_runtime(mut self, seconds: i64) -> Self {
        self.max_runtime = Some(seconds);
        self
    }

    /// Set the stale timeout in seconds.
    pub fn stale_timeout(mut self, seconds: i64) -> Self {
        self.stale_timeout = Some(seconds);
        self
    }

    /// Add an action.
    pub fn action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    /// Add a tag.
    pub fn tag(mut self, namespace: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(namespace.into(), value.into());
        self
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
