//! In-memory [`TaskApi`] for tests.
//!
//! [`MockApi`] behaves like a tiny task server: creates assign IDs, partial
//! updates patch the stored record, and every call is recorded so tests can
//! assert on the exact request bodies. [`MockConnector`] hands out the same
//! `MockApi` and counts session opens and closes.

use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};

use crate::api::{ApiResponse, Connector, TaskApi};
use crate::badger::{Badger, ContextGuard};
use crate::config::Settings;
use crate::error::{Error, Result};

/// One call received by a [`MockApi`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    /// `create`, `partial_update`, `get` or `list`.
    pub method: &'static str,
    /// Target task, for per-task calls.
    pub task_id: Option<String>,
    /// Request body, for create and partial update.
    pub body: Option<Value>,
    /// Query parameters.
    pub query: BTreeMap<String, String>,
}

#[derive(Default)]
struct MockState {
    tasks: BTreeMap<String, Map<String, Value>>,
    next_id: usize,
    calls: Vec<RecordedCall>,
    queued: VecDeque<ApiResponse>,
}

/// Recording in-memory task server.
#[derive(Default)]
pub struct MockApi {
    state: Mutex<MockState>,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

impl std::fmt::Debug for MockApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockApi")
            .field("calls", &self.state.lock().calls.len())
            .finish()
    }
}

impl MockApi {
    /// Every call received so far.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().calls.clone()
    }

    /// Calls with the given method.
    pub fn calls_to(&self, method: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.method == method)
            .collect()
    }

    /// Forget recorded calls.
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// The stored record for `task_id`.
    pub fn task(&self, task_id: &str) -> Option<Value> {
        self.state
            .lock()
            .tasks
            .get(task_id)
            .map(|task| Value::Object(task.clone()))
    }

    /// Store a record directly. `record` must contain an `id`.
    pub fn insert_task(&self, record: Value) {
        if let Value::Object(record) = record {
            if let Some(id) = record.get("id").and_then(Value::as_str) {
                let id = id.to_string();
                self.state.lock().tasks.insert(id, record);
            }
        }
    }

    /// Overwrite a stored record's `updated` timestamp.
    pub fn set_updated(&self, task_id: &str, updated: DateTime<Utc>) {
        if let Some(task) = self.state.lock().tasks.get_mut(task_id) {
            task.insert("updated".into(), json!(updated.to_rfc3339()));
        }
    }

    /// Answer the next call with `status` and `body` instead of the store.
    pub fn respond_next(&self, status: u16, body: impl Into<Vec<u8>>) {
        self.state
            .lock()
            .queued
            .push_back(ApiResponse::new(status, body));
    }

    fn record(&self, call: RecordedCall) -> Option<ApiResponse> {
        let mut state = self.state.lock();
        state.calls.push(call);
        state.queued.pop_front()
    }
}

fn ok(status: u16, body: &Value) -> Result<ApiResponse> {
    Ok(ApiResponse::new(status, serde_json::to_vec(body)?))
}

fn not_found() -> Result<ApiResponse> {
    ok(404, &json!({"detail": "Not found."}))
}

impl TaskApi for MockApi {
    fn create(
        &self,
        organization: &str,
        project: &str,
        body: &Value,
        monitor_id: Option<&str>,
    ) -> Result<ApiResponse> {
        let query = monitor_id
            .map(|id| BTreeMap::from([("monitor_id".to_string(), id.to_string())]))
            .unwrap_or_default();
        if let Some(response) = self.record(RecordedCall {
            method: "create",
            task_id: None,
            body: Some(body.clone()),
            query,
        }) {
            return Ok(response);
        }

        let mut state = self.state.lock();
        state.next_id += 1;
        let id = format!("task-{}", state.next_id);
        let now = json!(Utc::now().to_rfc3339());
        let mut record = body.as_object().cloned().unwrap_or_default();
        record.insert("id".into(), json!(id));
        record.insert("organization".into(), json!(organization));
        record.insert("project".into(), json!(project));
        record.entry("status").or_insert(json!("pending"));
        record.insert("created".into(), now.clone());
        record.insert("updated".into(), now);
        state.tasks.insert(id, record.clone());
        ok(201, &Value::Object(record))
    }

    fn partial_update(
        &self,
        _organization: &str,
        _project: &str,
        task_id: &str,
        body: &Value,
    ) -> Result<ApiResponse> {
        if let Some(response) = self.record(RecordedCall {
            method: "partial_update",
            task_id: Some(task_id.to_string()),
            body: Some(body.clone()),
            query: BTreeMap::new(),
        }) {
            return Ok(response);
        }

        let mut state = self.state.lock();
        let Some(record) = state.tasks.get_mut(task_id) else {
            return not_found();
        };
        if let Value::Object(changes) = body {
            for (key, value) in changes {
                record.insert(key.clone(), value.clone());
            }
        }
        record.insert("updated".into(), json!(Utc::now().to_rfc3339()));
        ok(200, &Value::Object(record.clone()))
    }

    fn get(&self, _organization: &str, _project: &str, task_id: &str) -> Result<ApiResponse> {
        if let Some(response) = self.record(RecordedCall {
            method: "get",
            task_id: Some(task_id.to_string()),
            body: None,
            query: BTreeMap::new(),
        }) {
            return Ok(response);
        }

        match self.state.lock().tasks.get(task_id) {
            Some(record) => ok(200, &Value::Object(record.clone())),
            None => not_found(),
        }
    }

    fn list(
        &self,
        _organization: &str,
        _project: &str,
        cursor: Option<&str>,
        page_size: Option<u32>,
    ) -> Result<ApiResponse> {
        let mut query = BTreeMap::new();
        if let Some(cursor) = cursor {
            query.insert("cursor".to_string(), cursor.to_string());
        }
        if let Some(page_size) = page_size {
            query.insert("page_size".to_string(), page_size.to_string());
        }
        if let Some(response) = self.record(RecordedCall {
            method: "list",
            task_id: None,
            body: None,
            query,
        }) {
            return Ok(response);
        }

        let state = self.state.lock();
        let results: Vec<Value> = state
            .tasks
            .values()
            .take(page_size.map_or(usize::MAX, |size| size as usize))
            .cloned()
            .map(Value::Object)
            .collect();
        ok(200, &json!({"next": null, "previous": null, "results": results}))
    }

    fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Connector that always hands out one shared [`MockApi`].
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    api: Arc<MockApi>,
    fail: bool,
}

impl MockConnector {
    /// A connector over a fresh [`MockApi`].
    pub fn new() -> Self {
        Self::default()
    }

    /// A connector whose `connect` always fails.
    pub fn failing() -> Self {
        Self {
            api: Arc::default(),
            fail: true,
        }
    }

    /// The shared mock server.
    pub fn api(&self) -> &MockApi {
        &self.api
    }

    /// Number of successful connects.
    pub fn opened(&self) -> usize {
        self.api.opened.load(Ordering::SeqCst)
    }

    /// Number of closes.
    pub fn closed(&self) -> usize {
        self.api.closed.load(Ordering::SeqCst)
    }

    /// Settings for `org`/`proj` that connect through this connector.
    pub fn settings(&self) -> Settings {
        Settings::new("http://taskbadger.test", "token", "org", "proj")
            .with_connector(Arc::new(self.clone()))
    }

    /// Install a fresh context bound to `settings` as the current one.
    pub fn install_with(&self, settings: Settings) -> (Rc<Badger>, ContextGuard) {
        let context = Rc::new(Badger::new(Some(Arc::new(settings))));
        let guard = Badger::install(context.clone());
        (context, guard)
    }

    /// Install a fresh context bound to [`settings`](Self::settings).
    pub fn install(&self) -> (Rc<Badger>, ContextGuard) {
        self.install_with(self.settings())
    }
}

impl Connector for MockConnector {
    fn connect(&self, _settings: &Settings) -> Result<Arc<dyn TaskApi>> {
        if self.fail {
            return Err(Error::Transport("connection refused".to_string()));
        }
        self.api.opened.fetch_add(1, Ordering::SeqCst);
        Ok(self.api.clone())
    }
}
