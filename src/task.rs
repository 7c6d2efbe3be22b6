//! Task create/update protocol and the [`Task`] handle.
//!
//! All calls run inside the context's [`ReentrantSession`], so a burst of
//! calls nested in an outer session shares one HTTP client.
//!
//! [`ReentrantSession`]: crate::session::ReentrantSession

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;
use serde_json::{Map, Value};

use crate::api::TaskApi;
use crate::badger::Badger;
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::types::{Action, CreateTask, TaskPage, TaskRecord, TaskStatus, TaskUpdate};

impl Badger {
    fn call<T>(&self, f: impl FnOnce(&Settings, &dyn TaskApi) -> Result<T>) -> Result<T> {
        let settings = self.require_settings()?;
        let session = self.session().enter(&settings)?;
        f(&settings, session.api())
    }

    /// Create a task in this context. See [`create_task`].
    pub fn create_task(&self, name: &str, options: CreateTask) -> Result<Task> {
        let settings = self.require_settings()?;
        let payload = create_payload(name, &options, &self.scope().frame())?;
        let payload = settings
            .call_before_create(payload)
            .ok_or(Error::BeforeCreateRejected)?;
        let body = Value::Object(payload);

        tracing::debug!("creating task '{}'", name);
        self.call(|settings, api| {
            api.create(
                &settings.organization_slug,
                &settings.project_slug,
                &body,
                options.monitor_id.as_deref(),
            )?
            .parse()
            .map(Task::from_record)
        })
    }

    /// Update a task in this context. See [`update_task`].
    pub fn update_task(&self, task_id: &str, mut update: TaskUpdate) -> Result<Task> {
        if update.data.as_ref().is_some_and(Map::is_empty) {
            update.data = None;
        }
        let body = serde_json::to_value(&update)?;

        self.call(|settings, api| {
            api.partial_update(
                &settings.organization_slug,
                &settings.project_slug,
                task_id,
                &body,
            )?
            .parse()
            .map(Task::from_record)
        })
    }

    /// Fetch a task in this context. See [`get_task`].
    pub fn get_task(&self, task_id: &str) -> Result<Task> {
        self.call(|settings, api| {
            api.get(&settings.organization_slug, &settings.project_slug, task_id)?
                .parse()
                .map(Task::from_record)
        })
    }

    /// List tasks in this context. See [`list_tasks`].
    pub fn list_tasks(&self, page_size: Option<u32>, cursor: Option<&str>) -> Result<TaskPage> {
        self.call(|settings, api| {
            api.list(
                &settings.organization_slug,
                &settings.project_slug,
                cursor,
                page_size,
            )?
            .parse()
        })
    }
}

fn create_payload(
    name: &str,
    options: &CreateTask,
    scope: &crate::scope::ScopeFrame,
) -> Result<Map<String, Value>> {
    let mut payload = Map::new();
    payload.insert("name".into(), Value::from(name));
    payload.insert(
        "status".into(),
        Value::from(options.status.unwrap_or_default().as_str()),
    );
    if let Some(value) = options.value {
        payload.insert("value".into(), value.into());
    }
    if let Some(value_max) = options.value_max {
        payload.insert("value_max".into(), value_max.into());
    }
    if let Some(max_runtime) = options.max_runtime {
        payload.insert("max_runtime".into(), max_runtime.into());
    }
    if let Some(stale_timeout) = options.stale_timeout {
        payload.insert("stale_timeout".into(), stale_timeout.into());
    }

    let mut data = scope.data.clone();
    if let Some(own) = &options.data {
        data.extend(own.clone());
    }
    if !data.is_empty() {
        payload.insert("data".into(), Value::Object(data));
    }

    if !options.actions.is_empty() {
        payload.insert("actions".into(), serde_json::to_value(&options.actions)?);
    }

    let mut tags = scope.tags.clone();
    tags.extend(options.tags.clone());
    if !tags.is_empty() {
        payload.insert("tags".into(), serde_json::to_value(tags)?);
    }
    Ok(payload)
}

/// Create a task in the current context.
///
/// Scope data and tags are merged under the supplied ones, then the
/// `before_create` hook (if any) gets the final say.
///
/// # Errors
///
/// - [`Error::NotConfigured`] without bound settings.
/// - [`Error::BeforeCreateRejected`] if the hook vetoes the payload.
/// - [`Error::Unauthorized`], [`Error::ServerError`] or
///   [`Error::UnexpectedStatus`] for non-2xx responses.
///
/// # Examples
///
/// ```no_run
/// use taskbadger::{create_task, CreateTask, TaskStatus};
///
/// let mut task = create_task("nightly-export", CreateTask::new().value_max(100))?;
/// task.starting()?;
/// task.success(Some(100))?;
/// assert_eq!(task.status(), TaskStatus::Success);
/// # Ok::<(), taskbadger::Error>(())
/// ```
pub fn create_task(name: &str, options: CreateTask) -> Result<Task> {
    Badger::current().create_task(name, options)
}

/// Partially update a task in the current context.
///
/// Only fields set on `update` are sent. Empty `data` is not sent.
pub fn update_task(task_id: &str, update: TaskUpdate) -> Result<Task> {
    Badger::current().update_task(task_id, update)
}

/// Fetch a task by ID.
pub fn get_task(task_id: &str) -> Result<Task> {
    Badger::current().get_task(task_id)
}

/// List tasks in the configured project.
pub fn list_tasks(page_size: Option<u32>, cursor: Option<&str>) -> Result<TaskPage> {
    Badger::current().list_tasks(page_size, cursor)
}

/// Handle to a remote task.
///
/// Each method issues exactly one update and replaces the local record with
/// the server's response. Calls go through the calling thread's current
/// context.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    record: TaskRecord,
}

impl Task {
    /// Wrap a record returned by the API.
    pub fn from_record(record: TaskRecord) -> Self {
        Self { record }
    }

    /// Create a task. Same as [`create_task`].
    pub fn create(name: &str, options: CreateTask) -> Result<Self> {
        create_task(name, options)
    }

    /// Fetch a task. Same as [`get_task`].
    pub fn get(task_id: &str) -> Result<Self> {
        get_task(task_id)
    }

    /// Task ID.
    pub fn id(&self) -> &str {
        &self.record.id
    }

    /// Task name.
    pub fn name(&self) -> &str {
        &self.record.name
    }

    /// Last known status.
    pub fn status(&self) -> TaskStatus {
        self.record.status
    }

    /// Last known value.
    pub fn value(&self) -> Option<i64> {
        self.record.value
    }

    /// Last known data.
    pub fn data(&self) -> Option<&Map<String, Value>> {
        self.record.data.as_ref()
    }

    /// Last known tags.
    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.record.tags
    }

    /// The full record.
    pub fn record(&self) -> &TaskRecord {
        &self.record
    }

    /// Consume the handle, returning the record.
    pub fn into_record(self) -> TaskRecord {
        self.record
    }

    /// Set status `pre_processing`.
    pub fn pre_processing(&mut self) -> Result<()> {
        self.update_status(TaskStatus::PreProcessing)
    }

    /// Set status `processing` with value 0.
    pub fn starting(&mut self) -> Result<()> {
        self.processing(Some(0))
    }

    /// Set status `processing`.
    pub fn processing(&mut self, value: Option<i64>) -> Result<()> {
        self.update(
            TaskUpdate::new()
                .status(TaskStatus::Processing)
                .maybe_value(value),
        )
    }

    /// Set status `post_processing`.
    pub fn post_processing(&mut self, value: Option<i64>) -> Result<()> {
        self.update(
            TaskUpdate::new()
                .status(TaskStatus::PostProcessing)
                .maybe_value(value),
        )
    }

    /// Set status `success`.
    pub fn success(&mut self, value: Option<i64>) -> Result<()> {
        self.update(TaskUpdate::new().status(TaskStatus::Success).maybe_value(value))
    }

    /// Set status `error`, optionally replacing the data.
    pub fn error(&mut self, value: Option<i64>, data: Option<Map<String, Value>>) -> Result<()> {
        let mut update = TaskUpdate::new().status(TaskStatus::Error).maybe_value(value);
        update.data = data;
        self.update(update)
    }

    /// Set status `cancelled`.
    pub fn cancelled(&mut self) -> Result<()> {
        self.update_status(TaskStatus::Cancelled)
    }

    /// Set the status.
    pub fn update_status(&mut self, status: TaskStatus) -> Result<()> {
        self.update(TaskUpdate::new().status(status))
    }

    /// Set `value_max`.
    pub fn set_value_max(&mut self, value_max: i64) -> Result<()> {
        self.update(TaskUpdate::new().value_max(value_max))
    }

    /// Attach actions.
    pub fn add_actions(&mut self, actions: Vec<Action>) -> Result<()> {
        self.update(TaskUpdate {
            actions,
            ..TaskUpdate::default()
        })
    }

    /// Set tags.
    pub fn tag(&mut self, tags: BTreeMap<String, String>) -> Result<()> {
        self.update(TaskUpdate {
            tags,
            ..TaskUpdate::default()
        })
    }

    /// Add `amount` to the current value (unset counts as 0).
    pub fn increment_value(&mut self, amount: i64) -> Result<()> {
        let value = self.record.value.unwrap_or(0).saturating_add(amount);
        self.update(TaskUpdate::new().value(value))
    }

    /// Update the value, subject to optional throttles.
    ///
    /// With neither `value_step` nor `rate_limit` the update always goes
    /// out. Otherwise it goes out if the value moved by at least
    /// `value_step` since the last known value, or at least `rate_limit`
    /// has passed since the last known update. Returns whether an update
    /// was sent.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::time::Duration;
    /// use taskbadger::{create_task, CreateTask};
    ///
    /// let mut task = create_task("import", CreateTask::new().value_max(10_000))?;
    /// for row in 0..10_000 {
    ///     task.update_value(row, Some(500), Some(Duration::from_secs(5)))?;
    /// }
    /// # Ok::<(), taskbadger::Error>(())
    /// ```
    pub fn update_value(
        &mut self,
        value: i64,
        value_step: Option<i64>,
        rate_limit: Option<Duration>,
    ) -> Result<bool> {
        let value_step = value_step.filter(|step| *step != 0);
        let rate_limit = rate_limit.filter(|limit| !limit.is_zero());

        let unthrottled = value_step.is_none() && rate_limit.is_none();
        let time_due = rate_limit.is_some() && self.update_interval_elapsed(rate_limit);
        let value_due = value_step.is_some_and(|step| self.value_step_reached(value, step));

        if unthrottled || time_due || value_due {
            self.update(TaskUpdate::new().value(value))?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Send an empty update to show the task is alive.
    ///
    /// With `rate_limit` the ping is skipped (returning `false`) if the last
    /// known update is more recent than that.
    pub fn ping(&mut self, rate_limit: Option<Duration>) -> Result<bool> {
        if self.update_interval_elapsed(rate_limit) {
            self.update(TaskUpdate::new())?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Send `update`.
    pub fn update(&mut self, update: TaskUpdate) -> Result<()> {
        self.update_with(update, None)
    }

    /// Send `update`, first merging its data into the current data with
    /// `strategy`.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use serde_json::{json, Map};
    /// use taskbadger::{get_task, DefaultMergeStrategy, TaskUpdate};
    ///
    /// let mut task = get_task("57ae8eVBrH7jbDgmYj6Ut2vR9S")?;
    /// let stdout = DefaultMergeStrategy::new(["stdout"]);
    /// let mut data = Map::new();
    /// data.insert("stdout".into(), json!("line 1\n"));
    /// task.update_with(TaskUpdate::new().data(data), Some(&stdout))?;
    /// # Ok::<(), taskbadger::Error>(())
    /// ```
    pub fn update_with(
        &mut self,
        mut update: TaskUpdate,
        strategy: Option<&dyn MergeStrategy>,
    ) -> Result<()> {
        if let Some(strategy) = strategy {
            if let Some(data) = update.data.take_if(|data| !data.is_empty()) {
                update.data = Some(strategy.merge(self.record.data.clone(), data));
            }
        }
        let task = update_task(&self.record.id, update)?;
        self.record = task.record;
        Ok(())
    }

    /// [`update`](Self::update) that logs failures instead of returning them.
    pub fn safe_update(&mut self, update: TaskUpdate) {
        if let Err(e) = self.update(update) {
            tracing::warn!("Error updating task '{}': {}", self.record.id, e);
        }
    }

    fn update_interval_elapsed(&self, rate_limit: Option<Duration>) -> bool {
        match (rate_limit, self.record.updated) {
            (Some(limit), Some(updated)) if !limit.is_zero() => (Utc::now() - updated)
                .to_std()
                .is_ok_and(|elapsed| elapsed >= limit),
            _ => true,
        }
    }

    fn value_step_reached(&self, value: i64, step: i64) -> bool {
        match self.record.value {
            Some(current) if current != 0 => value.saturating_sub(current) >= step,
            _ => true,
        }
    }
}

/// Combines existing task data with new data before an update.
pub trait MergeStrategy {
    /// Produce the data to send.
    fn merge(
        &self,
        existing: Option<Map<String, Value>>,
        new: Map<String, Value>,
    ) -> Map<String, Value>;
}

/// Overwrites keys, except `append_keys`, which accumulate.
///
/// For an append key a truthy new value is appended to the existing one:
/// strings concatenate, arrays extend, numbers add. A falsy new value
/// (null, `false`, 0, empty string/array/object) leaves the old one. Other
/// keys are overwritten.
///
/// # Examples
///
/// ```
/// use serde_json::{json, Map, Value};
/// use taskbadger::{DefaultMergeStrategy, MergeStrategy};
///
/// let strategy = DefaultMergeStrategy::new(["stdout"]);
/// let first = json!({"stdout": "a"}).as_object().cloned().unwrap();
/// let second = json!({"stdout": "b"}).as_object().cloned().unwrap();
/// let merged = strategy.merge(Some(first), second);
/// assert_eq!(Value::Object(merged), json!({"stdout": "ab"}));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DefaultMergeStrategy {
    append_keys: Vec<String>,
}

impl DefaultMergeStrategy {
    /// Strategy appending to `append_keys`.
    pub fn new<I, S>(append_keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            append_keys: append_keys.into_iter().map(Into::into).collect(),
        }
    }

    /// Keys that accumulate.
    pub fn append_keys(&self) -> &[String] {
        &self.append_keys
    }
}

impl MergeStrategy for DefaultMergeStrategy {
    fn merge(
        &self,
        existing: Option<Map<String, Value>>,
        new: Map<String, Value>,
    ) -> Map<String, Value> {
        let mut data = existing.unwrap_or_default();
        for (key, value) in new {
            if !self.append_keys.contains(&key) {
                data.insert(key, value);
                continue;
            }
            if !is_truthy(&value) {
                continue;
            }
            let appended = match data.remove(&key) {
                Some(old) => append(old, value),
                None => value,
            };
            data.insert(key, appended);
        }
        data
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn append(old: Value, new: Value) -> Value {
    match (old, new) {
        (Value::String(mut old), Value::String(new)) => {
            old.push_str(&new);
            Value::String(old)
        },
        (Value::Array(mut old), Value::Array(new)) => {
            old.extend(new);
            Value::Array(old)
        },
        (Value::Number(old), Value::Number(new)) => match (old.as_i64(), new.as_i64()) {
            (Some(a), Some(b)) => a
                .checked_add(b)
                .map_or_else(|| Value::from(a as f64 + b as f64), Value::from),
            _ => Value::from(old.as_f64().unwrap_or(0.0) + new.as_f64().unwrap_or(0.0)),
        },
        (_, new) => new,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockConnector;
    use chrono::Duration as ChronoDuration;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn create_merges_scope() {
        let connector = MockConnector::new();
        let (badger, _guard) = connector.install();
        badger.scope().tag([("env", "test"), ("team", "core")]);

        let _frame = badger.scope().enter();
        badger.scope().set("b", 2);
        let task = create_task(
            "t",
            CreateTask::new()
                .data_entry("a", json!(1))
                .tag("team", "data"),
        )
        .unwrap();

        assert_eq!(task.name(), "t");
        assert_eq!(task.status(), TaskStatus::Pending);
        let calls = connector.api().calls_to("create");
        assert_eq!(
            calls[0].body,
            Some(json!({
                "name": "t",
                "status": "pending",
                "data": {"b": 2, "a": 1},
                "tags": {"env": "test", "team": "data"}
            }))
        );
    }

    #[test]
    fn create_without_scope_omits_data_and_tags() {
        let connector = MockConnector::new();
        let (_badger, _guard) = connector.install();
        create_task("t", CreateTask::new().monitor_id("m1")).unwrap();

        let call = &connector.api().calls_to("create")[0];
        assert_eq!(call.body, Some(json!({"name": "t", "status": "pending"})));
        assert_eq!(call.query["monitor_id"], "m1");
    }

    #[test]
    fn before_create_can_rewrite_or_veto() {
        let connector = MockConnector::new();
        let settings = connector.settings().with_before_create(|mut payload| {
            payload.insert("name".into(), json!("renamed"));
            Some(payload)
        });
        let (_badger, _guard) = connector.install_with(settings);
        let task = create_task("t", CreateTask::new()).unwrap();
        assert_eq!(task.name(), "renamed");

        let settings = connector.settings().with_before_create(|_| None);
        let (_badger, _guard) = connector.install_with(settings);
        let before = connector.api().calls().len();
        let err = create_task("t", CreateTask::new()).unwrap_err();
        assert!(matches!(err, Error::BeforeCreateRejected));
        assert_eq!(connector.api().calls().len(), before);
    }

    #[test]
    fn update_sends_only_supplied_fields() {
        let connector = MockConnector::new();
        let (_badger, _guard) = connector.install();
        let task = create_task("t", CreateTask::new()).unwrap();

        update_task(
            task.id(),
            TaskUpdate::new()
                .status(TaskStatus::Success)
                .value(100)
                .data(Map::new()),
        )
        .unwrap();

        let call = &connector.api().calls_to("partial_update")[0];
        assert_eq!(call.body, Some(json!({"status": "success", "value": 100})));
    }

    #[test]
    fn error_statuses_propagate() {
        let connector = MockConnector::new();
        let (_badger, _guard) = connector.install();

        connector.api().respond_next(401, "");
        assert!(matches!(
            create_task("t", CreateTask::new()),
            Err(Error::Unauthorized)
        ));

        connector.api().respond_next(500, "boom");
        assert!(matches!(
            update_task("x", TaskUpdate::new()),
            Err(Error::ServerError { status: 500, .. })
        ));

        assert!(matches!(
            get_task("missing"),
            Err(Error::UnexpectedStatus { status: 404, .. })
        ));
    }

    #[test]
    fn unconfigured_context_fails() {
        let _guard = Badger::install(std::rc::Rc::new(Badger::new(None)));
        assert!(matches!(
            create_task("t", CreateTask::new()),
            Err(Error::NotConfigured)
        ));
    }

    #[test]
    fn calls_share_outer_session() {
        let connector = MockConnector::new();
        let (badger, _guard) = connector.install();
        let settings = badger.settings().unwrap();
        {
            let _session = badger.session().enter(&settings).unwrap();
            let mut task = create_task("t", CreateTask::new()).unwrap();
            task.starting().unwrap();
            task.success(None).unwrap();
        }
        assert_eq!(connector.opened(), 1);
        assert_eq!(connector.closed(), 1);
    }

    #[test]
    fn convenience_transitions() {
        let connector = MockConnector::new();
        let (_badger, _guard) = connector.install();
        let mut task = create_task("t", CreateTask::new()).unwrap();

        task.pre_processing().unwrap();
        assert_eq!(task.status(), TaskStatus::PreProcessing);
        task.starting().unwrap();
        assert_eq!((task.status(), task.value()), (TaskStatus::Processing, Some(0)));
        task.post_processing(Some(90)).unwrap();
        assert_eq!(task.status(), TaskStatus::PostProcessing);
        task.set_value_max(200).unwrap();
        assert_eq!(task.record().value_max, Some(200));
        task.add_actions(vec![Action::email("error", "ops@example.com")]).unwrap();
        task.tag(BTreeMap::from([("k".to_string(), "v".to_string())])).unwrap();
        assert_eq!(task.tags()["k"], "v");
        task.cancelled().unwrap();
        assert_eq!(task.status(), TaskStatus::Cancelled);

        let bodies: Vec<_> = connector
            .api()
            .calls_to("partial_update")
            .into_iter()
            .map(|call| call.body.unwrap())
            .collect();
        assert_eq!(bodies[0], json!({"status": "pre_processing"}));
        assert_eq!(bodies[1], json!({"status": "processing", "value": 0}));
        assert_eq!(
            bodies[4],
            json!({"actions": [{
                "trigger": "error",
                "integration": "email",
                "config": {"to": "ops@example.com"}
            }]})
        );
    }

    #[test]
    fn increment_value_from_unset() {
        let connector = MockConnector::new();
        let (_badger, _guard) = connector.install();
        let mut task = create_task("t", CreateTask::new()).unwrap();
        task.increment_value(5).unwrap();
        task.increment_value(5).unwrap();
        assert_eq!(task.value(), Some(10));
    }

    #[test]
    fn update_value_step() {
        let connector = MockConnector::new();
        let (_badger, _guard) = connector.install();
        let mut task = create_task("t", CreateTask::new().value(10)).unwrap();

        assert!(!task.update_value(14, Some(5), None).unwrap());
        assert!(task.update_value(15, Some(5), None).unwrap());
        assert_eq!(task.value(), Some(15));
        assert!(task.update_value(16, None, None).unwrap());
        assert_eq!(connector.api().calls_to("partial_update").len(), 2);
    }

    #[test]
    fn update_value_rate_limit() {
        let connector = MockConnector::new();
        let (_badger, _guard) = connector.install();
        let task = create_task("t", CreateTask::new().value(10)).unwrap();

        let mut task = get_task(task.id()).unwrap();
        assert!(!task.update_value(11, None, Some(Duration::from_secs(60))).unwrap());
        // either throttle passing is enough
        assert!(task.update_value(100, Some(50), Some(Duration::from_secs(60))).unwrap());

        connector
            .api()
            .set_updated(task.id(), Utc::now() - ChronoDuration::seconds(120));
        let mut task = get_task(task.id()).unwrap();
        assert!(task.update_value(101, None, Some(Duration::from_secs(60))).unwrap());
    }

    #[test]
    fn ping_rate_limit() {
        let connector = MockConnector::new();
        let (_badger, _guard) = connector.install();
        let mut task = create_task("t", CreateTask::new()).unwrap();

        assert!(!task.ping(Some(Duration::from_secs(10))).unwrap());
        assert!(task.ping(None).unwrap());

        connector
            .api()
            .set_updated(task.id(), Utc::now() - ChronoDuration::seconds(11));
        let mut task = get_task(task.id()).unwrap();
        assert!(task.ping(Some(Duration::from_secs(10))).unwrap());
        let pings = connector.api().calls_to("partial_update");
        assert_eq!(pings.len(), 2);
        assert_eq!(pings[1].body, Some(json!({})));
    }

    #[test]
    fn update_with_merge_strategy() {
        let connector = MockConnector::new();
        let (_badger, _guard) = connector.install();
        let mut task =
            create_task("t", CreateTask::new().data_entry("stdout", json!("a"))).unwrap();
        let strategy = DefaultMergeStrategy::new(["stdout"]);

        task.update_with(
            TaskUpdate::new().data(object(json!({"stdout": "b", "rc": 0}))),
            Some(&strategy),
        )
        .unwrap();

        assert_eq!(
            Value::Object(task.data().cloned().unwrap()),
            json!({"stdout": "ab", "rc": 0})
        );
    }

    #[test]
    fn data_sent_without_merge_strategy() {
        let connector = MockConnector::new();
        let (_badger, _guard) = connector.install();
        let mut task = create_task("t", CreateTask::new()).unwrap();

        task.error(None, Some(object(json!({"reason": "disk full"})))).unwrap();
        task.update(TaskUpdate::new().data(object(json!({"retry": 2})))).unwrap();
        task.safe_update(TaskUpdate::new().data(object(json!({"retry": 3}))));

        let bodies: Vec<Value> = connector
            .api()
            .calls_to("partial_update")
            .into_iter()
            .filter_map(|call| call.body)
            .collect();
        assert_eq!(
            bodies,
            vec![
                json!({"status": "error", "data": {"reason": "disk full"}}),
                json!({"data": {"retry": 2}}),
                json!({"data": {"retry": 3}}),
            ]
        );
    }

    #[test]
    fn value_arithmetic_saturates() {
        let connector = MockConnector::new();
        let (_badger, _guard) = connector.install();
        let mut task = create_task("t", CreateTask::new().value(i64::MAX - 1)).unwrap();

        task.increment_value(10).unwrap();
        assert_eq!(task.value(), Some(i64::MAX));

        let mut task = create_task("t", CreateTask::new().value(i64::MAX)).unwrap();
        assert!(!task.update_value(i64::MIN, Some(1), None).unwrap());
    }

    #[test]
    fn safe_update_swallows_errors() {
        let connector = MockConnector::new();
        let (_badger, _guard) = connector.install();
        let mut task = create_task("t", CreateTask::new()).unwrap();
        connector.api().respond_next(503, "");
        task.safe_update(TaskUpdate::new().value(1));
        assert_eq!(task.value(), None);
    }

    #[test]
    fn list_passes_paging() {
        let connector = MockConnector::new();
        let (_badger, _guard) = connector.install();
        create_task("a", CreateTask::new()).unwrap();
        create_task("b", CreateTask::new()).unwrap();

        let page = list_tasks(Some(1), Some("c1")).unwrap();
        assert_eq!(page.results.len(), 1);
        let call = &connector.api().calls_to("list")[0];
        assert_eq!(call.query["cursor"], "c1");
        assert_eq!(call.query["page_size"], "1");
    }

    #[test]
    fn default_merge_rules() {
        let strategy = DefaultMergeStrategy::new(["out", "items", "count"]);
        let existing = object(json!({"out": "x", "items": [1], "count": 2, "other": "old"}));
        let merged = strategy.merge(
            Some(existing),
            object(json!({"out": "", "items": [2, 3], "count": 3, "other": "new", "fresh": "y"})),
        );
        assert_eq!(
            Value::Object(merged),
            json!({"out": "x", "items": [1, 2, 3], "count": 5, "other": "new", "fresh": "y"})
        );

        let merged = strategy.merge(None, object(json!({"out": "first", "count": 0})));
        assert_eq!(Value::Object(merged), json!({"out": "first"}));
    }
}
