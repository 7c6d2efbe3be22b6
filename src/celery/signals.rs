//! Job lifecycle signals and the Task Badger handler.
//!
//! A worker framework calls [`SignalDispatcher`] at the five lifecycle
//! points; [`TaskBadgerSignals`] turns those into task creates and updates.
//! Every path is fail-open: errors are logged and the job carries on.

use std::fmt::{self, Display};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Map, Value};

use super::cache::TaskCache;
use super::job::{JobRegistry, JobRequest, PublishedJob};
use super::policy::CelerySystemIntegration;
use super::{TB_KWARGS, TB_RECORD_TASK_ARGS, TB_TASK_ID, TB_TRACK};
use crate::badger::Badger;
use crate::config::Settings;
use crate::safe::{create_safe, get_safe, update_safe};
use crate::task::{DefaultMergeStrategy, MergeStrategy, Task};
use crate::types::{CreateTask, TaskStatus, TaskUpdate};

/// Receiver for job lifecycle signals. Every method defaults to a no-op.
pub trait JobSignals: Send + Sync {
    /// A message is about to be published.
    fn before_publish(&self, _job: &mut PublishedJob) {}

    /// A worker is about to run the job body.
    fn prerun(&self, _job: &mut JobRequest) {}

    /// The job body returned successfully.
    fn success(&self, _job: &mut JobRequest) {}

    /// The job body failed.
    fn failure(&self, _job: &mut JobRequest, _error: &dyn Display) {}

    /// The job asked to be retried.
    fn retry(&self, _job: &mut JobRequest, _reason: &dyn Display) {}
}

/// Ordered set of [`JobSignals`] receivers.
#[derive(Clone, Default)]
pub struct SignalDispatcher {
    receivers: Vec<Arc<dyn JobSignals>>,
}

impl fmt::Debug for SignalDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalDispatcher")
            .field("count", &self.receivers.len())
            .finish()
    }
}

impl SignalDispatcher {
    /// Dispatcher with no receivers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatcher with a [`TaskBadgerSignals`] receiver over `registry`.
    pub fn with_taskbadger(registry: JobRegistry) -> Self {
        let mut dispatcher = Self::new();
        dispatcher.connect(Arc::new(TaskBadgerSignals::new(registry)));
        dispatcher
    }

    /// Add a receiver.
    pub fn connect(&mut self, receiver: Arc<dyn JobSignals>) {
        self.receivers.push(receiver);
    }

    /// Number of receivers.
    pub fn len(&self) -> usize {
        self.receivers.len()
    }

    /// Whether there are no receivers.
    pub fn is_empty(&self) -> bool {
        self.receivers.is_empty()
    }

    /// Send `before_publish`.
    pub fn before_publish(&self, job: &mut PublishedJob) {
        for receiver in &self.receivers {
            receiver.before_publish(job);
        }
    }

    /// Send `prerun`.
    pub fn prerun(&self, job: &mut JobRequest) {
        for receiver in &self.receivers {
            receiver.prerun(job);
        }
    }

    /// Send `success`.
    pub fn success(&self, job: &mut JobRequest) {
        for receiver in &self.receivers {
            receiver.success(job);
        }
    }

    /// Send `failure`.
    pub fn failure(&self, job: &mut JobRequest, error: &dyn Display) {
        for receiver in &self.receivers {
            receiver.failure(job, error);
        }
    }

    /// Send `retry`.
    pub fn retry(&self, job: &mut JobRequest, reason: &dyn Display) {
        for receiver in &self.receivers {
            receiver.retry(job, reason);
        }
    }
}

/// Creates and updates tasks from job signals.
///
/// Publishing creates a `pending` task and stamps its ID into the message
/// headers. On the worker the task moves to `processing`, then to `success`
/// or `error`. A task already in a terminal state (for instance finalized
/// by the job body) is left alone. Map/starmap canvases, which are not
/// seen at publish time, get their task created at prerun.
///
/// Each job attempt holds the worker context's session from its first
/// network call until completion.
#[derive(Debug)]
pub struct TaskBadgerSignals {
    registry: JobRegistry,
    cache: Mutex<TaskCache>,
}

impl TaskBadgerSignals {
    /// Handler using `registry` for job definitions.
    pub fn new(registry: JobRegistry) -> Self {
        Self::with_cache(registry, TaskCache::default())
    }

    /// Handler with a custom cache.
    pub fn with_cache(registry: JobRegistry, cache: TaskCache) -> Self {
        Self {
            registry,
            cache: Mutex::new(cache),
        }
    }

    /// Number of cached task mirrors.
    pub fn cached_tasks(&self) -> usize {
        self.cache.lock().len()
    }

    fn tracked_by_definition(&self, name: &str) -> bool {
        self.registry
            .get(name)
            .is_some_and(|definition| definition.is_tracked())
    }

    fn maybe_create(&self, job: &mut JobRequest) {
        if job.taskbadger_task_id().is_some() {
            return;
        }
        // Outside canvases, only jobs marked at enqueue time are created here.
        if job.canvas.is_none()
            && (job.name.starts_with("celery.") || !is_truthy(job.headers.get(TB_TRACK)))
        {
            return;
        }

        let badger = Badger::current();
        let Some(settings) = badger.settings() else {
            return;
        };
        let celery = celery_system(&settings);

        let (name, tracked_name, data) = match &job.canvas {
            Some(canvas) => {
                let inner = canvas.inner.clone().unwrap_or_else(|| job.name.clone());
                let count = canvas.items.len();
                let mut data = Map::new();
                data.insert("canvas_type".into(), json!(job.name));
                data.insert("item_count".into(), json!(count));
                if celery.is_some_and(CelerySystemIntegration::records_task_args) {
                    data.insert("celery_task_items".into(), Value::Array(canvas.items.clone()));
                }
                (format!("{inner} ({} {count})", canvas.kind), inner, Some(data))
            },
            None => (job.name.clone(), job.name.clone(), None),
        };

        let auto_track = celery.is_some_and(|celery| celery.track_task(&tracked_name));
        if !auto_track && !self.tracked_by_definition(&tracked_name) {
            return;
        }

        self.enter_session(&badger, &settings, job);
        let mut options = CreateTask::new().status(TaskStatus::Pending);
        options.data = data;
        if let Some(task) = create_safe(&badger, &name, options) {
            job.tracking.task_id = Some(task.id().to_string());
            self.cache.lock().set(task);
        }
    }

    fn update(&self, job: &mut JobRequest, status: TaskStatus, error: Option<&dyn Display>) {
        let Some(task_id) = job.taskbadger_task_id() else {
            return;
        };
        let badger = Badger::current();
        let Some(settings) = badger.settings() else {
            return;
        };

        tracing::debug!("job '{}' ({}): task {} -> {}", job.name, job.id, task_id, status);
        let Some(task) = job
            .tracking
            .task
            .clone()
            .or_else(|| self.cached_or_fetch(&badger, &task_id))
        else {
            return;
        };
        if task.status().is_terminal() {
            return;
        }

        self.enter_session(&badger, &settings, job);
        let mut update = TaskUpdate::new().status(status);
        if let Some(error) = error {
            let mut exception = Map::new();
            exception.insert("exception".into(), json!(error.to_string()));
            update.data =
                Some(DefaultMergeStrategy::default().merge(task.data().cloned(), exception));
        }
        if let Some(task) = update_safe(&badger, &task_id, update) {
            job.tracking.task = Some(task.clone());
            self.cache.lock().set(task);
        }
    }

    fn cached_or_fetch(&self, badger: &Badger, task_id: &str) -> Option<Task> {
        let cached = self.cache.lock().get(task_id);
        if cached.is_some() {
            return cached;
        }
        let task = get_safe(badger, task_id)?;
        self.cache.lock().set(task.clone());
        Some(task)
    }

    fn enter_session(&self, badger: &Badger, settings: &Settings, job: &mut JobRequest) {
        if job.tracking.session_held {
            return;
        }
        match badger.session().acquire(settings) {
            Ok(_) => job.tracking.session_held = true,
            Err(e) => tracing::warn!("Error opening session for job '{}': {}", job.id, e),
        }
    }

    fn finish(&self, job: &mut JobRequest) {
        if let Some(task_id) = job.taskbadger_task_id() {
            let mut cache = self.cache.lock();
            cache.unset(&task_id);
            cache.prune();
        }
        if job.tracking.session_held {
            job.tracking.session_held = false;
            Badger::current().session().release();
        }
    }
}

impl JobSignals for TaskBadgerSignals {
    fn before_publish(&self, job: &mut PublishedJob) {
        let header_options = job.headers.remove(TB_KWARGS);
        if job.name.starts_with("celery.") {
            return;
        }
        let badger = Badger::current();
        let Some(settings) = badger.settings() else {
            return;
        };
        let celery = celery_system(&settings);

        let auto_track = celery.is_some_and(|celery| celery.track_task(&job.name));
        if !auto_track && !is_truthy(job.headers.get(TB_TRACK)) {
            return;
        }

        let mut options = self
            .registry
            .get(&job.name)
            .map(|definition| definition.options().clone())
            .unwrap_or_default();
        if let Some(Value::Object(header_options)) = header_options {
            options.extend(header_options);
        }
        options.remove("record_task_args");
        let name = match options.remove("name") {
            Some(Value::String(name)) => name,
            _ => job.name.clone(),
        };

        let mut create: CreateTask = match serde_json::from_value(Value::Object(options)) {
            Ok(create) => create,
            Err(e) => {
                tracing::error!("Invalid task options for job '{}': {}", name, e);
                return;
            },
        };
        create.status = Some(TaskStatus::Pending);

        let record_args = job
            .headers
            .get(TB_RECORD_TASK_ARGS)
            .and_then(Value::as_bool)
            .unwrap_or_else(|| celery.is_some_and(CelerySystemIntegration::records_task_args));
        if record_args {
            let data = create.data.get_or_insert_with(Map::new);
            data.insert("celery_task_args".into(), Value::Array(job.args.clone()));
            data.insert("celery_task_kwargs".into(), Value::Object(job.kwargs.clone()));
        }

        if let Some(task) = create_safe(&badger, &name, create) {
            job.headers.insert(TB_TASK_ID.into(), json!(task.id()));
            job.result_meta.insert(TB_TASK_ID.into(), json!(task.id()));
        }
    }

    fn prerun(&self, job: &mut JobRequest) {
        self.maybe_create(job);
        self.update(job, TaskStatus::Processing, None);
    }

    fn success(&self, job: &mut JobRequest) {
        self.update(job, TaskStatus::Success, None);
        self.finish(job);
    }

    fn failure(&self, job: &mut JobRequest, error: &dyn Display) {
        self.update(job, TaskStatus::Error, Some(error));
        self.finish(job);
    }

    // The retried attempt is a new message, so it gets its own task.
    fn retry(&self, job: &mut JobRequest, reason: &dyn Display) {
        self.update(job, TaskStatus::Error, Some(reason));
        self.finish(job);
    }
}

fn celery_system(settings: &Settings) -> Option<&CelerySystemIntegration> {
    settings.system::<CelerySystemIntegration>(CelerySystemIntegration::IDENTIFIER)
}

fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}
