//! Enqueue-side wrapper for jobs that opt into tracking.

use serde_json::{Map, Value};

use super::job::{JobDefinition, PublishedJob};
use super::{KWARG_PREFIX, TB_KWARGS, TB_RECORD_TASK_ARGS, TB_TASK_ID, TB_TRACK};
use crate::badger::Badger;
use crate::error::Result;
use crate::task::{get_task, Task};

/// A job that tracks itself.
///
/// [`prepare`](Self::prepare) pulls `taskbadger_*` options out of the call
/// options and job kwargs and turns them into message headers, which the
/// publish handler then uses to create the task.
///
/// # Examples
///
/// ```
/// use serde_json::{json, Map};
/// use taskbadger::celery::TrackedJob;
///
/// let job = TrackedJob::new("reports.generate").option("value_max", json!(100));
/// let mut kwargs = Map::new();
/// kwargs.insert("report_id".into(), json!(7));
/// kwargs.insert("taskbadger_name".into(), json!("Report 7"));
///
/// let message = job.prepare("msg-1", vec![], kwargs, Map::new());
/// assert_eq!(message.kwargs.len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedJob {
    definition: JobDefinition,
}

impl TrackedJob {
    /// A tracked job named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            definition: JobDefinition::new(name).tracked(),
        }
    }

    /// Add a static create-task option.
    pub fn option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.definition = self.definition.option(key, value);
        self
    }

    /// The job definition, for registering with the worker.
    pub fn definition(&self) -> &JobDefinition {
        &self.definition
    }

    /// Build the message for one invocation.
    ///
    /// Tracking headers are only added when the calling context is
    /// configured.
    pub fn prepare(
        &self,
        id: impl Into<String>,
        args: Vec<Value>,
        mut kwargs: Map<String, Value>,
        mut options: Map<String, Value>,
    ) -> PublishedJob {
        let mut tb_options = take_options(&mut options);
        tb_options.extend(take_options(&mut kwargs));

        let mut headers = match options.remove("headers") {
            Some(Value::Object(headers)) => headers,
            _ => Map::new(),
        };
        if Badger::current().is_configured() {
            headers.insert(TB_TRACK.into(), Value::Bool(true));
            if let Some(record) = tb_options.remove("record_task_args") {
                headers.insert(TB_RECORD_TASK_ARGS.into(), record);
            }
            headers.insert(TB_KWARGS.into(), Value::Object(tb_options));
        }

        PublishedJob {
            name: self.definition.name().to_string(),
            id: id.into(),
            args,
            kwargs,
            headers,
            options,
            result_meta: Map::new(),
        }
    }
}

impl From<&TrackedJob> for JobDefinition {
    fn from(job: &TrackedJob) -> Self {
        job.definition.clone()
    }
}

impl From<TrackedJob> for JobDefinition {
    fn from(job: TrackedJob) -> Self {
        job.definition
    }
}

fn take_options(map: &mut Map<String, Value>) -> Map<String, Value> {
    let mut taken = match map.remove(TB_KWARGS) {
        Some(Value::Object(options)) => options,
        _ => Map::new(),
    };
    let keys: Vec<String> = map
        .keys()
        .filter(|key| key.starts_with(KWARG_PREFIX))
        .cloned()
        .collect();
    for key in keys {
        if let Some(value) = map.remove(&key) {
            taken.insert(key[KWARG_PREFIX.len()..].to_string(), value);
        }
    }
    taken
}

/// What the caller gets back after enqueueing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnqueueHandle {
    /// Job (message) ID.
    pub job_id: String,
    taskbadger_task_id: Option<String>,
}

impl EnqueueHandle {
    /// Handle for a message that went through the publish signal.
    pub fn from_published(job: &PublishedJob) -> Self {
        Self {
            job_id: job.id.clone(),
            taskbadger_task_id: job
                .result_meta
                .get(TB_TASK_ID)
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }

    /// ID of the tracked task, if one was created.
    pub fn taskbadger_task_id(&self) -> Option<&str> {
        self.taskbadger_task_id.as_deref()
    }

    /// Fetch the tracked task.
    pub fn taskbadger_task(&self) -> Result<Option<Task>> {
        self.taskbadger_task_id
            .as_deref()
            .map(get_task)
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::celery::signals::{JobSignals, TaskBadgerSignals};
    use crate::celery::JobRegistry;
    use crate::testing::MockConnector;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::rc::Rc;

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn prepare_moves_options_into_headers() {
        let connector = MockConnector::new();
        let (_badger, _guard) = connector.install();
        let job = TrackedJob::new("tasks.add");

        let message = job.prepare(
            "m1",
            vec![json!(1), json!(2)],
            object(json!({"x": 1, "taskbadger_value_max": 10})),
            object(json!({
                "countdown": 5,
                "taskbadger_kwargs": {"data": {"foo": "bar"}},
                "taskbadger_record_task_args": true
            })),
        );

        assert_eq!(message.kwargs, object(json!({"x": 1})));
        assert_eq!(message.options, object(json!({"countdown": 5})));
        assert_eq!(
            Value::Object(message.headers),
            json!({
                "taskbadger_track": true,
                "taskbadger_record_task_args": true,
                "taskbadger_kwargs": {"data": {"foo": "bar"}, "value_max": 10}
            })
        );
    }

    #[test]
    fn unconfigured_prepare_adds_no_headers() {
        let _guard = Badger::install(Rc::new(Badger::new(None)));
        let message = TrackedJob::new("tasks.add").prepare(
            "m1",
            Vec::new(),
            object(json!({"taskbadger_name": "x"})),
            Map::new(),
        );
        assert!(message.headers.is_empty());
        assert!(message.kwargs.is_empty());
    }

    #[test]
    fn handle_exposes_tracked_task() {
        let connector = MockConnector::new();
        let (_badger, _guard) = connector.install();
        let job = TrackedJob::new("tasks.add");
        let mut registry = JobRegistry::new();
        registry.register(&job);
        let signals = TaskBadgerSignals::new(registry);

        let mut message = job.prepare(
            "m1",
            Vec::new(),
            object(json!({"taskbadger_name": "Adding"})),
            Map::new(),
        );
        signals.before_publish(&mut message);
        let handle = EnqueueHandle::from_published(&message);

        let task = handle.taskbadger_task().unwrap().unwrap();
        assert_eq!(Some(task.id()), handle.taskbadger_task_id());
        assert_eq!(task.name(), "Adding");
        assert_eq!(handle.job_id, "m1");

        assert_eq!(EnqueueHandle::default().taskbadger_task().unwrap(), None);
    }
}
