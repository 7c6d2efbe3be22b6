//! Job handles passed to the signal handlers.
//!
//! These mirror what a Celery-protocol framework knows about a job at each
//! point of its life: the message being published, and the request a worker
//! executes. Tracking state lives in a [`JobTracking`] value on the request
//! rather than in ad-hoc request attributes.

use std::collections::HashMap;
use std::fmt;

use serde_json::{Map, Value};

use super::TB_TASK_ID;
use crate::badger::Badger;
use crate::safe::get_safe;
use crate::task::Task;

/// A job type known to the worker.
///
/// `options` are static create-task options (`value_max`, `data`, `tags`,
/// `name`, ...) applied to every tracked invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobDefinition {
    name: String,
    tracked: bool,
    options: Map<String, Value>,
}

impl JobDefinition {
    /// An untracked job definition.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tracked: false,
            options: Map::new(),
        }
    }

    /// Track every invocation regardless of the auto-track policy.
    pub fn tracked(mut self) -> Self {
        self.tracked = true;
        self
    }

    /// Add a static create-task option.
    pub fn option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }

    /// Job name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the job opted into tracking.
    pub fn is_tracked(&self) -> bool {
        self.tracked
    }

    /// Static create-task options.
    pub fn options(&self) -> &Map<String, Value> {
        &self.options
    }
}

/// Job definitions by name.
#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
    jobs: HashMap<String, JobDefinition>,
}

impl JobRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a definition.
    pub fn register(&mut self, definition: impl Into<JobDefinition>) -> &mut Self {
        let definition = definition.into();
        self.jobs.insert(definition.name.clone(), definition);
        self
    }

    /// Definition for `name`.
    pub fn get(&self, name: &str) -> Option<&JobDefinition> {
        self.jobs.get(name)
    }
}

/// A message about to be published.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishedJob {
    /// Job name.
    pub name: String,
    /// Job (message) ID.
    pub id: String,
    /// Positional arguments.
    pub args: Vec<Value>,
    /// Keyword arguments.
    pub kwargs: Map<String, Value>,
    /// Message headers; they travel with the message to the worker.
    pub headers: Map<String, Value>,
    /// Remaining call options (countdown, queue, ...).
    pub options: Map<String, Value>,
    /// Metadata stored on the result before the job runs.
    pub result_meta: Map<String, Value>,
}

impl PublishedJob {
    /// A message with no arguments.
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            ..Self::default()
        }
    }

    /// The tracked task ID assigned while publishing.
    pub fn taskbadger_task_id(&self) -> Option<&str> {
        self.result_meta
            .get(TB_TASK_ID)
            .or_else(|| self.headers.get(TB_TASK_ID))
            .and_then(Value::as_str)
    }
}

/// Fan-out canvas primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanvasKind {
    /// `celery.map`: one argument per item.
    Map,
    /// `celery.starmap`: items are argument lists.
    StarMap,
}

impl CanvasKind {
    /// The job name the canvas runs under.
    pub fn job_name(&self) -> &'static str {
        match self {
            Self::Map => "celery.map",
            Self::StarMap => "celery.starmap",
        }
    }

    /// Parse a canvas job name.
    pub fn from_job_name(name: &str) -> Option<Self> {
        match name {
            "celery.map" => Some(Self::Map),
            "celery.starmap" => Some(Self::StarMap),
            _ => None,
        }
    }
}

impl fmt::Display for CanvasKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Map => f.write_str("map"),
            Self::StarMap => f.write_str("starmap"),
        }
    }
}

/// A map/starmap over `items`, invoking `inner` once per item.
#[derive(Debug, Clone, PartialEq)]
pub struct Canvas {
    /// Canvas primitive.
    pub kind: CanvasKind,
    /// Name of the job invoked per item, if known.
    pub inner: Option<String>,
    /// Items (or argument lists) to fan out over.
    pub items: Vec<Value>,
}

/// Per-job tracking state carried on a [`JobRequest`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobTracking {
    /// Task created on the worker (canvas or eager execution).
    pub task_id: Option<String>,
    /// Latest known mirror of the tracked task.
    pub task: Option<Task>,
    pub(crate) session_held: bool,
}

/// A job as seen by the worker executing it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobRequest {
    /// Job name.
    pub name: String,
    /// Job (message) ID.
    pub id: String,
    /// Positional arguments.
    pub args: Vec<Value>,
    /// Keyword arguments.
    pub kwargs: Map<String, Value>,
    /// Message headers as received.
    pub headers: Map<String, Value>,
    /// Set for map/starmap canvas jobs.
    pub canvas: Option<Canvas>,
    /// Tracking state.
    pub tracking: JobTracking,
}

impl JobRequest {
    /// A request with no arguments or headers.
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            ..Self::default()
        }
    }

    /// The request a worker receives for `job`.
    pub fn from_published(job: &PublishedJob) -> Self {
        Self {
            name: job.name.clone(),
            id: job.id.clone(),
            args: job.args.clone(),
            kwargs: job.kwargs.clone(),
            headers: job.headers.clone(),
            ..Self::default()
        }
    }

    /// A map/starmap canvas request invoking `inner` over `items`.
    pub fn canvas(
        kind: CanvasKind,
        id: impl Into<String>,
        inner: impl Into<String>,
        items: Vec<Value>,
    ) -> Self {
        Self {
            name: kind.job_name().to_string(),
            id: id.into(),
            canvas: Some(Canvas {
                kind,
                inner: Some(inner.into()),
                items,
            }),
            ..Self::default()
        }
    }

    /// Set message headers.
    pub fn with_headers(mut self, headers: Map<String, Value>) -> Self {
        self.headers = headers;
        self
    }

    /// The tracked task ID, from tracking state or the message headers.
    pub fn taskbadger_task_id(&self) -> Option<String> {
        self.tracking.task_id.clone().or_else(|| {
            self.headers
                .get(TB_TASK_ID)
                .and_then(Value::as_str)
                .map(str::to_string)
        })
    }

    /// The tracked task, fetched on first access.
    ///
    /// Updates made through the returned handle are seen by the later
    /// signal handlers, so a job body may finalize its own task.
    pub fn taskbadger_task(&mut self) -> Option<&mut Task> {
        if self.tracking.task.is_none() {
            let task_id = self.taskbadger_task_id()?;
            tracing::debug!("Fetching task '{}'", task_id);
            self.tracking.task = get_safe(&Badger::current(), &task_id);
        }
        self.tracking.task.as_mut()
    }
}
