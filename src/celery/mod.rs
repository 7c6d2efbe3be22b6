//! Automatic tracking for Celery-protocol job workers.
//!
//! The host framework reports job lifecycle events to a
//! [`SignalDispatcher`]; the [`TaskBadgerSignals`] receiver keeps a remote
//! task in step with each job:
//!
//! | Signal           | Effect                                              |
//! |------------------|-----------------------------------------------------|
//! | `before_publish` | create a `pending` task, stamp its ID into headers  |
//! | `prerun`         | create canvas tasks; move to `processing`           |
//! | `success`        | move to `success`                                   |
//! | `failure`        | move to `error` with `data.exception`               |
//! | `retry`          | same as `failure`                                   |
//!
//! Which jobs are tracked is decided by [`CelerySystemIntegration`]
//! (registered on [`Settings`](crate::Settings)) and by jobs that opt in
//! through [`TrackedJob`].
//!
//! # Examples
//!
//! ```
//! use taskbadger::celery::{
//!     CelerySystemIntegration, EnqueueHandle, JobRegistry, JobRequest, SignalDispatcher,
//!     TrackedJob,
//! };
//! use taskbadger::Settings;
//!
//! let _settings = Settings::new("https://taskbadger.net", "token", "org", "proj")
//!     .with_system(CelerySystemIntegration::new().excludes([r"myapp\.tasks\.ping"]));
//!
//! let export = TrackedJob::new("myapp.tasks.export");
//! let mut registry = JobRegistry::new();
//! registry.register(&export);
//! let signals = SignalDispatcher::with_taskbadger(registry);
//!
//! // Producer side
//! let mut message = export.prepare("msg-1", vec![], Default::default(), Default::default());
//! signals.before_publish(&mut message);
//! let handle = EnqueueHandle::from_published(&message);
//!
//! // Worker side
//! let mut request = JobRequest::from_published(&message);
//! signals.prerun(&mut request);
//! signals.success(&mut request);
//! # let _ = handle;
//! ```

mod cache;
mod enqueue;
mod job;
mod policy;
mod signals;

pub use cache::{TaskCache, DEFAULT_CACHE_SIZE};
pub use enqueue::{EnqueueHandle, TrackedJob};
pub use job::{
    Canvas, CanvasKind, JobDefinition, JobRegistry, JobRequest, JobTracking, PublishedJob,
};
pub use policy::{CelerySystemIntegration, TaskPattern};
pub use signals::{JobSignals, SignalDispatcher, TaskBadgerSignals};

/// Prefix of per-call tracking options.
pub const KWARG_PREFIX: &str = "taskbadger_";
/// Header carrying create-task options from enqueue to publish.
pub const TB_KWARGS: &str = "taskbadger_kwargs";
/// Header (and result metadata key) holding the tracked task ID.
pub const TB_TASK_ID: &str = "taskbadger_task_id";
/// Header marking a job as explicitly tracked.
pub const TB_TRACK: &str = "taskbadger_track";
/// Header overriding argument recording for one call.
pub const TB_RECORD_TASK_ARGS: &str = "taskbadger_record_task_args";
