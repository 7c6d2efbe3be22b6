//! Rust client for [Task Badger](https://taskbadger.net).
//!
//! Task Badger tracks the status and progress of long-running operations.
//! This crate reports task lifecycles to the service and can instrument
//! Celery-protocol job workers so that jobs report themselves.
//!
//! # Overview
//!
//! Configuration is bound per thread: each thread has a [`Badger`] context
//! holding its [`Settings`], a reentrant HTTP session and a [`Scope`] of
//! default data and tags. [`init`] configures the calling thread and sets
//! the process-wide default that new threads start from.
//!
//! ```no_run
//! use taskbadger::{CreateTask, InitOptions, TaskStatus};
//!
//! taskbadger::init(InitOptions::with_token("bXlvcmcvbXlwcm9qZWN0L3NlY3JldA=="))?;
//!
//! let mut task = taskbadger::create_task("data-import", CreateTask::new().value_max(3))?;
//! for step in 1..=3 {
//!     task.processing(Some(step))?;
//! }
//! task.success(None)?;
//! assert_eq!(task.status(), TaskStatus::Success);
//! # Ok::<(), taskbadger::Error>(())
//! ```
//!
//! # Module Organization
//!
//! - [`config`] - Settings, integrations and [`init`]
//! - [`badger`] - Per-thread context and process-wide default
//! - [`session`] - Depth-counted HTTP session
//! - [`scope`] - Nested default data and tags
//! - [`task`] - Create/update calls and the [`Task`] handle
//! - [`safe`] - Fail-open wrappers
//! - [`track`] - Closure instrumentation
//! - [`celery`] - Job worker integration (feature `celery`)
//! - [`api`] / [`http`] - REST boundary and its `reqwest` transport
//!
//! # Features
//!
//! - `http-client` (default): blocking HTTP transport.
//! - `celery` (default): job worker integration.
//! - `test-helpers`: in-memory `testing::MockApi` for downstream tests.

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod api;
pub mod badger;
pub mod config;
pub mod error;
pub mod safe;
pub mod scope;
pub mod session;
pub mod task;
pub mod track;
pub mod types;

#[cfg(feature = "http-client")]
#[cfg_attr(docsrs, doc(cfg(feature = "http-client")))]
pub mod http;

#[cfg(feature = "celery")]
#[cfg_attr(docsrs, doc(cfg(feature = "celery")))]
pub mod celery;

#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;

pub use api::{ApiResponse, Connector, TaskApi};
pub use badger::{is_configured, Badger, ContextGuard};
pub use config::{init, BeforeCreate, InitOptions, Settings, System, DEFAULT_HOST};
pub use error::{Error, Result};
pub use safe::{create_task_safe, update_task_safe};
pub use scope::{with_scope, Scope, ScopeFrame, ScopeGuard};
pub use session::{ReentrantSession, SessionGuard};
pub use task::{
    create_task, get_task, list_tasks, update_task, DefaultMergeStrategy, MergeStrategy, Task,
};
pub use track::{track, Tracker};
pub use types::{Action, CreateTask, TaskPage, TaskRecord, TaskStatus, TaskUpdate};
