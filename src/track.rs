//! Report the outcome of a closure as a task.

use std::fmt::Display;

use serde_json::{json, Map};

use crate::safe::{create_task_safe, update_task_safe};
use crate::types::{CreateTask, TaskStatus, TaskUpdate};

/// Runs closures as tracked tasks.
///
/// The task is created as `processing` before the closure runs, then set
/// to `success` or to `error` with the error message in
/// `data.exception`. Tracking is fail-open: if the task cannot be
/// created the closure still runs.
///
/// # Examples
///
/// ```
/// use taskbadger::Tracker;
///
/// let rows = Tracker::new("reindex")
///     .max_runtime(600)
///     .run(|| Ok::<_, std::io::Error>(42))
///     .unwrap();
/// assert_eq!(rows, 42);
/// ```
#[derive(Debug, Clone)]
pub struct Tracker {
    name: String,
    monitor_id: Option<String>,
    max_runtime: Option<i64>,
}

impl Tracker {
    /// Tracker for tasks named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            monitor_id: None,
            max_runtime: None,
        }
    }

    /// Associate runs with a monitor.
    pub fn monitor_id(mut self, monitor_id: impl Into<String>) -> Self {
        self.monitor_id = Some(monitor_id.into());
        self
    }

    /// Maximum expected runtime in seconds.
    pub fn max_runtime(mut self, seconds: i64) -> Self {
        self.max_runtime = Some(seconds);
        self
    }

    /// Run `f`, reporting its outcome. The closure's result is returned
    /// unchanged.
    pub fn run<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: Display,
    {
        let mut options = CreateTask::new().status(TaskStatus::Processing);
        options.max_runtime = self.max_runtime;
        options.monitor_id = self.monitor_id.clone();
        let task_id = create_task_safe(&self.name, options);

        let result = f();

        if let Some(task_id) = task_id {
            let update = match &result {
                Ok(_) => TaskUpdate::new().status(TaskStatus::Success),
                Err(e) => {
                    let mut data = Map::new();
                    data.insert("exception".into(), json!(e.to_string()));
                    TaskUpdate::new().status(TaskStatus::Error).data(data)
                },
            };
            update_task_safe(&task_id, update);
        }
        result
    }
}

/// Run `f` as a task named `name`. See [`Tracker`].
pub fn track<T, E, F>(name: &str, f: F) -> Result<T, E>
where
    F: FnOnce() -> Result<T, E>,
    E: Display,
{
    Tracker::new(name).run(f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockConnector;
    use pretty_assertions::assert_eq;

    #[test]
    fn success_path() {
        let connector = MockConnector::new();
        let (_badger, _guard) = connector.install();

        let value = Tracker::new("job")
            .monitor_id("mon-1")
            .max_runtime(10)
            .run(|| Ok::<_, String>(7))
            .unwrap();
        assert_eq!(value, 7);

        let create = &connector.api().calls_to("create")[0];
        assert_eq!(
            create.body,
            Some(json!({"name": "job", "status": "processing", "max_runtime": 10}))
        );
        assert_eq!(create.query["monitor_id"], "mon-1");
        let update = &connector.api().calls_to("partial_update")[0];
        assert_eq!(update.body, Some(json!({"status": "success"})));
    }

    #[test]
    fn error_path_records_exception() {
        let connector = MockConnector::new();
        let (_badger, _guard) = connector.install();

        let err = track("job", || Err::<(), _>("disk full")).unwrap_err();
        assert_eq!(err, "disk full");

        let update = &connector.api().calls_to("partial_update")[0];
        assert_eq!(
            update.body,
            Some(json!({"status": "error", "data": {"exception": "disk full"}}))
        );
    }

    #[test]
    fn runs_when_tracking_fails() {
        let connector = MockConnector::failing();
        let (_badger, _guard) = connector.install();
        assert_eq!(track("job", || Ok::<_, String>(1)), Ok(1));
    }
}
