//! Fail-open wrappers around the task calls.
//!
//! These helpers log errors instead of returning them, and do nothing at
//! all when the context is not configured.

use crate::badger::Badger;
use crate::task::Task;
use crate::types::{CreateTask, TaskUpdate};

/// Create a task, returning its ID, or `None` if unconfigured or on error.
///
/// # Examples
///
/// ```
/// use taskbadger::{create_task_safe, CreateTask};
///
/// // Without `init` this is a no-op.
/// assert_eq!(create_task_safe("report", CreateTask::new()), None);
/// ```
pub fn create_task_safe(name: &str, options: CreateTask) -> Option<String> {
    create_safe(&Badger::current(), name, options).map(|task| task.id().to_string())
}

/// Update a task, logging instead of failing.
pub fn update_task_safe(task_id: &str, update: TaskUpdate) {
    update_safe(&Badger::current(), task_id, update);
}

pub(crate) fn create_safe(badger: &Badger, name: &str, options: CreateTask) -> Option<Task> {
    if !badger.is_configured() {
        return None;
    }
    match badger.create_task(name, options) {
        Ok(task) => Some(task),
        Err(e) => {
            tracing::error!("Error creating task '{}': {}", name, e);
            None
        },
    }
}

pub(crate) fn update_safe(badger: &Badger, task_id: &str, update: TaskUpdate) -> Option<Task> {
    if !badger.is_configured() {
        return None;
    }
    match badger.update_task(task_id, update) {
        Ok(task) => Some(task),
        Err(e) => {
            tracing::error!("Error updating task '{}': {}", task_id, e);
            None
        },
    }
}

#[cfg(feature = "celery")]
pub(crate) fn get_safe(badger: &Badger, task_id: &str) -> Option<Task> {
    if !badger.is_configured() {
        return None;
    }
    match badger.get_task(task_id) {
        Ok(task) => Some(task),
        Err(e) => {
            tracing::warn!("Error fetching task '{}': {}", task_id, e);
            None
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockConnector;
    use crate::types::TaskStatus;
    use std::rc::Rc;

    #[test]
    fn unconfigured_is_noop() {
        let connector = MockConnector::new();
        let _guard = Badger::install(Rc::new(Badger::new(None)));
        assert_eq!(create_task_safe("t", CreateTask::new()), None);
        update_task_safe("t1", TaskUpdate::new().status(TaskStatus::Success));
        assert!(connector.api().calls().is_empty());
    }

    #[test]
    fn returns_id_on_success() {
        let connector = MockConnector::new();
        let (_badger, _guard) = connector.install();
        let id = create_task_safe("t", CreateTask::new()).unwrap();
        update_task_safe(&id, TaskUpdate::new().status(TaskStatus::Success));
        assert_eq!(connector.api().task(&id).unwrap()["status"], "success");
    }

    #[test]
    fn swallows_http_errors() {
        let connector = MockConnector::new();
        let (_badger, _guard) = connector.install();
        connector.api().respond_next(500, "oops");
        assert_eq!(create_task_safe("t", CreateTask::new()), None);
        update_task_safe("missing", TaskUpdate::new().value(1));
    }

    #[test]
    fn swallows_connect_errors() {
        let connector = MockConnector::failing();
        let (_badger, _guard) = connector.install();
        assert_eq!(create_task_safe("t", CreateTask::new()), None);
    }
}
