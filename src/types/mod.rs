//! Wire types for the Task Badger REST API.

pub mod action;
pub mod task;

pub use action::Action;
pub use task::{CreateTask, TaskPage, TaskRecord, TaskStatus, TaskUpdate};
