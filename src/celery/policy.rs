//! Which jobs are tracked automatically.

use std::any::Any;

use regex::Regex;

use crate::config::System;

/// A job-name pattern: exact name or whole-name regular expression.
#[derive(Debug, Clone)]
pub struct TaskPattern {
    raw: String,
    regex: Option<Regex>,
}

impl TaskPattern {
    /// Compile `pattern`. An invalid regex still matches by exact name.
    pub fn new(pattern: impl Into<String>) -> Self {
        let raw = pattern.into();
        let regex = match Regex::new(&format!("^(?:{raw})$")) {
            Ok(regex) => Some(regex),
            Err(e) => {
                tracing::warn!("Invalid task pattern '{}': {}", raw, e);
                None
            },
        };
        Self { raw, regex }
    }

    /// Whether `name` equals the pattern or fully matches it as a regex.
    pub fn matches(&self, name: &str) -> bool {
        self.raw == name || self.regex.as_ref().is_some_and(|re| re.is_match(name))
    }

    /// The pattern as given.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

/// Celery-protocol integration settings.
///
/// Registered on [`Settings`](crate::Settings) under
/// [`IDENTIFIER`](Self::IDENTIFIER). With `auto_track_tasks` every job
/// passing the include/exclude filters is tracked without opting in at the
/// call site. Excludes take precedence over includes.
///
/// # Examples
///
/// ```
/// use taskbadger::celery::CelerySystemIntegration;
///
/// let celery = CelerySystemIntegration::new()
///     .includes([r"myapp\.tasks\..*"])
///     .excludes(["myapp.tasks.ping"]);
/// assert!(celery.track_task("myapp.tasks.export_data"));
/// assert!(!celery.track_task("myapp.tasks.ping"));
/// assert!(!celery.track_task("other.tasks.export_data"));
/// ```
#[derive(Debug, Clone)]
pub struct CelerySystemIntegration {
    auto_track_tasks: bool,
    includes: Vec<TaskPattern>,
    excludes: Vec<TaskPattern>,
    record_task_args: bool,
}

impl Default for CelerySystemIntegration {
    fn default() -> Self {
        Self::new()
    }
}

impl CelerySystemIntegration {
    /// Identifier used to look the integration up.
    pub const IDENTIFIER: &'static str = "celery";

    /// Auto-track every job; don't record arguments.
    pub fn new() -> Self {
        Self {
            auto_track_tasks: true,
            includes: Vec::new(),
            excludes: Vec::new(),
            record_task_args: false,
        }
    }

    /// Enable or disable automatic tracking.
    pub fn auto_track_tasks(mut self, enabled: bool) -> Self {
        self.auto_track_tasks = enabled;
        self
    }

    /// Only auto-track jobs matching one of `patterns`.
    pub fn includes<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.includes = patterns.into_iter().map(TaskPattern::new).collect();
        self
    }

    /// Never auto-track jobs matching one of `patterns`.
    pub fn excludes<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excludes = patterns.into_iter().map(TaskPattern::new).collect();
        self
    }

    /// Record job arguments in task data by default.
    pub fn record_task_args(mut self, enabled: bool) -> Self {
        self.record_task_args = enabled;
        self
    }

    /// Whether job arguments are recorded by default.
    pub fn records_task_args(&self) -> bool {
        self.record_task_args
    }

    /// Whether the job `name` is tracked automatically.
    pub fn track_task(&self, name: &str) -> bool {
        if !self.auto_track_tasks {
            return false;
        }
        if self.excludes.iter().any(|pattern| pattern.matches(name)) {
            return false;
        }
        self.includes.is_empty() || self.includes.iter().any(|pattern| pattern.matches(name))
    }
}

impl System for CelerySystemIntegration {
    fn identifier(&self) -> &'static str {
        Self::IDENTIFIER
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
