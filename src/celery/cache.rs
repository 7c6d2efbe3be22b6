use indexmap::IndexMap;

use crate::task::Task;

/// Default number of task mirrors kept by [`TaskCache`].
pub const DEFAULT_CACHE_SIZE: usize = 128;

/// Bounded least-recently-used cache of task mirrors, keyed by task ID.
///
/// Lookups and inserts move the entry to the most-recently-used end;
/// exceeding the bound evicts from the other end.
#[derive(Debug, Clone)]
pub struct TaskCache {
    entries: IndexMap<String, Task>,
    max_size: usize,
}

impl Default for TaskCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_SIZE)
    }
}

impl TaskCache {
    /// Cache holding at most `max_size` tasks.
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: IndexMap::new(),
            max_size,
        }
    }

    /// The cached task, marking it most recently used.
    pub fn get(&mut self, task_id: &str) -> Option<Task> {
        let index = self.entries.get_index_of(task_id)?;
        let last = self.entries.len() - 1;
        self.entries.move_index(index, last);
        self.entries.get_index(last).map(|(_, task)| task.clone())
    }

    /// Insert or refresh `task` and prune to the bound.
    pub fn set(&mut self, task: Task) {
        let id = task.id().to_string();
        self.entries.shift_remove(&id);
        self.entries.insert(id, task);
        self.prune();
    }

    /// Remove `task_id` if present.
    pub fn unset(&mut self, task_id: &str) {
        self.entries.shift_remove(task_id);
    }

    /// Evict least-recently-used entries until within the bound.
    pub fn prune(&mut self) {
        while self.entries.len() > self.max_size {
            self.entries.shift_remove_index(0);
        }
    }

    /// Whether `task_id` is cached. Does not touch recency.
    pub fn contains(&self, task_id: &str) -> bool {
        self.entries.contains_key(task_id)
    }

    /// Number of cached tasks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Configured bound.
    pub fn max_size(&self) -> usize {
        self.max_size
    }
}
