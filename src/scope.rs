//! Nested default data and tags for task creation.
//!
//! Every task created while a scope frame is active gets the frame's data
//! and tags merged under its own (the call's values win). Frames nest;
//! leaving a frame restores exactly what was there before it was entered.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;

use serde_json::{Map, Value};

use crate::badger::Badger;

/// The data and tags of one scope level.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScopeFrame {
    /// Default task data.
    pub data: Map<String, Value>,
    /// Default task tags.
    pub tags: BTreeMap<String, String>,
}

/// A stack of [`ScopeFrame`]s belonging to one [`Badger`] context.
#[derive(Default)]
pub struct Scope {
    current: RefCell<ScopeFrame>,
    saved: RefCell<Vec<ScopeFrame>>,
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("current", &*self.current.borrow())
            .field("depth", &self.depth())
            .finish()
    }
}

impl Scope {
    /// An empty scope at depth zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter a nested frame that starts as a copy of the current one.
    pub fn enter(&self) -> ScopeGuard<'_> {
        let copy = self.current.borrow().clone();
        self.saved.borrow_mut().push(copy);
        ScopeGuard { scope: self }
    }

    fn exit(&self) {
        if let Some(previous) = self.saved.borrow_mut().pop() {
            *self.current.borrow_mut() = previous;
        }
    }

    /// Set a data entry in the current frame.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.current
            .borrow_mut()
            .data
            .insert(key.into(), value.into());
    }

    /// A data entry from the current frame.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.current.borrow().data.get(key).cloned()
    }

    /// Merge tags into the current frame. New values win.
    pub fn tag<K, V>(&self, tags: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut current = self.current.borrow_mut();
        for (namespace, value) in tags {
            current.tags.insert(namespace.into(), value.into());
        }
    }

    /// Snapshot of the current frame.
    pub fn frame(&self) -> ScopeFrame {
        self.current.borrow().clone()
    }

    /// Number of frames entered and not yet exited.
    pub fn depth(&self) -> usize {
        self.saved.borrow().len()
    }
}

/// Restores the enclosing frame when dropped.
///
/// Derefs to the [`Scope`], so values can be set directly on the guard.
#[must_use = "the scope frame is exited as soon as the guard is dropped"]
pub struct ScopeGuard<'a> {
    scope: &'a Scope,
}

impl Deref for ScopeGuard<'_> {
    type Target = Scope;

    fn deref(&self) -> &Scope {
        self.scope
    }
}

impl fmt::Debug for ScopeGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ScopeGuard").field(self.scope).finish()
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        self.scope.exit();
    }
}

/// Run `f` inside a fresh frame of the current context's scope.
///
/// # Examples
///
/// ```
/// use serde_json::json;
///
/// taskbadger::with_scope(|scope| {
///     scope.set("request_id", "r-42");
///     scope.tag([("tenant", "acme")]);
///     assert_eq!(scope.get("request_id"), Some(json!("r-42")));
/// });
/// assert_eq!(taskbadger::Badger::current().scope().get("request_id"), None);
/// ```
pub fn with_scope<R>(f: impl FnOnce(&Scope) -> R) -> R {
    let badger = Badger::current();
    let frame = badger.scope().enter();
    f(&frame)
}
