//! Per-thread configuration context.
//!
//! A [`Badger`] holds the settings, the reentrant session and the scope for
//! one execution unit. Each thread lazily materializes its own context from
//! the process-wide default the first time it asks for one; after that the
//! thread's copy is independent. Rebinding the default does not reach
//! contexts that already exist.
//!
//! Worker pools that run many jobs on one thread can install an explicit
//! context per job with [`Badger::install`].

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::scope::Scope;
use crate::session::ReentrantSession;

static DEFAULT_SETTINGS: RwLock<Option<Arc<Settings>>> = parking_lot::const_rwlock(None);

thread_local! {
    static CURRENT: RefCell<Option<Rc<Badger>>> = const { RefCell::new(None) };
}

/// Configuration context for one execution unit.
///
/// # Examples
///
/// ```
/// use std::rc::Rc;
/// use std::sync::Arc;
/// use taskbadger::{Badger, Settings};
///
/// let settings = Arc::new(Settings::new("https://taskbadger.net", "token", "org", "proj"));
/// let job_context = Rc::new(Badger::new(Some(settings)));
/// {
///     let _guard = Badger::install(job_context.clone());
///     assert!(Badger::current().is_configured());
/// }
/// ```
#[derive(Default)]
pub struct Badger {
    settings: RefCell<Option<Arc<Settings>>>,
    session: ReentrantSession,
    scope: Scope,
}

impl fmt::Debug for Badger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Badger")
            .field("settings", &*self.settings.borrow())
            .field("session", &self.session)
            .field("scope", &self.scope)
            .finish()
    }
}

impl Badger {
    /// A context with its own session and an empty scope.
    pub fn new(settings: Option<Arc<Settings>>) -> Self {
        Self {
            settings: RefCell::new(settings),
            session: ReentrantSession::new(),
            scope: Scope::new(),
        }
    }

    /// A context seeded from the process-wide default.
    pub fn from_default() -> Self {
        Self::new(Self::default_settings())
    }

    /// The calling thread's context, created from the default on first use.
    pub fn current() -> Rc<Badger> {
        CURRENT.with(|current| {
            current
                .borrow_mut()
                .get_or_insert_with(|| Rc::new(Badger::from_default()))
                .clone()
        })
    }

    /// Make `context` current for this thread until the guard is dropped.
    pub fn install(context: Rc<Badger>) -> ContextGuard {
        let previous = CURRENT.with(|current| current.borrow_mut().replace(context));
        ContextGuard { previous }
    }

    /// Replace the process-wide default used to seed new contexts.
    pub fn configure_default(settings: Option<Arc<Settings>>) {
        *DEFAULT_SETTINGS.write() = settings;
    }

    /// The process-wide default settings.
    pub fn default_settings() -> Option<Arc<Settings>> {
        DEFAULT_SETTINGS.read().clone()
    }

    /// Replace this context's settings and merge `tags` into its scope.
    pub fn bind(&self, settings: Option<Arc<Settings>>, tags: BTreeMap<String, String>) {
        *self.settings.borrow_mut() = settings;
        if !tags.is_empty() {
            self.scope.tag(tags);
        }
    }

    /// Whether settings are bound.
    pub fn is_configured(&self) -> bool {
        self.settings.borrow().is_some()
    }

    /// The bound settings.
    pub fn settings(&self) -> Option<Arc<Settings>> {
        self.settings.borrow().clone()
    }

    pub(crate) fn require_settings(&self) -> Result<Arc<Settings>> {
        self.settings().ok_or(Error::NotConfigured)
    }

    /// This context's reentrant session.
    pub fn session(&self) -> &ReentrantSession {
        &self.session
    }

    /// This context's scope.
    pub fn scope(&self) -> &Scope {
        &self.scope
    }
}

/// Restores the previously current context on drop.
#[must_use = "the context is uninstalled as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ContextGuard {
    previous: Option<Rc<Badger>>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        // TLS may already be torn down during thread exit.
        let _ = CURRENT.try_with(|current| *current.borrow_mut() = previous);
    }
}

/// Whether the calling thread's context has settings bound.
pub fn is_configured() -> bool {
    Badger::current().is_configured()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(org: &str) -> Arc<Settings> {
        Arc::new(Settings::new("https://taskbadger.net", "token", org, "proj"))
    }

    #[test]
    fn current_is_stable_per_thread() {
        let a = Badger::current();
        let b = Badger::current();
        assert!(Rc::ptr_eq(&a, &b));
    }

    #[test]
    fn bind_is_visible_to_later_calls() {
        let badger = Badger::new(None);
        assert!(!badger.is_configured());
        badger.bind(Some(settings("org")), BTreeMap::new());
        assert!(badger.is_configured());
        assert_eq!(badger.settings().unwrap().organization_slug, "org");
        badger.bind(None, BTreeMap::new());
        assert!(matches!(badger.require_settings(), Err(Error::NotConfigured)));
    }

    #[test]
    fn bind_tags_seed_scope() {
        let badger = Badger::new(None);
        badger.bind(
            Some(settings("org")),
            BTreeMap::from([("env".to_string(), "test".to_string())]),
        );
        assert_eq!(badger.scope().frame().tags["env"], "test");
    }

    #[test]
    fn install_restores_previous_context() {
        let outer = Badger::current();
        let job = Rc::new(Badger::new(Some(settings("job"))));
        {
            let _guard = Badger::install(job.clone());
            assert!(Rc::ptr_eq(&Badger::current(), &job));
            {
                let nested = Rc::new(Badger::new(None));
                let _guard = Badger::install(nested.clone());
                assert!(Rc::ptr_eq(&Badger::current(), &nested));
            }
            assert!(Rc::ptr_eq(&Badger::current(), &job));
        }
        assert!(Rc::ptr_eq(&Badger::current(), &outer));
    }
}
