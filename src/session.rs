//! Depth-counted HTTP session owned by one [`Badger`](crate::Badger) context.
//!
//! The first enter opens a [`TaskApi`] through the settings' connector;
//! nested enters reuse it. The resource is closed when the last guard is
//! released, on every exit path including `?` returns and unwinding.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::sync::Arc;

use crate::api::TaskApi;
use crate::config::Settings;
use crate::error::Result;

/// A reentrant wrapper around one [`TaskApi`] resource.
///
/// # Examples
///
/// ```no_run
/// use taskbadger::Badger;
///
/// let badger = Badger::current();
/// let settings = badger.settings().expect("configured");
/// let outer = badger.session().enter(&settings)?;
/// {
///     let _inner = badger.session().enter(&settings)?;
///     assert_eq!(badger.session().depth(), 2);
/// }
/// drop(outer);
/// assert!(!badger.session().is_open());
/// # Ok::<(), taskbadger::Error>(())
/// ```
#[derive(Default)]
pub struct ReentrantSession {
    client: RefCell<Option<Arc<dyn TaskApi>>>,
    depth: Cell<usize>,
}

impl fmt::Debug for ReentrantSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReentrantSession")
            .field("open", &self.is_open())
            .field("depth", &self.depth.get())
            .finish()
    }
}

impl ReentrantSession {
    /// A closed session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter the session, opening the resource if needed.
    ///
    /// The returned guard exits the session when dropped.
    pub fn enter(&self, settings: &Settings) -> Result<SessionGuard<'_>> {
        let client = self.acquire(settings)?;
        Ok(SessionGuard {
            session: self,
            client,
        })
    }

    /// Enter without a guard. Every successful call must be paired with
    /// [`release`](Self::release).
    pub fn acquire(&self, settings: &Settings) -> Result<Arc<dyn TaskApi>> {
        if let Some(client) = self.client.borrow().as_ref() {
            self.depth.set(self.depth.get() + 1);
            return Ok(client.clone());
        }

        let client = settings.connector().connect(settings)?;
        tracing::debug!("opened session for {}", settings.base_url);
        *self.client.borrow_mut() = Some(client.clone());
        self.depth.set(1);
        Ok(client)
    }

    /// Exit once; closes the resource when the depth reaches zero.
    ///
    /// Releasing a closed session does nothing.
    pub fn release(&self) {
        match self.depth.get() {
            0 => {},
            1 => {
                self.depth.set(0);
                if let Some(client) = self.client.borrow_mut().take() {
                    client.close();
                    tracing::debug!("closed session");
                }
            },
            depth => self.depth.set(depth - 1),
        }
    }

    /// Whether the resource is currently open.
    pub fn is_open(&self) -> bool {
        self.client.borrow().is_some()
    }

    /// Current nesting depth.
    pub fn depth(&self) -> usize {
        self.depth.get()
    }

    /// The open resource, if any.
    pub fn client(&self) -> Option<Arc<dyn TaskApi>> {
        self.client.borrow().clone()
    }
}

/// Exits a [`ReentrantSession`] on drop.
#[must_use = "the session is exited as soon as the guard is dropped"]
pub struct SessionGuard<'a> {
    session: &'a ReentrantSession,
    client: Arc<dyn TaskApi>,
}

impl SessionGuard<'_> {
    /// The resource this guard keeps open.
    pub fn api(&self) -> &dyn TaskApi {
        self.client.as_ref()
    }
}

impl fmt::Debug for SessionGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionGuard")
            .field("depth", &self.session.depth())
            .finish()
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.session.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockConnector;

    #[test]
    fn nested_enter_opens_once() {
        let connector = MockConnector::new();
        let settings = connector.settings();
        let session = ReentrantSession::new();

        {
            let _a = session.enter(&settings).unwrap();
            let _b = session.enter(&settings).unwrap();
            let _c = session.enter(&settings).unwrap();
            assert_eq!(session.depth(), 3);
            assert_eq!(connector.opened(), 1);
            assert_eq!(connector.closed(), 0);
        }

        assert_eq!(session.depth(), 0);
        assert!(!session.is_open());
        assert_eq!(connector.opened(), 1);
        assert_eq!(connector.closed(), 1);
    }

    #[test]
    fn reopens_after_close() {
        let connector = MockConnector::new();
        let settings = connector.settings();
        let session = ReentrantSession::new();

        drop(session.enter(&settings).unwrap());
        drop(session.enter(&settings).unwrap());
        assert_eq!(connector.opened(), 2);
        assert_eq!(connector.closed(), 2);
    }

    #[test]
    fn release_without_acquire_is_noop() {
        let session = ReentrantSession::new();
        session.release();
        assert_eq!(session.depth(), 0);
    }

    #[test]
    fn guard_released_on_unwind() {
        let connector = MockConnector::new();
        let settings = connector.settings();
        let session = ReentrantSession::new();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = session.enter(&settings).unwrap();
            panic!("job body failed");
        }));

        assert!(result.is_err());
        assert_eq!(session.depth(), 0);
        assert_eq!(connector.closed(), 1);
    }

    #[test]
    fn failed_connect_leaves_session_closed() {
        let connector = MockConnector::failing();
        let settings = connector.settings();
        let session = ReentrantSession::new();

        assert!(session.enter(&settings).is_err());
        assert_eq!(session.depth(), 0);
        assert!(!session.is_open());
    }
}
