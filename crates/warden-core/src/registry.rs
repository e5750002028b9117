//! # Session Registry
//!
//! A process-wide table of live debug sessions.
//!
//! Hosts that debug several targets at once need to hand out stable
//! handles: a UI pane, a script, and an event drainer may all hold the
//! same session at the same time. The registry owns each
//! [`SessionController`] behind an `Arc<Mutex<..>>` and keys it by a
//! [`TargetId`] that stays valid until the session is removed.
//!
//! Most hosts use the [`global`] registry through the `*_global`
//! helpers; embedding a private [`SessionRegistry`] works the same way.
//!
//! ```rust
//! use warden_core::controller::SessionController;
//! use warden_core::registry::SessionRegistry;
//! use warden_core::types::{Address, TargetDescriptor};
//!
//! let mut registry = SessionRegistry::new();
//! let target = TargetDescriptor::new("app", Address::new(0x0040_0000), 0x1000);
//! let (id, handle) = registry.register(SessionController::local(target));
//!
//! assert_eq!(registry.get(id).map(|h| std::sync::Arc::ptr_eq(&h, &handle)), Some(true));
//! assert!(registry.remove(id).is_some());
//! assert!(registry.get(id).is_none());
//! ```

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use once_cell::sync::Lazy;
use tracing::debug;

use crate::controller::SessionController;

/// Stable identifier of a registered session
///
/// Ids are allocated once per registration and never reused within a
/// registry, so a stale id simply stops resolving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(u64);

impl fmt::Display for TargetId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "target#{}", self.0)
    }
}

/// Shared ownership of one registered session
pub type SessionHandle = Arc<Mutex<SessionController>>;

/// Table of live sessions, in registration order
#[derive(Default)]
pub struct SessionRegistry
{
    next_id: u64,
    sessions: Vec<(TargetId, SessionHandle)>,
}

impl SessionRegistry
{
    /// An empty registry
    #[must_use]
    pub const fn new() -> Self
    {
        Self {
            next_id: 1,
            sessions: Vec::new(),
        }
    }

    /// Take ownership of a session and hand back its id and handle
    pub fn register(&mut self, controller: SessionController) -> (TargetId, SessionHandle)
    {
        let id = TargetId(self.next_id);
        self.next_id += 1;
        let handle: SessionHandle = Arc::new(Mutex::new(controller));
        self.sessions.push((id, Arc::clone(&handle)));
        debug!(%id, live = self.sessions.len(), "session registered");
        (id, handle)
    }

    /// Look up a session by id
    #[must_use]
    pub fn get(&self, id: TargetId) -> Option<SessionHandle>
    {
        self.sessions
            .iter()
            .find(|(key, _)| *key == id)
            .map(|(_, handle)| Arc::clone(handle))
    }

    /// Drop a session from the table, returning the final handle
    ///
    /// Other holders of the handle keep the session alive; the registry
    /// merely stops resolving the id.
    pub fn remove(&mut self, id: TargetId) -> Option<SessionHandle>
    {
        let index = self.sessions.iter().position(|(key, _)| *key == id)?;
        let (_, handle) = self.sessions.remove(index);
        debug!(%id, live = self.sessions.len(), "session removed");
        Some(handle)
    }

    /// Ids of every live session, in registration order
    #[must_use]
    pub fn ids(&self) -> Vec<TargetId>
    {
        self.sessions.iter().map(|(id, _)| *id).collect()
    }

    /// Number of live sessions
    #[must_use]
    pub fn len(&self) -> usize
    {
        self.sessions.len()
    }

    /// Whether no sessions are registered
    #[must_use]
    pub fn is_empty(&self) -> bool
    {
        self.sessions.is_empty()
    }
}

impl fmt::Debug for SessionRegistry
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.ids())
            .finish()
    }
}

static GLOBAL: Lazy<Mutex<SessionRegistry>> = Lazy::new(|| Mutex::new(SessionRegistry::new()));

/// The process-wide registry
///
/// Lock it directly for multi-step work; the `*_global` helpers cover
/// the single-call cases.
#[must_use]
pub fn global() -> &'static Mutex<SessionRegistry>
{
    &GLOBAL
}

/// Register a session with the process-wide registry
pub fn register_global(controller: SessionController) -> (TargetId, SessionHandle)
{
    global()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .register(controller)
}

/// Look up a session in the process-wide registry
#[must_use]
pub fn get_global(id: TargetId) -> Option<SessionHandle>
{
    global()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(id)
}

/// Remove a session from the process-wide registry
pub fn remove_global(id: TargetId) -> Option<SessionHandle>
{
    global()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(id)
}
