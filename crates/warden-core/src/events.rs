//! # Session Events
//!
//! Normalized lifecycle events published by the session controller.
//!
//! Every state transition the controller performs (launch, attach, the
//! step family, stop, exit, detach, disconnect) is announced to
//! registered sinks as exactly one [`SessionEvent`], in the order the
//! transitions happened. Events are immutable once published and carry
//! just enough payload for a sink to render a status line without
//! querying back into session state that may already have moved on.
//!
//! Sinks run on the control thread. They must not block, and they never
//! receive error values; failures either surface to the command caller
//! as typed results or become a lifecycle event (disconnect).

use std::fmt;

use smallvec::SmallVec;
use tracing::debug;

use crate::types::{Address, StopReason};

/// A normalized session lifecycle event
///
/// The step variants mirror the command that caused them so sinks can
/// show which flavor of step is in flight; `TargetStopped` carries the
/// halt reason and `TargetExited` the exit code.
///
/// ## Example
///
/// ```rust
/// use warden_core::events::SessionEvent;
/// use warden_core::types::StopReason;
///
/// let event = SessionEvent::TargetStopped(StopReason::Breakpoint);
/// assert_eq!(event.describe(), "Stopped");
/// assert_eq!(event.to_string(), "stopped: breakpoint");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent
{
    /// A launch was accepted by the backend
    Launching,
    /// The target was resumed
    Resuming,
    /// A step-into is in flight
    SteppingInto,
    /// A step-over is in flight
    SteppingOver,
    /// A step-out-of-frame is in flight
    SteppingReturn,
    /// A run-to-address is in flight
    SteppingTo,
    /// The session is tearing down to relaunch the same target
    Restarting,
    /// An attach or remote connect was accepted by the backend
    Attaching,
    /// The target halted
    TargetStopped(StopReason),
    /// The target exited with the given code
    TargetExited(i32),
    /// The session detached, leaving the target running
    Detached,
    /// The session killed the target at the user's request
    QuitDebugging,
    /// The backend transport was lost unexpectedly
    BackendDisconnected,
    /// The live view was rebased to the primary module's runtime base
    ///
    /// Published once per connection, on the first module refresh that
    /// resolves where the loader actually placed the analyzed image.
    InitialViewRebased
    {
        /// Runtime base of the primary module
        base: Address,
    },
}

impl SessionEvent
{
    /// Short status-line text for this event
    ///
    /// Fixed strings suitable for a host's status bar; payload details
    /// are available through the `Display` implementation.
    #[must_use]
    pub const fn describe(&self) -> &'static str
    {
        match self {
            SessionEvent::Launching => "Launching...",
            SessionEvent::Resuming => "Running...",
            SessionEvent::SteppingInto => "Stepping into...",
            SessionEvent::SteppingOver => "Stepping over...",
            SessionEvent::SteppingReturn => "Stepping out...",
            SessionEvent::SteppingTo => "Stepping to target...",
            SessionEvent::Restarting => "Restarting...",
            SessionEvent::Attaching => "Attaching...",
            SessionEvent::TargetStopped(_) => "Stopped",
            SessionEvent::TargetExited(_) => "Exited",
            SessionEvent::Detached => "Detached",
            SessionEvent::QuitDebugging => "Aborted",
            SessionEvent::BackendDisconnected => "Backend disconnected",
            SessionEvent::InitialViewRebased { .. } => "Rebased",
        }
    }
}

impl fmt::Display for SessionEvent
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            SessionEvent::TargetStopped(reason) => write!(f, "stopped: {reason}"),
            SessionEvent::TargetExited(code) => write!(f, "exited with code {code}"),
            SessionEvent::InitialViewRebased { base } => write!(f, "rebased to {base}"),
            other => write!(f, "{}", other.describe().trim_end_matches("...").to_lowercase()),
        }
    }
}

/// Identifier returned by sink registration, used to unregister
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkToken(pub(crate) usize);

impl fmt::Display for SinkToken
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "sink#{}", self.0)
    }
}

/// A registered event consumer
///
/// Invoked on the control thread for every published event; must not
/// block.
pub type EventSink = Box<dyn FnMut(&SessionEvent) + Send>;

/// Ordered sink table with token-based removal
///
/// Publication walks the table in registration order, so every sink sees
/// the same event sequence. Tokens are monotonically assigned and never
/// reused within a session.
pub(crate) struct EventSinks
{
    next_token: usize,
    sinks: SmallVec<[(SinkToken, EventSink); 4]>,
}

impl EventSinks
{
    pub(crate) fn new() -> Self
    {
        Self {
            next_token: 0,
            sinks: SmallVec::new(),
        }
    }

    /// Register a sink and hand back its removal token
    pub(crate) fn register(&mut self, sink: EventSink) -> SinkToken
    {
        let token = SinkToken(self.next_token);
        self.next_token += 1;
        self.sinks.push((token, sink));
        token
    }

    /// Remove the sink registered under `token`
    ///
    /// Returns whether a sink was actually removed; removal preserves the
    /// relative order of the remaining sinks.
    pub(crate) fn remove(&mut self, token: SinkToken) -> bool
    {
        let before = self.sinks.len();
        self.sinks.retain(|(registered, _)| *registered != token);
        self.sinks.len() != before
    }

    /// Deliver one event to every sink, in registration order
    pub(crate) fn broadcast(&mut self, event: &SessionEvent)
    {
        debug!(event = %event, sinks = self.sinks.len(), "publishing session event");
        for (_, sink) in &mut self.sinks {
            sink(event);
        }
    }

    pub(crate) fn len(&self) -> usize
    {
        self.sinks.len()
    }
}

impl fmt::Debug for EventSinks
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("EventSinks")
            .field("next_token", &self.next_token)
            .field("sinks", &self.sinks.len())
            .finish()
    }
}
