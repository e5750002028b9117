//! # Error Types
//!
//! Error handling for the session controller and its backend adapters.
//!
//! We use `thiserror` to generate `Error` trait implementations and
//! display strings. Errors are split along the adapter seam:
//!
//! - [`BackendError`]: what a backend transport can report, launch
//!   failures, unsupported operations, per-address memory faults, loss of
//!   transport.
//! - [`SessionError`]: what the controller's command surface returns,
//!   a command rejected in the current state, or a backend failure passed
//!   through typed.
//!
//! Nothing here ever crosses the sink boundary: event sinks observe
//! lifecycle events only, never error values.

use thiserror::Error;

use crate::controller::SessionState;
use crate::translate::TranslateError;
use crate::types::{Address, ProcessId};

/// Failures reported by a backend adapter
///
/// The launch-class variants (`TargetNotFound`, `PermissionDenied`,
/// `AlreadyAttached`, `TransportRefused`) are returned synchronously by
/// `launch`/`attach`/`connect_remote` and leave the session `Inactive`.
/// `Unsupported` is the fixed answer of an adapter whose capability
/// profile excludes the operation, decided once at construction, stable
/// for the adapter's lifetime.
#[derive(Error, Debug)]
pub enum BackendError
{
    /// The launch target does not exist or is not executable
    #[error("Target not found: {0}")]
    TargetNotFound(String),

    /// The system refused the trace/attach request
    ///
    /// On Linux this is commonly the Yama `ptrace_scope` policy or an
    /// attempt to trace a process owned by another user.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The adapter already owns a live target
    ///
    /// An adapter drives at most one debuggee; tear the session down
    /// before launching or attaching again.
    #[error("Already attached to process {0}")]
    AlreadyAttached(ProcessId),

    /// The remote endpoint refused or dropped the connection attempt
    #[error("Transport refused: {0}")]
    TransportRefused(String),

    /// The operation is outside this adapter's capability profile
    ///
    /// This is a structural property of the adapter variant (a kernel
    /// backend has no user-mode process list), not a transient failure;
    /// retrying cannot succeed.
    #[error("Operation not supported by this backend: {0}")]
    Unsupported(&'static str),

    /// A post-attach primitive failed
    ///
    /// Resume, step, or breakpoint installation failed after the target
    /// was attached. The session stays in its prior state; the controller
    /// never retries on its own.
    #[error("Backend operation failed: {0}")]
    OperationFailed(String),

    /// A memory read or write faulted at the given address
    ///
    /// Per-address and non-fatal: bulk context queries turn this into an
    /// explicit unreadable sentinel for the affected item.
    #[error("Memory access failed at {0}")]
    MemoryAccess(Address),

    /// The transport to the backend was lost
    ///
    /// When this surfaces mid-session the controller converts it into the
    /// `BackendDisconnected` lifecycle event and tears the session down.
    #[error("Backend disconnected")]
    Disconnected,

    /// I/O error from the transport or the /proc filesystem
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for `Result<T, BackendError>`
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Failures returned by the session controller's command surface
#[derive(Error, Debug)]
pub enum SessionError
{
    /// The command is not valid in the current session state
    ///
    /// Stepping and resuming require `Stopped`; launch, attach, and
    /// connect require `Inactive`. A rejected command mutates nothing and
    /// publishes no event.
    #[error("Command '{command}' rejected in state {state}")]
    CommandRejected
    {
        /// The rejected command's name
        command: &'static str,
        /// Session state at the time the command was issued
        state: SessionState,
    },

    /// A backend adapter reported a failure
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// A module-relative site could not be resolved to an absolute address
    #[error(transparent)]
    Translate(#[from] TranslateError),

    /// The target binary could not be parsed for its static identity
    #[error("Invalid target image: {0}")]
    InvalidImage(String),
}

/// Convenience type alias for `Result<T, SessionError>`
///
/// ```rust
/// use warden_core::error::SessionResult;
/// fn noop() -> SessionResult<()>
/// {
///     Ok(())
/// }
/// ```
pub type SessionResult<T> = std::result::Result<T, SessionError>;

impl SessionError
{
    /// Whether this is a wrong-state rejection rather than a failure
    #[must_use]
    pub const fn is_rejection(&self) -> bool
    {
        matches!(self, SessionError::CommandRejected { .. })
    }
}
