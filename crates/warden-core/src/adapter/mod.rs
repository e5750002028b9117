//! # Backend Adapters
//!
//! The seam between the session controller and whatever actually holds
//! the target.
//!
//! A backend adapter owns one debuggee through one transport: a local
//! process under OS tracing, a remote stub across a wire, or a kernel
//! connection. The controller drives the adapter synchronously from the
//! control thread through [`BackendAdapter`]'s command methods, and the
//! adapter reports asynchronous target activity (stops, exit,
//! transport loss) by posting [`TargetEvent`] values into the channel it
//! was constructed with. Commands never block on target activity and
//! target activity never waits on a command.
//!
//! ## Capabilities
//!
//! Not every backend can do everything: a kernel connection has no
//! user-mode process list, a remote stub cannot launch, and a local
//! adapter on an architecture without a software breakpoint sequence
//! cannot set breakpoints. Each adapter fixes its
//! [`AdapterCapabilities`] at construction and answers excluded
//! operations with [`BackendError::Unsupported`], so the controller can
//! gate commands up front instead of discovering holes mid-session.
//!
//! ## Choosing an Adapter
//!
//! ```rust,no_run
//! use warden_core::adapter::{create_local_adapter, target_event_channel};
//!
//! let (events, _inbox) = target_event_channel();
//! let adapter = create_local_adapter(events)?;
//! println!("backend: {}", adapter.kind());
//! # Ok::<(), warden_core::error::BackendError>(())
//! ```

use std::fmt;
use std::path::PathBuf;
use std::sync::mpsc;

use crate::error::{BackendError, BackendResult};
use crate::types::{
    Address, ModuleInfo, ProcessId, ProcessInfo, RegisterFile, RegisterId, StopReason, ThreadId,
    ThreadInfo,
};

pub mod kernel;
#[cfg(target_os = "linux")]
pub mod local;
pub mod replay;
pub mod stub;

/// The transport family an adapter speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterKind
{
    /// A process on this machine, traced through OS primitives
    LocalProcess,
    /// A debug stub reached over a remote transport
    RemoteStub,
    /// A kernel debug connection
    Kernel,
    /// A scripted in-memory backend used by tests and demos
    Replay,
}

impl fmt::Display for AdapterKind
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let name = match self {
            AdapterKind::LocalProcess => "local process",
            AdapterKind::RemoteStub => "remote stub",
            AdapterKind::Kernel => "kernel",
            AdapterKind::Replay => "replay",
        };
        write!(f, "{name}")
    }
}

/// What one adapter instance is able to do
///
/// Fixed when the adapter is constructed and stable for its lifetime.
/// The controller consults these flags before issuing a command; an
/// adapter still answers an excluded operation itself with
/// [`BackendError::Unsupported`], so the contract holds even for callers
/// that skip the check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterCapabilities
{
    /// Can start a fresh target from an image path
    pub launch: bool,
    /// Can attach to an already running process by pid
    pub attach: bool,
    /// Can connect to a remote endpoint
    pub connect: bool,
    /// Can enumerate debuggable processes
    pub list_processes: bool,
    /// Can install and remove breakpoints
    pub breakpoints: bool,
    /// Can single-step the active thread
    pub stepping: bool,
    /// Can interrupt a running target out of band
    pub pause: bool,
    /// Can write target memory
    pub write_memory: bool,
    /// Can write target registers
    pub write_registers: bool,
}

impl AdapterCapabilities
{
    /// Profile of a local-process adapter on this build's architecture
    ///
    /// Software breakpoints need an architecture with a known trap
    /// sequence, so they are only advertised on x86-64.
    #[must_use]
    pub const fn local_process() -> Self
    {
        Self {
            launch: true,
            attach: true,
            connect: false,
            list_processes: true,
            breakpoints: cfg!(target_arch = "x86_64"),
            stepping: true,
            pause: true,
            write_memory: true,
            write_registers: true,
        }
    }

    /// Profile of a remote stub connection
    ///
    /// The stub owns the target's lifecycle; this side can only connect
    /// to it, never launch or enumerate.
    #[must_use]
    pub const fn remote_stub() -> Self
    {
        Self {
            launch: false,
            attach: false,
            connect: true,
            list_processes: false,
            breakpoints: true,
            stepping: true,
            pause: true,
            write_memory: true,
            write_registers: true,
        }
    }

    /// Profile of a kernel debug connection
    ///
    /// No user-mode process list exists on the other side, and register
    /// state is read-only.
    #[must_use]
    pub const fn kernel() -> Self
    {
        Self {
            launch: false,
            attach: false,
            connect: true,
            list_processes: false,
            breakpoints: true,
            stepping: true,
            pause: true,
            write_memory: true,
            write_registers: false,
        }
    }

    /// Profile with every capability enabled
    #[must_use]
    pub const fn full() -> Self
    {
        Self {
            launch: true,
            attach: true,
            connect: true,
            list_processes: true,
            breakpoints: true,
            stepping: true,
            pause: true,
            write_memory: true,
            write_registers: true,
        }
    }
}

/// How to start a fresh target
///
/// ## Example
///
/// ```rust
/// use warden_core::adapter::LaunchRequest;
///
/// let request = LaunchRequest::new("/usr/bin/yes")
///     .with_args(["--help"])
///     .with_stop_at_entry(true);
/// assert!(request.stop_at_entry);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest
{
    /// Path to the image to execute
    pub path: PathBuf,
    /// Arguments, not including the image path itself
    pub args: Vec<String>,
    /// Working directory; the adapter's own when `None`
    pub working_dir: Option<PathBuf>,
    /// Halt at the image entry point instead of running freely
    pub stop_at_entry: bool,
}

impl LaunchRequest
{
    /// Request launching `path` with no arguments
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self
    {
        Self {
            path: path.into(),
            args: Vec::new(),
            working_dir: None,
            stop_at_entry: false,
        }
    }

    /// Replace the argument list
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set the working directory
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self
    {
        self.working_dir = Some(dir.into());
        self
    }

    /// Choose whether the target halts at its entry point
    #[must_use]
    pub const fn with_stop_at_entry(mut self, stop: bool) -> Self
    {
        self.stop_at_entry = stop;
        self
    }
}

/// A remote debug endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEndpoint
{
    /// Host name or address of the stub
    pub host: String,
    /// TCP port the stub listens on
    pub port: u16,
}

impl RemoteEndpoint
{
    /// Endpoint at `host:port`
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self
    {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for RemoteEndpoint
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Backend-side identifier of an installed breakpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BreakpointHandle(pub u64);

impl fmt::Display for BreakpointHandle
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "bp#{}", self.0)
    }
}

/// Asynchronous target activity reported by an adapter
///
/// Posted from whatever thread observes the target and drained by the
/// controller on the control thread. An adapter posts `Disconnected` at
/// most once, as its final event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetEvent
{
    /// The target halted
    Stopped
    {
        /// Why the target halted
        reason: StopReason,
    },
    /// The target exited; no further events follow except `Disconnected`
    Exited
    {
        /// Exit code, negative for signal deaths on POSIX backends
        code: i32,
    },
    /// The transport was lost without an orderly detach
    Disconnected,
}

/// Sending half of an adapter's event channel
pub type TargetEventSender = mpsc::Sender<TargetEvent>;

/// Receiving half of an adapter's event channel, drained by the controller
pub type TargetEventReceiver = mpsc::Receiver<TargetEvent>;

/// Create the channel an adapter reports target activity through
#[must_use]
pub fn target_event_channel() -> (TargetEventSender, TargetEventReceiver)
{
    mpsc::channel()
}

/// Constructor the controller uses to (re)create its adapter
///
/// Invoked once per connection, including on restart, with a fresh event
/// sender each time.
pub type AdapterFactory =
    Box<dyn FnMut(TargetEventSender) -> BackendResult<Box<dyn BackendAdapter>> + Send>;

/// A debug backend driving exactly one target
///
/// All methods take `&mut self`: an adapter has a single owner and is
/// only ever driven from the control thread. Implementations post
/// asynchronous activity through the [`TargetEventSender`] they were
/// constructed with; the command methods themselves return only the
/// synchronous outcome.
///
/// Operations outside the adapter's capability profile return
/// [`BackendError::Unsupported`] with a stable description; the provided
/// default bodies do exactly that for the operations most backends lack.
pub trait BackendAdapter: Send
{
    /// Which transport family this adapter is
    fn kind(&self) -> AdapterKind;

    /// The fixed capability profile of this adapter
    fn capabilities(&self) -> AdapterCapabilities;

    /// Start a fresh target and take control of it
    ///
    /// On success the target exists but has not been resumed; the first
    /// `Stopped` event announces its initial halt.
    fn launch(&mut self, _request: &LaunchRequest) -> BackendResult<ProcessId>
    {
        Err(BackendError::Unsupported("launch"))
    }

    /// Take control of an already running process
    fn attach(&mut self, _pid: ProcessId) -> BackendResult<()>
    {
        Err(BackendError::Unsupported("attach"))
    }

    /// Connect to a remote endpoint holding the target
    fn connect_remote(&mut self, _endpoint: &RemoteEndpoint) -> BackendResult<()>
    {
        Err(BackendError::Unsupported("connect_remote"))
    }

    /// Drop the remote transport without releasing the target
    ///
    /// The target stays wherever the stub left it; only the connection
    /// ends. Backends without a remote transport report `Unsupported`.
    fn disconnect_remote(&mut self) -> BackendResult<()>
    {
        Err(BackendError::Unsupported("disconnect_remote"))
    }

    /// Release the target and let it keep running
    fn detach(&mut self) -> BackendResult<()>;

    /// Terminate the target
    fn quit(&mut self) -> BackendResult<()>;

    /// Resume the halted target
    fn resume(&mut self) -> BackendResult<()>;

    /// Interrupt the running target; the halt arrives as a `Stopped` event
    fn pause(&mut self) -> BackendResult<()>;

    /// Execute one instruction, following calls in
    fn step_into(&mut self) -> BackendResult<()>;

    /// Execute one instruction, stepping across calls
    fn step_over(&mut self) -> BackendResult<()>;

    /// Run until the current frame returns
    fn step_return(&mut self) -> BackendResult<()>;

    /// Run until execution reaches `address`
    fn step_to(&mut self, address: Address) -> BackendResult<()>;

    /// Install a breakpoint at an absolute address
    ///
    /// The returned handle is the token later passed to
    /// [`clear_breakpoint`](Self::clear_breakpoint).
    fn set_breakpoint(&mut self, address: Address) -> BackendResult<BreakpointHandle>;

    /// Remove a previously installed breakpoint by its handle
    fn clear_breakpoint(&mut self, handle: BreakpointHandle) -> BackendResult<()>;

    /// Every breakpoint currently installed backend-side, with its handle
    fn list_backend_breakpoints(&mut self) -> BackendResult<Vec<(Address, BreakpointHandle)>>;

    /// Read `len` bytes of target memory at `address`
    fn read_memory(&mut self, address: Address, len: usize) -> BackendResult<Vec<u8>>;

    /// Write bytes into target memory, returning how many were written
    fn write_memory(&mut self, address: Address, data: &[u8]) -> BackendResult<usize>;

    /// Register file of the active thread
    fn read_registers(&mut self) -> BackendResult<RegisterFile>;

    /// Write one register of the active thread
    fn write_register(&mut self, _id: RegisterId, _value: u64) -> BackendResult<()>
    {
        Err(BackendError::Unsupported("write_register"))
    }

    /// Modules currently loaded in the target
    fn list_modules(&mut self) -> BackendResult<Vec<ModuleInfo>>;

    /// Threads currently alive in the target
    fn list_threads(&mut self) -> BackendResult<Vec<ThreadInfo>>;

    /// Thread whose context the register and stack queries refer to
    fn active_thread(&mut self) -> BackendResult<ThreadId>;

    /// Select the thread context queries refer to
    fn set_active_thread(&mut self, _thread: ThreadId) -> BackendResult<()>
    {
        Err(BackendError::Unsupported("set_active_thread"))
    }

    /// Enumerate processes this adapter could attach to
    fn list_processes(&mut self) -> BackendResult<Vec<ProcessInfo>>
    {
        Err(BackendError::Unsupported("list_processes"))
    }
}

/// Create the local-process adapter for this platform
///
/// # Errors
///
/// Returns [`BackendError::Unsupported`] on platforms without a local
/// tracing implementation.
pub fn create_local_adapter(events: TargetEventSender) -> BackendResult<Box<dyn BackendAdapter>>
{
    #[cfg(target_os = "linux")]
    {
        Ok(Box::new(local::LocalAdapter::new(events)))
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = events;
        Err(BackendError::Unsupported(
            "local process debugging is only available on Linux",
        ))
    }
}
