//! # Session Controller
//!
//! The state machine that owns one debug session end to end.
//!
//! A [`SessionController`] sits between a host and a backend adapter. It
//! owns the adapter, the breakpoint set, the module map, and the cached
//! stop context, and it is the only thing that mutates any of them. All
//! commands are synchronous calls on the control thread; everything the
//! target does on its own arrives as [`TargetEvent`]s that the host
//! drains through [`process_events`](SessionController::process_events)
//! or [`pump_events`](SessionController::pump_events), also on the
//! control thread. There is no hidden thread inside the controller, so
//! every state transition and every published [`SessionEvent`] happens
//! at a point the host chose.
//!
//! ## Lifecycle
//!
//! ```text
//! Inactive -> Launching  -> Stopped <-> Running -> Detaching -> Inactive
//!          -> Attaching  ->                     -> Exiting   -> Inactive
//! ```
//!
//! Commands that do not fit the current state are rejected with
//! [`SessionError::CommandRejected`] and change nothing. The breakpoint
//! set deliberately survives the whole cycle: tearing a target down must
//! not cost the user their breakpoints.
//!
//! ## The Stop Pipeline
//!
//! Every halt runs the same sequence before anyone observes it: refresh
//! the module map, recompute the instruction pointer and thread context,
//! reconcile the breakpoint set against what the backend actually has
//! installed, and only then publish `TargetStopped`. By the time a sink
//! sees the event, the session's view is coherent.
//!
//! ## Example
//!
//! ```rust
//! use warden_core::adapter::replay::{ReplayScript, ScriptedStop};
//! use warden_core::adapter::{BackendAdapter, LaunchRequest};
//! use warden_core::controller::SessionController;
//! use warden_core::types::{Address, ModuleInfo, StopReason, TargetDescriptor};
//!
//! let target = TargetDescriptor::new("app", Address::new(0x0040_0000), 0x1000);
//! let script = ReplayScript::new()
//!     .then_stop(
//!         ScriptedStop::new(StopReason::InitialBreakpoint, Address::new(0x0055_0000))
//!             .with_modules(vec![ModuleInfo::new("app", Address::new(0x0055_0000), 0x1000)]),
//!     )
//!     .then_exit(0);
//!
//! let mut session = SessionController::with_factory(target, move |events| {
//!     Ok(Box::new(script.spawn(events)) as Box<dyn BackendAdapter>)
//! });
//!
//! session.launch(LaunchRequest::new("/tmp/app").with_stop_at_entry(true))?;
//! session.process_events();
//! assert!(session.registers().is_some());
//! # Ok::<(), warden_core::error::SessionError>(())
//! ```

use std::fmt;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::adapter::{
    target_event_channel, AdapterFactory, BackendAdapter, BreakpointHandle, LaunchRequest,
    RemoteEndpoint, TargetEvent, TargetEventReceiver, TargetEventSender,
};
use crate::breakpoints::BreakpointSet;
use crate::error::{BackendError, BackendResult, SessionError, SessionResult};
use crate::events::{EventSinks, SessionEvent, SinkToken};
use crate::translate::AddressTranslator;
use crate::types::{
    Address, ModuleInfo, ModuleMap, ModuleOffset, ProcessId, ProcessInfo, RegisterFile,
    RegisterId, StackSlot, StopReason, TargetDescriptor, ThreadId, ThreadInfo,
};

/// Where a session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState
{
    /// No backend connection exists
    Inactive,
    /// A launch was accepted; waiting for the initial halt
    Launching,
    /// An attach or connect was accepted; waiting for the initial halt
    Attaching,
    /// The target is executing
    Running,
    /// The target is halted and its context is queryable
    Stopped,
    /// An orderly detach is in progress
    Detaching,
    /// An orderly kill is in progress
    Exiting,
}

impl fmt::Display for SessionState
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let name = match self {
            SessionState::Inactive => "inactive",
            SessionState::Launching => "launching",
            SessionState::Attaching => "attaching",
            SessionState::Running => "running",
            SessionState::Stopped => "stopped",
            SessionState::Detaching => "detaching",
            SessionState::Exiting => "exiting",
        };
        write!(f, "{name}")
    }
}

/// A breakpoint site currently installed backend-side
///
/// The overlay from set identity to the backend's handle for it. Per
/// connection state: rebuilt by reconciliation at every stop and dropped
/// at teardown, while the identity itself lives on in the set.
#[derive(Debug, Clone)]
struct ArmedBreakpoint
{
    site: ModuleOffset,
    address: Address,
    handle: BreakpointHandle,
}

/// One debug session over one target
///
/// See the [module documentation](self) for the full lifecycle.
pub struct SessionController
{
    target: TargetDescriptor,
    translator: AddressTranslator,
    factory: AdapterFactory,
    adapter: Option<Box<dyn BackendAdapter>>,
    inbox: Option<TargetEventReceiver>,
    state: SessionState,
    breakpoints: BreakpointSet,
    armed: Vec<ArmedBreakpoint>,
    modules: ModuleMap,
    threads: Vec<ThreadInfo>,
    registers: RegisterFile,
    ip: Address,
    active_thread: Option<ThreadId>,
    pid: Option<ProcessId>,
    exit_code: Option<i32>,
    stop_reason: Option<StopReason>,
    sinks: EventSinks,
    rebase_announced: bool,
    auto_resume: bool,
    saved_launch: Option<LaunchRequest>,
}

impl SessionController
{
    /// Create a session for `target`, building backends through `factory`
    ///
    /// The factory is invoked once per connection, including on restart,
    /// with the event sender the new adapter must report through.
    #[must_use]
    pub fn new(target: TargetDescriptor, factory: AdapterFactory) -> Self
    {
        let translator = AddressTranslator::new(&target);
        Self {
            target,
            translator,
            factory,
            adapter: None,
            inbox: None,
            state: SessionState::Inactive,
            breakpoints: BreakpointSet::new(),
            armed: Vec::new(),
            modules: ModuleMap::new(),
            threads: Vec::new(),
            registers: RegisterFile::new(),
            ip: Address::ZERO,
            active_thread: None,
            pid: None,
            exit_code: None,
            stop_reason: None,
            sinks: EventSinks::new(),
            rebase_announced: false,
            auto_resume: false,
            saved_launch: None,
        }
    }

    /// Create a session from a plain closure factory
    pub fn with_factory<F>(target: TargetDescriptor, factory: F) -> Self
    where
        F: FnMut(TargetEventSender) -> BackendResult<Box<dyn BackendAdapter>> + Send + 'static,
    {
        Self::new(target, Box::new(factory))
    }

    /// Create a session backed by this platform's local-process adapter
    #[must_use]
    pub fn local(target: TargetDescriptor) -> Self
    {
        Self::new(target, Box::new(crate::adapter::create_local_adapter))
    }

    // ---- observers ------------------------------------------------------

    /// Current lifecycle state
    #[must_use]
    pub const fn state(&self) -> SessionState
    {
        self.state
    }

    /// Whether a backend connection currently exists
    #[must_use]
    pub const fn is_connected(&self) -> bool
    {
        self.adapter.is_some()
    }

    /// The target this session was created for
    #[must_use]
    pub const fn target(&self) -> &TargetDescriptor
    {
        &self.target
    }

    /// The session's address translator
    #[must_use]
    pub const fn translator(&self) -> &AddressTranslator
    {
        &self.translator
    }

    /// Pid of the connected target, if any
    #[must_use]
    pub const fn pid(&self) -> Option<ProcessId>
    {
        self.pid
    }

    /// Exit code of the last target that exited on its own
    #[must_use]
    pub const fn exit_code(&self) -> Option<i32>
    {
        self.exit_code
    }

    /// Why the target is currently halted, when it is
    #[must_use]
    pub const fn stop_reason(&self) -> Option<StopReason>
    {
        self.stop_reason
    }

    /// Instruction pointer of the active thread while halted
    #[must_use]
    pub fn instruction_pointer(&self) -> Option<Address>
    {
        matches!(self.state, SessionState::Stopped).then(|| self.ip)
    }

    /// Current halt location in module-relative form
    #[must_use]
    pub fn current_site(&self) -> Option<ModuleOffset>
    {
        self.instruction_pointer()
            .map(|ip| self.translator.to_relative(ip, &self.modules))
    }

    /// Active thread of the halted target
    #[must_use]
    pub const fn active_thread(&self) -> Option<ThreadId>
    {
        self.active_thread
    }

    /// Copy of the module map as of the last refresh
    #[must_use]
    pub fn modules(&self) -> Vec<ModuleInfo>
    {
        self.modules.snapshot()
    }

    /// Copy of the thread list as of the last halt
    #[must_use]
    pub fn threads(&self) -> Vec<ThreadInfo>
    {
        self.threads.clone()
    }

    /// Copy of the active thread's registers while halted
    #[must_use]
    pub fn registers(&self) -> Option<RegisterFile>
    {
        matches!(self.state, SessionState::Stopped).then(|| self.registers.clone())
    }

    /// Copy of the breakpoint set, in insertion order
    #[must_use]
    pub fn breakpoints(&self) -> Vec<ModuleOffset>
    {
        self.breakpoints.snapshot()
    }

    /// Resolve a module-relative site against the current module map
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Translate`] when the site's module is not
    /// loaded.
    pub fn resolve_site(&self, site: &ModuleOffset) -> SessionResult<Address>
    {
        Ok(self.translator.to_absolute(site, &self.modules)?)
    }

    /// Express an absolute address in module-relative form
    #[must_use]
    pub fn site_of(&self, address: Address) -> ModuleOffset
    {
        self.translator.to_relative(address, &self.modules)
    }

    // ---- event sinks ----------------------------------------------------

    /// Register a sink for session lifecycle events
    ///
    /// Sinks run on the control thread, in registration order, and see
    /// every event published after registration exactly once.
    pub fn register_sink<F>(&mut self, sink: F) -> SinkToken
    where
        F: FnMut(&SessionEvent) + Send + 'static,
    {
        self.sinks.register(Box::new(sink))
    }

    /// Remove a previously registered sink
    pub fn remove_sink(&mut self, token: SinkToken) -> bool
    {
        self.sinks.remove(token)
    }

    fn publish(&mut self, event: SessionEvent)
    {
        self.sinks.broadcast(&event);
    }

    // ---- connection commands --------------------------------------------

    /// Launch a fresh target
    ///
    /// On success the session enters `Launching` and publishes
    /// [`SessionEvent::Launching`]; the backend's initial halt completes
    /// the transition to `Stopped`. Unless the request asked to stop at
    /// entry, the controller resumes the target automatically once that
    /// first halt has installed breakpoints.
    ///
    /// # Errors
    ///
    /// Rejected outside `Inactive`. Backend launch failures (missing
    /// image, permissions, an adapter that cannot launch) pass through
    /// typed and leave the session `Inactive`.
    pub fn launch(&mut self, request: LaunchRequest) -> SessionResult<()>
    {
        self.reject_unless("launch", matches!(self.state, SessionState::Inactive))?;

        let (events, inbox) = target_event_channel();
        let mut adapter = (self.factory)(events)?;
        let pid = adapter.launch(&request)?;
        info!(%pid, path = %request.path.display(), "target launched");

        self.adapter = Some(adapter);
        self.inbox = Some(inbox);
        self.pid = Some(pid);
        self.exit_code = None;
        self.stop_reason = None;
        self.rebase_announced = false;
        self.auto_resume = !request.stop_at_entry;
        self.saved_launch = Some(request);
        self.state = SessionState::Launching;
        self.publish(SessionEvent::Launching);
        Ok(())
    }

    /// Attach to an already running process
    ///
    /// # Errors
    ///
    /// Rejected outside `Inactive`; backend attach failures pass through
    /// typed and leave the session `Inactive`.
    pub fn attach(&mut self, pid: ProcessId) -> SessionResult<()>
    {
        self.reject_unless("attach", matches!(self.state, SessionState::Inactive))?;

        let (events, inbox) = target_event_channel();
        let mut adapter = (self.factory)(events)?;
        adapter.attach(pid)?;
        info!(%pid, "attached to target");

        self.adapter = Some(adapter);
        self.inbox = Some(inbox);
        self.pid = Some(pid);
        self.exit_code = None;
        self.stop_reason = None;
        self.rebase_announced = false;
        self.auto_resume = false;
        self.saved_launch = None;
        self.state = SessionState::Attaching;
        self.publish(SessionEvent::Attaching);
        Ok(())
    }

    /// Connect to a remote endpoint holding the target
    ///
    /// # Errors
    ///
    /// Rejected outside `Inactive`; transport refusals pass through typed
    /// and leave the session `Inactive`.
    pub fn connect(&mut self, endpoint: &RemoteEndpoint) -> SessionResult<()>
    {
        self.reject_unless("connect", matches!(self.state, SessionState::Inactive))?;

        let (events, inbox) = target_event_channel();
        let mut adapter = (self.factory)(events)?;
        adapter.connect_remote(endpoint)?;
        info!(%endpoint, "connected to remote target");

        self.adapter = Some(adapter);
        self.inbox = Some(inbox);
        self.pid = None;
        self.exit_code = None;
        self.stop_reason = None;
        self.rebase_announced = false;
        self.auto_resume = false;
        self.saved_launch = None;
        self.state = SessionState::Attaching;
        self.publish(SessionEvent::Attaching);
        Ok(())
    }

    /// Tear down and relaunch the last launched target
    ///
    /// Publishes [`SessionEvent::Restarting`] followed by the normal
    /// launch-flow events. Also valid after the target exited, as long as
    /// the session was originally started with [`launch`](Self::launch).
    ///
    /// # Errors
    ///
    /// Rejected when no launch request is on record (sessions started by
    /// attach or connect) or when a teardown is already in progress.
    pub fn restart(&mut self) -> SessionResult<()>
    {
        let allowed = matches!(
            self.state,
            SessionState::Inactive | SessionState::Stopped | SessionState::Running
        );
        let request = match self.saved_launch.clone() {
            Some(request) if allowed => request,
            _ => {
                return Err(SessionError::CommandRejected {
                    command: "restart",
                    state: self.state,
                });
            }
        };

        self.publish(SessionEvent::Restarting);
        if self.adapter.is_some() {
            if let Err(err) = self.backend()?.quit() {
                warn!(%err, "killing the old target during restart failed");
            }
            self.teardown();
        }
        self.launch(request)
    }

    /// Drop the transport to a remote target without releasing it
    ///
    /// The far side keeps the target and its installed breakpoints; only
    /// this side's session is torn down. Publishes
    /// [`SessionEvent::Detached`], since to the host the outcome is the
    /// same: the target is gone from this session and still running.
    ///
    /// # Errors
    ///
    /// Rejected unless the session is `Stopped` or `Running`; backends
    /// without a remote transport report
    /// [`BackendError::Unsupported`](crate::error::BackendError::Unsupported).
    pub fn disconnect(&mut self) -> SessionResult<()>
    {
        self.reject_unless(
            "disconnect",
            matches!(self.state, SessionState::Stopped | SessionState::Running),
        )?;
        if !self.backend()?.capabilities().connect {
            return Err(SessionError::Backend(BackendError::Unsupported(
                "disconnect_remote",
            )));
        }

        self.state = SessionState::Detaching;
        let result = self.backend()?.disconnect_remote();
        self.teardown();
        self.publish(SessionEvent::Detached);
        info!("disconnected from remote target");
        result.map_err(Into::into)
    }

    /// Release the target and let it keep running
    ///
    /// The session is torn down locally and publishes
    /// [`SessionEvent::Detached`] even when the backend reports a detach
    /// failure; the error is still returned so the host can surface it.
    ///
    /// # Errors
    ///
    /// Rejected unless the session is `Stopped` or `Running`.
    pub fn detach(&mut self) -> SessionResult<()>
    {
        self.reject_unless(
            "detach",
            matches!(self.state, SessionState::Stopped | SessionState::Running),
        )?;

        self.state = SessionState::Detaching;
        let result = self.backend()?.detach();
        self.teardown();
        self.publish(SessionEvent::Detached);
        info!("detached from target");
        result.map_err(Into::into)
    }

    /// Terminate the target and end the session
    ///
    /// # Errors
    ///
    /// Rejected unless the session is `Stopped` or `Running`.
    pub fn quit(&mut self) -> SessionResult<()>
    {
        self.reject_unless(
            "quit",
            matches!(self.state, SessionState::Stopped | SessionState::Running),
        )?;

        self.state = SessionState::Exiting;
        let result = self.backend()?.quit();
        self.teardown();
        self.publish(SessionEvent::QuitDebugging);
        info!("killed target");
        result.map_err(Into::into)
    }

    // ---- execution commands ---------------------------------------------

    /// Resume the halted target
    ///
    /// # Errors
    ///
    /// Rejected unless the session is `Stopped`.
    pub fn resume(&mut self) -> SessionResult<()>
    {
        self.reject_unless("resume", matches!(self.state, SessionState::Stopped))?;
        self.backend()?.resume()?;
        self.state = SessionState::Running;
        self.publish(SessionEvent::Resuming);
        Ok(())
    }

    /// Interrupt the running target; the halt arrives as an event
    ///
    /// # Errors
    ///
    /// Rejected unless the session is `Running`.
    pub fn pause(&mut self) -> SessionResult<()>
    {
        self.reject_unless("pause", matches!(self.state, SessionState::Running))?;
        self.backend()?.pause()?;
        Ok(())
    }

    /// Execute one instruction, following calls in
    ///
    /// # Errors
    ///
    /// Rejected unless the session is `Stopped`.
    pub fn step_into(&mut self) -> SessionResult<()>
    {
        self.step_command("step_into", SessionEvent::SteppingInto, |adapter| {
            adapter.step_into()
        })
    }

    /// Execute one instruction, stepping across calls
    ///
    /// # Errors
    ///
    /// Rejected unless the session is `Stopped`.
    pub fn step_over(&mut self) -> SessionResult<()>
    {
        self.step_command("step_over", SessionEvent::SteppingOver, |adapter| {
            adapter.step_over()
        })
    }

    /// Run until the current frame returns
    ///
    /// # Errors
    ///
    /// Rejected unless the session is `Stopped`.
    pub fn step_return(&mut self) -> SessionResult<()>
    {
        self.step_command("step_return", SessionEvent::SteppingReturn, |adapter| {
            adapter.step_return()
        })
    }

    /// Run until execution reaches an absolute address
    ///
    /// # Errors
    ///
    /// Rejected unless the session is `Stopped`.
    pub fn run_to(&mut self, address: Address) -> SessionResult<()>
    {
        self.step_command("run_to", SessionEvent::SteppingTo, |adapter| {
            adapter.step_to(address)
        })
    }

    /// Run until execution reaches a module-relative site
    ///
    /// # Errors
    ///
    /// Rejected unless the session is `Stopped`; fails with
    /// [`SessionError::Translate`] when the site's module is not loaded.
    pub fn run_to_site(&mut self, site: &ModuleOffset) -> SessionResult<()>
    {
        let address = self.resolve_site(site)?;
        self.run_to(address)
    }

    fn step_command(
        &mut self,
        command: &'static str,
        event: SessionEvent,
        op: impl FnOnce(&mut dyn BackendAdapter) -> BackendResult<()>,
    ) -> SessionResult<()>
    {
        self.reject_unless(command, matches!(self.state, SessionState::Stopped))?;
        op(self.backend()?)?;
        self.state = SessionState::Running;
        self.publish(event);
        Ok(())
    }

    // ---- breakpoints -----------------------------------------------------

    /// Add a breakpoint site, returning whether the set changed
    ///
    /// The set accepts sites in any session state. While the target is
    /// halted on a capable backend and the site's module is loaded, the
    /// breakpoint is mirrored immediately; otherwise it is installed by
    /// reconciliation at the next stop.
    pub fn add_breakpoint(&mut self, site: ModuleOffset) -> bool
    {
        if !self.breakpoints.add(site.clone()) {
            return false;
        }
        debug!(%site, "breakpoint added");
        self.mirror_add(&site);
        true
    }

    /// Remove a breakpoint site, returning whether the set changed
    pub fn remove_breakpoint(&mut self, site: &ModuleOffset) -> bool
    {
        if !self.breakpoints.remove(site) {
            return false;
        }
        debug!(%site, "breakpoint removed");
        self.mirror_remove(site);
        true
    }

    /// Flip a site's membership, returning whether it is now set
    pub fn toggle_breakpoint(&mut self, site: ModuleOffset) -> bool
    {
        if self.breakpoints.contains(&site) {
            self.remove_breakpoint(&site);
            false
        } else {
            self.add_breakpoint(site);
            true
        }
    }

    /// Toggle the breakpoint at an absolute address
    ///
    /// The address is first expressed module-relatively, so the resulting
    /// site keeps working after a restart places the module elsewhere.
    pub fn toggle_breakpoint_at(&mut self, address: Address) -> bool
    {
        let site = self.site_of(address);
        self.toggle_breakpoint(site)
    }

    fn mirror_add(&mut self, site: &ModuleOffset)
    {
        // Adapters only service control requests while the target is
        // halted; a running local tracee is parked in waitpid. Sites
        // added in any other state are picked up by reconciliation.
        if !matches!(self.state, SessionState::Stopped) {
            debug!(%site, "target not halted; breakpoint deferred to the next stop");
            return;
        }
        let address = match self.translator.to_absolute(site, &self.modules) {
            Ok(address) => address,
            Err(_) => {
                debug!(%site, "module not loaded; breakpoint deferred to the next stop");
                return;
            }
        };
        let adapter = match self.adapter.as_deref_mut() {
            Some(adapter) => adapter,
            None => return,
        };
        if !adapter.capabilities().breakpoints {
            debug!(%site, "backend has no breakpoint support; keeping the site host-side");
            return;
        }
        match adapter.set_breakpoint(address) {
            Ok(handle) => self.armed.push(ArmedBreakpoint {
                site: site.clone(),
                address,
                handle,
            }),
            Err(err) => {
                warn!(%site, %address, %err, "backend rejected breakpoint; will retry at the next stop");
            }
        }
    }

    fn mirror_remove(&mut self, site: &ModuleOffset)
    {
        // Same halt gate as mirror_add. The armed entry stays put; the
        // next reconciliation sees the site is gone and clears it.
        if !matches!(self.state, SessionState::Stopped) {
            debug!(%site, "target not halted; removal deferred to the next stop");
            return;
        }
        let index = match self.armed.iter().position(|entry| entry.site == *site) {
            Some(index) => index,
            None => return,
        };
        let entry = self.armed.remove(index);
        let adapter = match self.adapter.as_deref_mut() {
            Some(adapter) => adapter,
            None => return,
        };
        if let Err(err) = adapter.clear_breakpoint(entry.handle) {
            warn!(%site, address = %entry.address, %err, "backend failed to clear breakpoint");
        }
    }

    // ---- halted-context commands ----------------------------------------

    /// Read target memory while halted
    ///
    /// # Errors
    ///
    /// Rejected unless the session is `Stopped`; per-address faults
    /// surface as [`BackendError::MemoryAccess`].
    pub fn read_memory(&mut self, address: Address, len: usize) -> SessionResult<Vec<u8>>
    {
        self.reject_unless("read_memory", matches!(self.state, SessionState::Stopped))?;
        Ok(self.backend()?.read_memory(address, len)?)
    }

    /// Write target memory while halted
    ///
    /// # Errors
    ///
    /// Rejected unless the session is `Stopped`.
    pub fn write_memory(&mut self, address: Address, data: &[u8]) -> SessionResult<usize>
    {
        self.reject_unless("write_memory", matches!(self.state, SessionState::Stopped))?;
        Ok(self.backend()?.write_memory(address, data)?)
    }

    /// Write one register of the active thread while halted
    ///
    /// # Errors
    ///
    /// Rejected unless the session is `Stopped`.
    pub fn write_register(&mut self, id: RegisterId, value: u64) -> SessionResult<()>
    {
        self.reject_unless("write_register", matches!(self.state, SessionState::Stopped))?;
        self.backend()?.write_register(id, value)?;
        let _ = self.registers.set(id, value);
        if matches!(id, RegisterId::Pc) {
            self.ip = Address::new(value);
        }
        Ok(())
    }

    /// Switch the thread whose context the session reports
    ///
    /// # Errors
    ///
    /// Rejected unless the session is `Stopped`.
    pub fn set_active_thread(&mut self, thread: ThreadId) -> SessionResult<()>
    {
        self.reject_unless(
            "set_active_thread",
            matches!(self.state, SessionState::Stopped),
        )?;
        self.backend()?.set_active_thread(thread)?;
        self.active_thread = Some(thread);
        self.refresh_registers();
        Ok(())
    }

    /// A window of stack slots around the active thread's stack pointer
    ///
    /// The window spans `words_before` eight-byte words below the stack
    /// pointer and `words_after` words at and above it, clamped at
    /// address zero. Outside `Stopped` the window is empty. Unreadable
    /// slots are reported with an explicit `None` value rather than
    /// failing the whole window.
    pub fn stack_window(&mut self, words_before: usize, words_after: usize) -> Vec<StackSlot>
    {
        if !matches!(self.state, SessionState::Stopped) {
            return Vec::new();
        }
        let sp = self.registers.sp;
        let first = sp.value().saturating_sub(words_before as u64 * 8);
        let mut slots = Vec::with_capacity(words_before + words_after);
        for index in 0..(words_before + words_after) {
            let address = Address::new(first.saturating_add(index as u64 * 8));
            let value = match self.adapter.as_deref_mut() {
                Some(adapter) => adapter
                    .read_memory(address, 8)
                    .ok()
                    .and_then(|bytes| <[u8; 8]>::try_from(bytes).ok())
                    .map(u64::from_le_bytes),
                None => None,
            };
            slots.push(StackSlot::new(address, value));
        }
        slots
    }

    /// Enumerate processes the backend could attach to
    ///
    /// Works without an active connection by building a throwaway
    /// adapter, which is how an attach picker is populated.
    ///
    /// # Errors
    ///
    /// Fails with [`BackendError::Unsupported`] on backends without a
    /// process list.
    pub fn list_processes(&mut self) -> SessionResult<Vec<ProcessInfo>>
    {
        if let Some(adapter) = self.adapter.as_deref_mut() {
            return Ok(adapter.list_processes()?);
        }
        let (events, _inbox) = target_event_channel();
        let mut adapter = (self.factory)(events)?;
        Ok(adapter.list_processes()?)
    }

    // ---- event handling --------------------------------------------------

    /// Drain and apply every pending target event without blocking
    ///
    /// Returns how many events were handled. Hosts with their own loop
    /// call this whenever the adapter might have reported something.
    pub fn process_events(&mut self) -> usize
    {
        let mut handled = 0;
        loop {
            let event = match &self.inbox {
                Some(inbox) => match inbox.try_recv() {
                    Ok(event) => event,
                    Err(_) => break,
                },
                None => break,
            };
            self.handle_target_event(event);
            handled += 1;
        }
        handled
    }

    /// Wait up to `timeout` for target activity, then drain the backlog
    ///
    /// Returns how many events were handled; zero means the wait timed
    /// out with the target still running.
    pub fn pump_events(&mut self, timeout: Duration) -> usize
    {
        let first = match &self.inbox {
            Some(inbox) => match inbox.recv_timeout(timeout) {
                Ok(event) => event,
                Err(_) => return 0,
            },
            None => return 0,
        };
        self.handle_target_event(first);
        1 + self.process_events()
    }

    fn handle_target_event(&mut self, event: TargetEvent)
    {
        match event {
            TargetEvent::Stopped { reason } => match self.state {
                SessionState::Launching | SessionState::Attaching | SessionState::Running => {
                    self.enter_stop(reason);
                }
                other => {
                    debug!(%reason, state = %other, "dropping stray stop event");
                }
            },
            TargetEvent::Exited { code } => {
                if matches!(self.state, SessionState::Inactive) {
                    debug!(code, "dropping stray exit event");
                    return;
                }
                info!(code, "target exited");
                self.exit_code = Some(code);
                self.teardown();
                self.publish(SessionEvent::TargetExited(code));
            }
            TargetEvent::Disconnected => {
                if matches!(self.state, SessionState::Inactive) {
                    debug!("dropping stray disconnect event");
                    return;
                }
                warn!("backend disconnected unexpectedly");
                self.teardown();
                self.publish(SessionEvent::BackendDisconnected);
            }
        }
    }

    /// The stop pipeline: refresh, recompute, reconcile, publish
    fn enter_stop(&mut self, reason: StopReason)
    {
        let first_stop = matches!(
            self.state,
            SessionState::Launching | SessionState::Attaching
        );
        self.state = SessionState::Stopped;
        self.stop_reason = Some(reason);

        self.refresh_modules();
        self.announce_rebase();
        self.refresh_threads();
        self.refresh_registers();
        self.reconcile_breakpoints();

        self.publish(SessionEvent::TargetStopped(reason));

        if first_stop && std::mem::take(&mut self.auto_resume) {
            if let Some(adapter) = self.adapter.as_deref_mut() {
                match adapter.resume() {
                    Ok(()) => {
                        self.state = SessionState::Running;
                        self.publish(SessionEvent::Resuming);
                    }
                    Err(err) => warn!(%err, "automatic resume after launch failed"),
                }
            }
        }
    }

    fn refresh_modules(&mut self)
    {
        let adapter = match self.adapter.as_deref_mut() {
            Some(adapter) => adapter,
            None => return,
        };
        match adapter.list_modules() {
            Ok(list) => self.modules.rebuild(list),
            Err(err) => warn!(%err, "module refresh failed; keeping the previous map"),
        }
    }

    /// Announce the primary module's runtime base, once per connection
    fn announce_rebase(&mut self)
    {
        if self.rebase_announced {
            return;
        }
        if let Some(base) = self.translator.runtime_base(&self.modules) {
            self.rebase_announced = true;
            info!(%base, module = self.translator.primary_module(), "live view rebased");
            self.publish(SessionEvent::InitialViewRebased { base });
        }
    }

    fn refresh_threads(&mut self)
    {
        let adapter = match self.adapter.as_deref_mut() {
            Some(adapter) => adapter,
            None => return,
        };
        match adapter.list_threads() {
            Ok(list) => self.threads = list,
            Err(err) => warn!(%err, "thread refresh failed; keeping the previous list"),
        }
        match adapter.active_thread() {
            Ok(active) => self.active_thread = Some(active),
            Err(err) => debug!(%err, "backend reported no active thread"),
        }
    }

    fn refresh_registers(&mut self)
    {
        let adapter = match self.adapter.as_deref_mut() {
            Some(adapter) => adapter,
            None => return,
        };
        match adapter.read_registers() {
            Ok(file) => {
                self.ip = file.pc;
                self.registers = file;
                if let Some(active) = self.active_thread {
                    for thread in &mut self.threads {
                        if thread.id == active {
                            thread.ip = self.ip;
                        }
                    }
                }
            }
            Err(err) => warn!(%err, "register refresh failed"),
        }
    }

    /// Drive the backend's installed breakpoints to match the set
    ///
    /// Only sites whose module is currently loaded participate. When the
    /// backend cannot report what it has installed, reconciliation is
    /// skipped for this stop rather than guessed at.
    fn reconcile_breakpoints(&mut self)
    {
        let adapter = match self.adapter.as_deref_mut() {
            Some(adapter) => adapter,
            None => return,
        };
        if !adapter.capabilities().breakpoints {
            return;
        }

        let mut desired: Vec<(ModuleOffset, Address)> = Vec::with_capacity(self.breakpoints.len());
        for site in &self.breakpoints {
            if let Ok(address) = self.translator.to_absolute(site, &self.modules) {
                desired.push((site.clone(), address));
            }
        }

        let installed = match adapter.list_backend_breakpoints() {
            Ok(list) => list,
            Err(err) => {
                warn!(%err, "cannot audit backend breakpoints; skipping reconciliation");
                return;
            }
        };

        let mut armed = Vec::with_capacity(desired.len());
        for (site, address) in desired {
            match installed.iter().find(|(at, _)| *at == address) {
                Some((_, handle)) => armed.push(ArmedBreakpoint {
                    site,
                    address,
                    handle: *handle,
                }),
                None => match adapter.set_breakpoint(address) {
                    Ok(handle) => armed.push(ArmedBreakpoint {
                        site,
                        address,
                        handle,
                    }),
                    Err(err) => warn!(%address, %err, "failed to install breakpoint"),
                },
            }
        }
        for (address, handle) in installed {
            if armed.iter().any(|entry| entry.address == address) {
                continue;
            }
            if let Err(err) = adapter.clear_breakpoint(handle) {
                warn!(%address, %err, "failed to remove stale breakpoint");
            }
        }
        self.armed = armed;
    }

    /// Drop the connection and reset per-connection state
    ///
    /// The breakpoint set, the saved launch request, and the recorded
    /// exit code all survive teardown.
    fn teardown(&mut self)
    {
        self.adapter = None;
        self.inbox = None;
        self.state = SessionState::Inactive;
        self.armed.clear();
        self.modules.clear();
        self.threads.clear();
        self.registers = RegisterFile::new();
        self.ip = Address::ZERO;
        self.active_thread = None;
        self.pid = None;
        self.stop_reason = None;
        self.rebase_announced = false;
        self.auto_resume = false;
    }

    // ---- plumbing --------------------------------------------------------

    fn backend(&mut self) -> SessionResult<&mut (dyn BackendAdapter + 'static)>
    {
        self.adapter
            .as_deref_mut()
            .ok_or(SessionError::Backend(BackendError::Disconnected))
    }

    fn reject_unless(&self, command: &'static str, allowed: bool) -> SessionResult<()>
    {
        if allowed {
            Ok(())
        } else {
            debug!(command, state = %self.state, "command rejected");
            Err(SessionError::CommandRejected {
                command,
                state: self.state,
            })
        }
    }
}

impl fmt::Debug for SessionController
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("SessionController")
            .field("target", &self.target.module)
            .field("state", &self.state)
            .field("pid", &self.pid)
            .field("breakpoints", &self.breakpoints.len())
            .field("sinks", &self.sinks.len())
            .finish_non_exhaustive()
    }
}
