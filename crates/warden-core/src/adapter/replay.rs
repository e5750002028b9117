//! # Replay Adapter
//!
//! A scripted in-memory backend for tests and demos.
//!
//! A [`ReplayScript`] is a linear tape of target activity: every command
//! that lets the target run (launch, attach, connect, resume, the step
//! family, pause) consumes the next tape entry and posts it as a
//! [`TargetEvent`]. Everything else the controller might ask for between
//! halts (modules, threads, registers, memory, breakpoints) is answered
//! from the world each scripted stop installed, so a test can walk a
//! whole session without a real target anywhere.
//!
//! The script is an immutable recipe: [`ReplayScript::spawn`] produces a
//! fresh adapter with its own copy of the tape, which is exactly what a
//! restart needs. The paired [`ReplayHandle`] shares the live adapter's
//! state so tests can assert on the commands it received after the
//! session is gone.
//!
//! ## Example
//!
//! ```rust
//! use warden_core::adapter::replay::{ReplayScript, ScriptedStop};
//! use warden_core::adapter::{target_event_channel, BackendAdapter, LaunchRequest, TargetEvent};
//! use warden_core::types::{Address, StopReason};
//!
//! let script = ReplayScript::new()
//!     .then_stop(ScriptedStop::new(StopReason::InitialBreakpoint, Address::new(0x1000)))
//!     .then_exit(0);
//!
//! let (events, inbox) = target_event_channel();
//! let mut adapter = script.spawn(events);
//! adapter.launch(&LaunchRequest::new("/tmp/app")).unwrap();
//!
//! assert_eq!(
//!     inbox.try_recv().unwrap(),
//!     TargetEvent::Stopped { reason: StopReason::InitialBreakpoint },
//! );
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::trace;

use crate::adapter::{
    AdapterCapabilities, AdapterKind, BackendAdapter, BreakpointHandle, LaunchRequest,
    RemoteEndpoint, TargetEvent, TargetEventSender,
};
use crate::error::{BackendError, BackendResult};
use crate::types::{
    Address, ModuleInfo, ProcessId, ProcessInfo, RegisterFile, RegisterId, StopReason, ThreadId,
    ThreadInfo,
};

/// One scripted halt of the target
///
/// Carries the world as of this halt. Modules and threads left unset
/// keep their previous value, except that threads default to a single
/// thread sitting at the halt address when none were ever scripted.
#[derive(Debug, Clone)]
pub struct ScriptedStop
{
    /// Why the target halts
    pub reason: StopReason,
    /// Instruction pointer at the halt
    pub ip: Address,
    /// Stack pointer at the halt, unchanged when `None`
    pub sp: Option<Address>,
    /// Module list as of the halt, unchanged when `None`
    pub modules: Option<Vec<ModuleInfo>>,
    /// Thread list as of the halt
    pub threads: Option<Vec<ThreadInfo>>,
}

impl ScriptedStop
{
    /// Halt with `reason` at `ip`, leaving the rest of the world as is
    #[must_use]
    pub const fn new(reason: StopReason, ip: Address) -> Self
    {
        Self {
            reason,
            ip,
            sp: None,
            modules: None,
            threads: None,
        }
    }

    /// Set the stack pointer at this halt
    #[must_use]
    pub const fn with_sp(mut self, sp: Address) -> Self
    {
        self.sp = Some(sp);
        self
    }

    /// Replace the module list as of this halt
    #[must_use]
    pub fn with_modules(mut self, modules: Vec<ModuleInfo>) -> Self
    {
        self.modules = Some(modules);
        self
    }

    /// Replace the thread list as of this halt
    #[must_use]
    pub fn with_threads(mut self, threads: Vec<ThreadInfo>) -> Self
    {
        self.threads = Some(threads);
        self
    }
}

/// A tape entry: what the target does next time it runs
#[derive(Debug, Clone)]
enum ScriptedEvent
{
    Stop(ScriptedStop),
    Exit(i32),
    Disconnect,
}

/// A synchronous failure the script injects into a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedFailure
{
    /// Launch fails because the image does not exist
    TargetNotFound(String),
    /// Launch or attach fails on permissions
    PermissionDenied(String),
    /// Remote connect is refused
    TransportRefused(String),
    /// A post-attach primitive fails
    OperationFailed(String),
}

impl ScriptedFailure
{
    fn to_error(&self) -> BackendError
    {
        match self {
            ScriptedFailure::TargetNotFound(what) => BackendError::TargetNotFound(what.clone()),
            ScriptedFailure::PermissionDenied(what) => BackendError::PermissionDenied(what.clone()),
            ScriptedFailure::TransportRefused(what) => BackendError::TransportRefused(what.clone()),
            ScriptedFailure::OperationFailed(what) => BackendError::OperationFailed(what.clone()),
        }
    }
}

/// A command the adapter received, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayCall
{
    Launch(PathBuf),
    Attach(ProcessId),
    Connect(String),
    Disconnect,
    Detach,
    Quit,
    Resume,
    Pause,
    StepInto,
    StepOver,
    StepReturn,
    StepTo(Address),
    SetBreakpoint(Address),
    /// Recorded by the address the cleared handle was installed at
    ClearBreakpoint(Address),
    WriteRegister(RegisterId, u64),
    SetActiveThread(ThreadId),
}

/// Recipe for a replay session
///
/// Compose the tape with the `then_*` methods, stage memory and failure
/// injection, then [`spawn`](Self::spawn) as many independent adapters
/// from it as the test needs.
#[derive(Debug, Clone)]
pub struct ReplayScript
{
    tape: Vec<ScriptedEvent>,
    capabilities: AdapterCapabilities,
    pid: ProcessId,
    processes: Vec<ProcessInfo>,
    memory: Vec<(u64, Vec<u8>)>,
    launch_failure: Option<ScriptedFailure>,
    fail_breakpoint_at: Vec<Address>,
    fail_breakpoint_list: bool,
}

impl ReplayScript
{
    /// Empty script with full capabilities
    #[must_use]
    pub fn new() -> Self
    {
        Self {
            tape: Vec::new(),
            capabilities: AdapterCapabilities::full(),
            pid: ProcessId(4242),
            processes: Vec::new(),
            memory: Vec::new(),
            launch_failure: None,
            fail_breakpoint_at: Vec::new(),
            fail_breakpoint_list: false,
        }
    }

    /// Append a halt to the tape
    #[must_use]
    pub fn then_stop(mut self, stop: ScriptedStop) -> Self
    {
        self.tape.push(ScriptedEvent::Stop(stop));
        self
    }

    /// Append a target exit to the tape
    #[must_use]
    pub fn then_exit(mut self, code: i32) -> Self
    {
        self.tape.push(ScriptedEvent::Exit(code));
        self
    }

    /// Append an unexpected transport loss to the tape
    #[must_use]
    pub fn then_disconnect(mut self) -> Self
    {
        self.tape.push(ScriptedEvent::Disconnect);
        self
    }

    /// Replace the capability profile spawned adapters advertise
    #[must_use]
    pub const fn with_capabilities(mut self, capabilities: AdapterCapabilities) -> Self
    {
        self.capabilities = capabilities;
        self
    }

    /// Pid reported for launched targets
    #[must_use]
    pub const fn with_pid(mut self, pid: ProcessId) -> Self
    {
        self.pid = pid;
        self
    }

    /// Processes reported by `list_processes`
    #[must_use]
    pub fn with_processes(mut self, processes: Vec<ProcessInfo>) -> Self
    {
        self.processes = processes;
        self
    }

    /// Stage a readable and writable memory region at `base`
    #[must_use]
    pub fn with_memory_region(mut self, base: Address, bytes: Vec<u8>) -> Self
    {
        self.memory.push((base.value(), bytes));
        self
    }

    /// Make launch, attach, and connect fail with the given error
    #[must_use]
    pub fn with_launch_failure(mut self, failure: ScriptedFailure) -> Self
    {
        self.launch_failure = Some(failure);
        self
    }

    /// Make `set_breakpoint` at `address` fail
    #[must_use]
    pub fn with_breakpoint_failure_at(mut self, address: Address) -> Self
    {
        self.fail_breakpoint_at.push(address);
        self
    }

    /// Make `list_backend_breakpoints` fail
    #[must_use]
    pub const fn with_breakpoint_list_failure(mut self) -> Self
    {
        self.fail_breakpoint_list = true;
        self
    }

    /// Create a fresh adapter holding its own copy of the tape
    #[must_use]
    pub fn spawn(&self, events: TargetEventSender) -> ReplayAdapter
    {
        let state = ReplayState {
            tape: self.tape.iter().cloned().collect(),
            live: false,
            launched_with: None,
            modules: Vec::new(),
            threads: Vec::new(),
            active: ThreadId(1),
            registers: RegisterFile::new(),
            installed: Vec::new(),
            next_handle: 1,
            memory: self.memory.clone(),
            calls: Vec::new(),
            processes: self.processes.clone(),
            launch_failure: self.launch_failure.clone(),
            fail_breakpoint_at: self.fail_breakpoint_at.clone(),
            fail_breakpoint_list: self.fail_breakpoint_list,
        };
        ReplayAdapter {
            state: Arc::new(Mutex::new(state)),
            events,
            capabilities: self.capabilities,
            pid: self.pid,
        }
    }
}

impl Default for ReplayScript
{
    fn default() -> Self
    {
        Self::new()
    }
}

/// Live state shared between an adapter and its handle
#[derive(Debug)]
struct ReplayState
{
    tape: VecDeque<ScriptedEvent>,
    live: bool,
    launched_with: Option<LaunchRequest>,
    modules: Vec<ModuleInfo>,
    threads: Vec<ThreadInfo>,
    active: ThreadId,
    registers: RegisterFile,
    installed: Vec<(Address, BreakpointHandle)>,
    next_handle: u64,
    memory: Vec<(u64, Vec<u8>)>,
    calls: Vec<ReplayCall>,
    processes: Vec<ProcessInfo>,
    launch_failure: Option<ScriptedFailure>,
    fail_breakpoint_at: Vec<Address>,
    fail_breakpoint_list: bool,
}

impl ReplayState
{
    fn require_live(&self) -> BackendResult<()>
    {
        if self.live {
            Ok(())
        } else {
            Err(BackendError::OperationFailed("no live target".into()))
        }
    }

    fn apply_stop(&mut self, stop: &ScriptedStop)
    {
        self.registers.pc = stop.ip;
        if let Some(sp) = stop.sp {
            self.registers.sp = sp;
        }
        if let Some(modules) = &stop.modules {
            self.modules = modules.clone();
        }
        match &stop.threads {
            Some(threads) => self.threads = threads.clone(),
            None => self.threads = vec![ThreadInfo::new(self.active, stop.ip)],
        }
    }
}

/// Scripted backend spawned from a [`ReplayScript`]
pub struct ReplayAdapter
{
    state: Arc<Mutex<ReplayState>>,
    events: TargetEventSender,
    capabilities: AdapterCapabilities,
    pid: ProcessId,
}

impl ReplayAdapter
{
    /// Handle onto this adapter's state for test assertions
    #[must_use]
    pub fn handle(&self) -> ReplayHandle
    {
        ReplayHandle {
            state: Arc::clone(&self.state),
        }
    }

    fn state(&self) -> MutexGuard<'_, ReplayState>
    {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn require(&self, allowed: bool, what: &'static str) -> BackendResult<()>
    {
        if allowed {
            Ok(())
        } else {
            Err(BackendError::Unsupported(what))
        }
    }

    /// Let the target run: consume the next tape entry and post it
    ///
    /// An exhausted tape means the target just keeps running, which is a
    /// legal state for the controller to sit in.
    fn advance(&mut self, trigger: ReplayCall) -> BackendResult<()>
    {
        let mut state = self.state();
        state.require_live()?;
        state.calls.push(trigger);

        match state.tape.pop_front() {
            Some(ScriptedEvent::Stop(stop)) => {
                state.apply_stop(&stop);
                trace!(reason = %stop.reason, ip = %stop.ip, "replay target stopped");
                let _ = self.events.send(TargetEvent::Stopped { reason: stop.reason });
            }
            Some(ScriptedEvent::Exit(code)) => {
                state.live = false;
                trace!(code, "replay target exited");
                let _ = self.events.send(TargetEvent::Exited { code });
            }
            Some(ScriptedEvent::Disconnect) => {
                state.live = false;
                trace!("replay transport lost");
                let _ = self.events.send(TargetEvent::Disconnected);
            }
            None => {
                trace!("replay tape exhausted, target keeps running");
            }
        }
        Ok(())
    }

    fn begin_session(&mut self, trigger: ReplayCall) -> BackendResult<()>
    {
        {
            let mut state = self.state();
            if state.live {
                return Err(BackendError::AlreadyAttached(self.pid));
            }
            if let Some(failure) = &state.launch_failure {
                return Err(failure.to_error());
            }
            state.live = true;
            state.calls.push(trigger);
        }
        // The initial halt is the first tape entry.
        let mut state = self.state();
        match state.tape.pop_front() {
            Some(ScriptedEvent::Stop(stop)) => {
                state.apply_stop(&stop);
                let _ = self.events.send(TargetEvent::Stopped { reason: stop.reason });
            }
            Some(ScriptedEvent::Exit(code)) => {
                state.live = false;
                let _ = self.events.send(TargetEvent::Exited { code });
            }
            Some(ScriptedEvent::Disconnect) => {
                state.live = false;
                let _ = self.events.send(TargetEvent::Disconnected);
            }
            None => {}
        }
        Ok(())
    }
}

impl BackendAdapter for ReplayAdapter
{
    fn kind(&self) -> AdapterKind
    {
        AdapterKind::Replay
    }

    fn capabilities(&self) -> AdapterCapabilities
    {
        self.capabilities
    }

    fn launch(&mut self, request: &LaunchRequest) -> BackendResult<ProcessId>
    {
        self.require(self.capabilities.launch, "launch")?;
        self.state().launched_with = Some(request.clone());
        self.begin_session(ReplayCall::Launch(request.path.clone()))?;
        Ok(self.pid)
    }

    fn attach(&mut self, pid: ProcessId) -> BackendResult<()>
    {
        self.require(self.capabilities.attach, "attach")?;
        self.begin_session(ReplayCall::Attach(pid))
    }

    fn connect_remote(&mut self, endpoint: &RemoteEndpoint) -> BackendResult<()>
    {
        self.require(self.capabilities.connect, "connect_remote")?;
        self.begin_session(ReplayCall::Connect(endpoint.to_string()))
    }

    fn disconnect_remote(&mut self) -> BackendResult<()>
    {
        self.require(self.capabilities.connect, "disconnect_remote")?;
        let mut state = self.state();
        state.require_live()?;
        state.live = false;
        state.calls.push(ReplayCall::Disconnect);
        Ok(())
    }

    fn detach(&mut self) -> BackendResult<()>
    {
        let mut state = self.state();
        state.require_live()?;
        state.live = false;
        state.calls.push(ReplayCall::Detach);
        Ok(())
    }

    fn quit(&mut self) -> BackendResult<()>
    {
        let mut state = self.state();
        state.require_live()?;
        state.live = false;
        state.calls.push(ReplayCall::Quit);
        Ok(())
    }

    fn resume(&mut self) -> BackendResult<()>
    {
        self.advance(ReplayCall::Resume)
    }

    fn pause(&mut self) -> BackendResult<()>
    {
        self.require(self.capabilities.pause, "pause")?;
        {
            // A pause always halts the target, so an exhausted tape
            // synthesizes a halt at the current instruction pointer.
            let mut state = self.state();
            state.require_live()?;
            if state.tape.is_empty() {
                state.calls.push(ReplayCall::Pause);
                let stop = ScriptedStop::new(StopReason::Pause, state.registers.pc);
                state.apply_stop(&stop);
                trace!(ip = %stop.ip, "replay target paused");
                let _ = self.events.send(TargetEvent::Stopped {
                    reason: StopReason::Pause,
                });
                return Ok(());
            }
        }
        self.advance(ReplayCall::Pause)
    }

    fn step_into(&mut self) -> BackendResult<()>
    {
        self.require(self.capabilities.stepping, "step_into")?;
        self.advance(ReplayCall::StepInto)
    }

    fn step_over(&mut self) -> BackendResult<()>
    {
        self.require(self.capabilities.stepping, "step_over")?;
        self.advance(ReplayCall::StepOver)
    }

    fn step_return(&mut self) -> BackendResult<()>
    {
        self.require(self.capabilities.stepping, "step_return")?;
        self.advance(ReplayCall::StepReturn)
    }

    fn step_to(&mut self, address: Address) -> BackendResult<()>
    {
        self.require(self.capabilities.stepping, "step_to")?;
        self.advance(ReplayCall::StepTo(address))
    }

    fn set_breakpoint(&mut self, address: Address) -> BackendResult<BreakpointHandle>
    {
        self.require(self.capabilities.breakpoints, "set_breakpoint")?;
        let mut state = self.state();
        state.calls.push(ReplayCall::SetBreakpoint(address));
        if state.fail_breakpoint_at.contains(&address) {
            return Err(BackendError::OperationFailed(format!(
                "injected breakpoint failure at {address}"
            )));
        }
        if let Some((_, handle)) = state.installed.iter().find(|(at, _)| *at == address) {
            return Ok(*handle);
        }
        let handle = BreakpointHandle(state.next_handle);
        state.next_handle += 1;
        state.installed.push((address, handle));
        Ok(handle)
    }

    fn clear_breakpoint(&mut self, handle: BreakpointHandle) -> BackendResult<()>
    {
        self.require(self.capabilities.breakpoints, "clear_breakpoint")?;
        let mut state = self.state();
        let index = match state.installed.iter().position(|(_, installed)| *installed == handle) {
            Some(index) => index,
            // Clearing a handle the backend no longer knows is a no-op.
            None => return Ok(()),
        };
        let (address, _) = state.installed.remove(index);
        state.calls.push(ReplayCall::ClearBreakpoint(address));
        Ok(())
    }

    fn list_backend_breakpoints(&mut self) -> BackendResult<Vec<(Address, BreakpointHandle)>>
    {
        let state = self.state();
        if state.fail_breakpoint_list {
            return Err(BackendError::OperationFailed(
                "injected breakpoint list failure".into(),
            ));
        }
        Ok(state.installed.clone())
    }

    fn read_memory(&mut self, address: Address, len: usize) -> BackendResult<Vec<u8>>
    {
        let state = self.state();
        state.require_live()?;
        let start = address.value();
        let needed_end = match start.checked_add(len as u64) {
            Some(end) => end,
            None => return Err(BackendError::MemoryAccess(address)),
        };
        for (base, bytes) in &state.memory {
            let end = base + bytes.len() as u64;
            if start >= *base && needed_end <= end {
                let offset = (start - base) as usize;
                return Ok(bytes[offset..offset + len].to_vec());
            }
        }
        Err(BackendError::MemoryAccess(address))
    }

    fn write_memory(&mut self, address: Address, data: &[u8]) -> BackendResult<usize>
    {
        self.require(self.capabilities.write_memory, "write_memory")?;
        let mut state = self.state();
        state.require_live()?;
        let start = address.value();
        let needed_end = match start.checked_add(data.len() as u64) {
            Some(end) => end,
            None => return Err(BackendError::MemoryAccess(address)),
        };
        for (base, bytes) in &mut state.memory {
            let end = *base + bytes.len() as u64;
            if start >= *base && needed_end <= end {
                let offset = (start - *base) as usize;
                bytes[offset..offset + data.len()].copy_from_slice(data);
                return Ok(data.len());
            }
        }
        Err(BackendError::MemoryAccess(address))
    }

    fn read_registers(&mut self) -> BackendResult<RegisterFile>
    {
        let state = self.state();
        state.require_live()?;
        Ok(state.registers.clone())
    }

    fn write_register(&mut self, id: RegisterId, value: u64) -> BackendResult<()>
    {
        self.require(self.capabilities.write_registers, "write_register")?;
        let mut state = self.state();
        state.require_live()?;
        state.calls.push(ReplayCall::WriteRegister(id, value));
        state
            .registers
            .set(id, value)
            .ok_or_else(|| BackendError::OperationFailed("unknown register".into()))
    }

    fn list_modules(&mut self) -> BackendResult<Vec<ModuleInfo>>
    {
        let state = self.state();
        state.require_live()?;
        Ok(state.modules.clone())
    }

    fn list_threads(&mut self) -> BackendResult<Vec<ThreadInfo>>
    {
        let state = self.state();
        state.require_live()?;
        Ok(state.threads.clone())
    }

    fn active_thread(&mut self) -> BackendResult<ThreadId>
    {
        let state = self.state();
        state.require_live()?;
        Ok(state.active)
    }

    fn set_active_thread(&mut self, thread: ThreadId) -> BackendResult<()>
    {
        let mut state = self.state();
        state.require_live()?;
        if !state.threads.iter().any(|info| info.id == thread) {
            return Err(BackendError::OperationFailed(format!(
                "no such thread {thread}"
            )));
        }
        state.active = thread;
        state.calls.push(ReplayCall::SetActiveThread(thread));
        Ok(())
    }

    fn list_processes(&mut self) -> BackendResult<Vec<ProcessInfo>>
    {
        self.require(self.capabilities.list_processes, "list_processes")?;
        Ok(self.state().processes.clone())
    }
}

impl fmt::Debug for ReplayAdapter
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("ReplayAdapter")
            .field("pid", &self.pid)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

/// Shared view onto a spawned adapter's state
///
/// Stays valid after the adapter is dropped, so tests can assert on what
/// a torn-down session did to its backend.
#[derive(Clone)]
pub struct ReplayHandle
{
    state: Arc<Mutex<ReplayState>>,
}

impl ReplayHandle
{
    fn state(&self) -> MutexGuard<'_, ReplayState>
    {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every command the adapter received, in arrival order
    #[must_use]
    pub fn calls(&self) -> Vec<ReplayCall>
    {
        self.state().calls.clone()
    }

    /// Addresses with a breakpoint currently installed backend-side
    #[must_use]
    pub fn installed_breakpoints(&self) -> Vec<Address>
    {
        self.state()
            .installed
            .iter()
            .map(|(address, _)| *address)
            .collect()
    }

    /// Whether the adapter still holds a live target
    #[must_use]
    pub fn is_live(&self) -> bool
    {
        self.state().live
    }

    /// Tape entries not yet consumed
    #[must_use]
    pub fn remaining_script(&self) -> usize
    {
        self.state().tape.len()
    }

    /// The launch request the adapter last accepted
    #[must_use]
    pub fn launched_with(&self) -> Option<LaunchRequest>
    {
        self.state().launched_with.clone()
    }

    /// Current bytes of the staged region at `base`, if one exists
    #[must_use]
    pub fn region(&self, base: Address) -> Option<Vec<u8>>
    {
        let state = self.state();
        state
            .memory
            .iter()
            .find(|(region_base, _)| *region_base == base.value())
            .map(|(_, bytes)| bytes.clone())
    }
}

impl fmt::Debug for ReplayHandle
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let state = self.state();
        f.debug_struct("ReplayHandle")
            .field("live", &state.live)
            .field("calls", &state.calls.len())
            .field("remaining", &state.tape.len())
            .finish()
    }
}
