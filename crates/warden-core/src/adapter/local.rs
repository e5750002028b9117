//! # Local Process Adapter
//!
//! Debugs a process on this machine through `ptrace`.
//!
//! Linux ties a ptrace relationship to the thread that established it:
//! every later request must come from that same thread. The adapter
//! therefore spawns one dedicated tracer thread per connection and owns
//! the target entirely from there. The controller-facing methods are
//! thin: each one posts a [`TraceOp`] into the tracer's queue and waits
//! for the typed reply. Target activity discovered in `waitpid` is
//! posted out the adapter's event channel like any other backend.
//!
//! While the target runs, the tracer blocks in `waitpid` and cannot
//! service the queue; the only commands the session layer issues in that
//! state are pause, detach, and quit, all of which start with a signal
//! that wakes the wait.
//!
//! Software breakpoints patch an `int3` opcode over the first byte of
//! the site and restore it around single-steps. That sequence is x86-64
//! specific, which is why the capability profile only advertises
//! breakpoints there. Memory access goes through `/proc/<pid>/mem` in
//! page-bounded chunks so a fault reports the precise failing address,
//! and reads mask patched bytes back to their original values.

use std::fmt;
use std::fs::{self, File};
use std::io;
use std::os::unix::fs::FileExt;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use once_cell::sync::Lazy;
use tracing::{debug, trace, warn};

use crate::adapter::{
    AdapterCapabilities, AdapterKind, BackendAdapter, BreakpointHandle, LaunchRequest, TargetEvent,
    TargetEventSender,
};
use crate::error::{BackendError, BackendResult};
use crate::types::{
    Address, ModuleInfo, ProcessId, ProcessInfo, RegisterFile, RegisterId, StopReason, ThreadId,
    ThreadInfo,
};

/// Host page size, used to bound `/proc/<pid>/mem` transfers
static SYSTEM_PAGE_SIZE: Lazy<u64> = Lazy::new(|| {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 {
        4096
    } else {
        size as u64
    }
});

/// Local-process backend for Linux
///
/// Construct one per connection; the tracer thread and any launched
/// target are torn down when the adapter is dropped.
#[derive(Debug)]
pub struct LocalAdapter
{
    ops: Option<Sender<TraceOp>>,
    tracer: Option<JoinHandle<()>>,
    pid: Option<ProcessId>,
    running: Arc<AtomicBool>,
    capabilities: AdapterCapabilities,
}

impl LocalAdapter
{
    /// Create the adapter and start its tracer thread
    #[must_use]
    pub fn new(events: TargetEventSender) -> Self
    {
        let (ops, inbox) = mpsc::channel();
        let running = Arc::new(AtomicBool::new(false));
        let tracer = Tracer {
            ops: inbox,
            events,
            running: Arc::clone(&running),
            target: None,
        };
        let handle = thread::spawn(move || tracer.run());
        Self {
            ops: Some(ops),
            tracer: Some(handle),
            pid: None,
            running,
            capabilities: AdapterCapabilities::local_process(),
        }
    }

    fn call<T>(&self, build: impl FnOnce(Sender<BackendResult<T>>) -> TraceOp) -> BackendResult<T>
    {
        let ops = self.ops.as_ref().ok_or(BackendError::Disconnected)?;
        let (reply, result) = mpsc::channel();
        ops.send(build(reply)).map_err(|_| BackendError::Disconnected)?;
        result.recv().map_err(|_| BackendError::Disconnected)?
    }

    fn live_pid(&self) -> BackendResult<ProcessId>
    {
        self.pid
            .ok_or_else(|| BackendError::OperationFailed("no live target".into()))
    }
}

impl BackendAdapter for LocalAdapter
{
    fn kind(&self) -> AdapterKind
    {
        AdapterKind::LocalProcess
    }

    fn capabilities(&self) -> AdapterCapabilities
    {
        self.capabilities
    }

    fn launch(&mut self, request: &LaunchRequest) -> BackendResult<ProcessId>
    {
        let pid = self.call(|reply| TraceOp::Launch(request.clone(), reply))?;
        self.pid = Some(pid);
        self.running.store(true, Ordering::SeqCst);
        Ok(pid)
    }

    fn attach(&mut self, pid: ProcessId) -> BackendResult<()>
    {
        self.call(|reply| TraceOp::Attach(pid, reply))?;
        self.pid = Some(pid);
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn detach(&mut self) -> BackendResult<()>
    {
        let pid = self.live_pid()?;
        let interrupted = self.running.load(Ordering::SeqCst);
        if interrupted {
            // Wake the tracer out of waitpid before it can see the op.
            send_signal(pid, libc::SIGSTOP)?;
        }
        let result = self.call(|reply| TraceOp::Detach { interrupted, reply });
        if result.is_ok() {
            self.pid = None;
        }
        result
    }

    fn quit(&mut self) -> BackendResult<()>
    {
        let pid = self.live_pid()?;
        // SIGKILL both ends the target and wakes a blocked waitpid.
        let _ = send_signal(pid, libc::SIGKILL);
        let result = self.call(TraceOp::Quit);
        if result.is_ok() {
            self.pid = None;
        }
        result
    }

    fn resume(&mut self) -> BackendResult<()>
    {
        self.call(TraceOp::Resume)
    }

    fn pause(&mut self) -> BackendResult<()>
    {
        let pid = self.live_pid()?;
        send_signal(pid, libc::SIGSTOP)
    }

    fn step_into(&mut self) -> BackendResult<()>
    {
        self.call(TraceOp::SingleStep)
    }

    fn step_over(&mut self) -> BackendResult<()>
    {
        // No instruction decoder: stepping over degrades to a single step.
        debug!("step over falls back to single step on the local backend");
        self.call(TraceOp::SingleStep)
    }

    fn step_return(&mut self) -> BackendResult<()>
    {
        self.call(TraceOp::StepReturn)
    }

    fn step_to(&mut self, address: Address) -> BackendResult<()>
    {
        self.call(|reply| TraceOp::RunTo(address, reply))
    }

    fn set_breakpoint(&mut self, address: Address) -> BackendResult<BreakpointHandle>
    {
        self.call(|reply| TraceOp::SetBreakpoint(address, reply))
    }

    fn clear_breakpoint(&mut self, handle: BreakpointHandle) -> BackendResult<()>
    {
        self.call(|reply| TraceOp::ClearBreakpoint(handle, reply))
    }

    fn list_backend_breakpoints(&mut self) -> BackendResult<Vec<(Address, BreakpointHandle)>>
    {
        self.call(TraceOp::ListBreakpoints)
    }

    fn read_memory(&mut self, address: Address, len: usize) -> BackendResult<Vec<u8>>
    {
        self.call(|reply| TraceOp::ReadMemory(address, len, reply))
    }

    fn write_memory(&mut self, address: Address, data: &[u8]) -> BackendResult<usize>
    {
        self.call(|reply| TraceOp::WriteMemory(address, data.to_vec(), reply))
    }

    fn read_registers(&mut self) -> BackendResult<RegisterFile>
    {
        self.call(TraceOp::ReadRegisters)
    }

    fn write_register(&mut self, id: RegisterId, value: u64) -> BackendResult<()>
    {
        self.call(|reply| TraceOp::WriteRegister(id, value, reply))
    }

    fn list_modules(&mut self) -> BackendResult<Vec<ModuleInfo>>
    {
        modules_of(self.live_pid()?)
    }

    fn list_threads(&mut self) -> BackendResult<Vec<ThreadInfo>>
    {
        threads_of(self.live_pid()?)
    }

    fn active_thread(&mut self) -> BackendResult<ThreadId>
    {
        // Only the main thread is traced.
        Ok(ThreadId(u64::from(self.live_pid()?.value())))
    }

    fn list_processes(&mut self) -> BackendResult<Vec<ProcessInfo>>
    {
        scan_processes()
    }
}

impl Drop for LocalAdapter
{
    fn drop(&mut self)
    {
        drop(self.ops.take());
        if self.running.load(Ordering::SeqCst) {
            if let Some(pid) = self.pid {
                let _ = send_signal(pid, libc::SIGSTOP);
            }
        }
        if let Some(handle) = self.tracer.take() {
            let _ = handle.join();
        }
    }
}

/// One command for the tracer thread, with its typed reply channel
enum TraceOp
{
    Launch(LaunchRequest, Sender<BackendResult<ProcessId>>),
    Attach(ProcessId, Sender<BackendResult<()>>),
    Resume(Sender<BackendResult<()>>),
    SingleStep(Sender<BackendResult<()>>),
    StepReturn(Sender<BackendResult<()>>),
    RunTo(Address, Sender<BackendResult<()>>),
    SetBreakpoint(Address, Sender<BackendResult<BreakpointHandle>>),
    ClearBreakpoint(BreakpointHandle, Sender<BackendResult<()>>),
    ListBreakpoints(Sender<BackendResult<Vec<(Address, BreakpointHandle)>>>),
    ReadMemory(Address, usize, Sender<BackendResult<Vec<u8>>>),
    WriteMemory(Address, Vec<u8>, Sender<BackendResult<usize>>),
    ReadRegisters(Sender<BackendResult<RegisterFile>>),
    WriteRegister(RegisterId, u64, Sender<BackendResult<()>>),
    Detach
    {
        interrupted: bool,
        reply: Sender<BackendResult<()>>,
    },
    Quit(Sender<BackendResult<()>>),
}

impl fmt::Debug for TraceOp
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let name = match self {
            TraceOp::Launch(..) => "Launch",
            TraceOp::Attach(..) => "Attach",
            TraceOp::Resume(_) => "Resume",
            TraceOp::SingleStep(_) => "SingleStep",
            TraceOp::StepReturn(_) => "StepReturn",
            TraceOp::RunTo(..) => "RunTo",
            TraceOp::SetBreakpoint(..) => "SetBreakpoint",
            TraceOp::ClearBreakpoint(..) => "ClearBreakpoint",
            TraceOp::ListBreakpoints(_) => "ListBreakpoints",
            TraceOp::ReadMemory(..) => "ReadMemory",
            TraceOp::WriteMemory(..) => "WriteMemory",
            TraceOp::ReadRegisters(_) => "ReadRegisters",
            TraceOp::WriteRegister(..) => "WriteRegister",
            TraceOp::Detach { .. } => "Detach",
            TraceOp::Quit(_) => "Quit",
        };
        f.write_str(name)
    }
}

/// An `int3` patch and the byte it replaced
///
/// One-shot run-to patches carry the zero handle; it is never listed.
#[derive(Debug, Clone, Copy)]
struct Patch
{
    address: Address,
    original: u8,
    handle: BreakpointHandle,
}

/// State of one traced process, owned by the tracer thread
struct Tracee
{
    pid: libc::pid_t,
    launched: bool,
    mem: Option<File>,
    patches: Vec<Patch>,
    next_handle: u64,
    /// One-shot patch from a run-to, removed at the next stop
    temp: Option<Patch>,
    /// Breakpoint the target currently sits on, byte still patched
    at_breakpoint: Option<Address>,
    /// Patch disarmed for an in-flight single step
    disarmed: Option<Address>,
    single_step: bool,
    first_stop: bool,
    /// Non-trap signal to forward at the next resume
    pending_signal: Option<i32>,
}

impl Tracee
{
    fn new(pid: libc::pid_t, launched: bool) -> Self
    {
        Self {
            pid,
            launched,
            mem: None,
            patches: Vec::new(),
            next_handle: 1,
            temp: None,
            at_breakpoint: None,
            disarmed: None,
            single_step: false,
            first_stop: true,
            pending_signal: None,
        }
    }

    fn mem(&mut self) -> io::Result<&File>
    {
        match self.mem {
            Some(ref file) => Ok(file),
            None => {
                let file = File::options()
                    .read(true)
                    .write(true)
                    .open(format!("/proc/{}/mem", self.pid))?;
                Ok(self.mem.insert(file))
            }
        }
    }

    /// Read raw target memory in page-bounded chunks
    fn read_raw(&mut self, start: u64, len: usize) -> BackendResult<Vec<u8>>
    {
        let page = *SYSTEM_PAGE_SIZE;
        let mut out = vec![0_u8; len];
        let mut done = 0_usize;
        while done < len {
            let at = match start.checked_add(done as u64) {
                Some(at) => at,
                None => return Err(BackendError::MemoryAccess(Address::new(start))),
            };
            let chunk = (len - done).min((page - (at % page)) as usize);
            let mem = self
                .mem()
                .map_err(|_| BackendError::MemoryAccess(Address::new(at)))?;
            match mem.read_at(&mut out[done..done + chunk], at) {
                Ok(0) => return Err(BackendError::MemoryAccess(Address::new(at))),
                Ok(n) => done += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(_) => return Err(BackendError::MemoryAccess(Address::new(at))),
            }
        }
        Ok(out)
    }

    /// Write raw target memory in page-bounded chunks
    fn write_raw(&mut self, start: u64, data: &[u8]) -> BackendResult<usize>
    {
        let page = *SYSTEM_PAGE_SIZE;
        let mut done = 0_usize;
        while done < data.len() {
            let at = match start.checked_add(done as u64) {
                Some(at) => at,
                None => return Err(BackendError::MemoryAccess(Address::new(start))),
            };
            let chunk = (data.len() - done).min((page - (at % page)) as usize);
            let mem = self
                .mem()
                .map_err(|_| BackendError::MemoryAccess(Address::new(at)))?;
            match mem.write_at(&data[done..done + chunk], at) {
                Ok(0) => return Err(BackendError::MemoryAccess(Address::new(at))),
                Ok(n) => done += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(_) => return Err(BackendError::MemoryAccess(Address::new(at))),
            }
        }
        Ok(done)
    }

    /// Read memory with patched breakpoint bytes masked back out
    fn read_mem(&mut self, start: u64, len: usize) -> BackendResult<Vec<u8>>
    {
        let mut out = self.read_raw(start, len)?;
        let end = start + len as u64;
        for patch in self.patches.iter().chain(self.temp.iter()) {
            let at = patch.address.value();
            if at >= start && at < end {
                out[(at - start) as usize] = patch.original;
            }
        }
        Ok(out)
    }

    /// Write memory, splicing writes around installed breakpoints
    ///
    /// A byte written over a patched site lands in the patch's saved
    /// original instead, so the trap opcode stays in place until the
    /// breakpoint is cleared.
    fn write_mem(&mut self, start: u64, data: &[u8]) -> BackendResult<usize>
    {
        let end = match start.checked_add(data.len() as u64) {
            Some(end) => end,
            None => return Err(BackendError::MemoryAccess(Address::new(start))),
        };
        let mut data = data.to_vec();
        for patch in self.patches.iter_mut().chain(self.temp.iter_mut()) {
            let at = patch.address.value();
            if at >= start && at < end {
                let index = (at - start) as usize;
                patch.original = data[index];
                data[index] = x64::BREAKPOINT_OPCODE;
            }
        }
        self.write_raw(start, &data)
    }

    #[cfg(target_arch = "x86_64")]
    fn arm(&mut self, address: Address, handle: BreakpointHandle) -> BackendResult<Patch>
    {
        let original = self.read_raw(address.value(), 1)?[0];
        self.write_raw(address.value(), &[x64::BREAKPOINT_OPCODE])?;
        Ok(Patch {
            address,
            original,
            handle,
        })
    }

    #[cfg(target_arch = "x86_64")]
    fn restore(&mut self, patch: Patch) -> BackendResult<()>
    {
        self.write_raw(patch.address.value(), &[patch.original])?;
        Ok(())
    }

    #[cfg(target_arch = "x86_64")]
    fn disarm_installed(&mut self, address: Address) -> BackendResult<()>
    {
        let patch = self
            .patches
            .iter()
            .find(|patch| patch.address == address)
            .copied();
        match patch {
            Some(patch) => self.restore(patch),
            None => Ok(()),
        }
    }

    #[cfg(target_arch = "x86_64")]
    fn rearm_installed(&mut self, address: Address) -> BackendResult<()>
    {
        if self.patches.iter().any(|patch| patch.address == address) {
            self.write_raw(address.value(), &[x64::BREAKPOINT_OPCODE])?;
        }
        Ok(())
    }

    /// Put every original byte back, ahead of a detach
    fn restore_all(&mut self)
    {
        let patches: Vec<Patch> = self.patches.drain(..).collect();
        for patch in patches {
            if let Err(err) = self.write_raw(patch.address.value(), &[patch.original]) {
                warn!(address = %patch.address, %err, "failed to restore breakpoint byte");
            }
        }
        if let Some(patch) = self.temp.take() {
            if let Err(err) = self.write_raw(patch.address.value(), &[patch.original]) {
                warn!(address = %patch.address, %err, "failed to restore one-shot byte");
            }
        }
    }
}

/// The thread that owns all ptrace traffic for one connection
struct Tracer
{
    ops: Receiver<TraceOp>,
    events: TargetEventSender,
    running: Arc<AtomicBool>,
    target: Option<Tracee>,
}

impl Tracer
{
    fn run(mut self)
    {
        loop {
            if self.running.load(Ordering::SeqCst) && self.target.is_some() {
                self.await_target();
                continue;
            }
            match self.ops.recv() {
                Ok(op) => self.handle_op(op),
                Err(_) => {
                    self.shutdown();
                    return;
                }
            }
        }
    }

    /// Adapter dropped without an orderly teardown
    fn shutdown(&mut self)
    {
        if let Some(mut tracee) = self.target.take() {
            if tracee.launched {
                debug!(pid = tracee.pid, "killing launched target at shutdown");
                unsafe {
                    libc::kill(tracee.pid, libc::SIGKILL);
                }
                let _ = wait_status(tracee.pid);
            } else {
                debug!(pid = tracee.pid, "detaching from target at shutdown");
                tracee.restore_all();
                let _ = ptrace_call(libc::PTRACE_DETACH, tracee.pid, 0, 0);
            }
        }
        self.running.store(false, Ordering::SeqCst);
    }

    fn handle_op(&mut self, op: TraceOp)
    {
        trace!(?op, "tracer op");
        match op {
            TraceOp::Launch(request, reply) => {
                let _ = reply.send(self.launch(&request));
            }
            TraceOp::Attach(pid, reply) => {
                let _ = reply.send(self.attach(pid));
            }
            TraceOp::Resume(reply) => {
                let _ = reply.send(self.resume_target());
            }
            TraceOp::SingleStep(reply) => {
                let _ = reply.send(self.step_target());
            }
            TraceOp::StepReturn(reply) => {
                let _ = reply.send(self.step_out());
            }
            TraceOp::RunTo(address, reply) => {
                let _ = reply.send(self.run_to(address));
            }
            TraceOp::SetBreakpoint(address, reply) => {
                let _ = reply.send(self.set_breakpoint(address));
            }
            TraceOp::ClearBreakpoint(handle, reply) => {
                let _ = reply.send(self.clear_breakpoint(handle));
            }
            TraceOp::ListBreakpoints(reply) => {
                let result = self.tracee().map(|tracee| {
                    tracee
                        .patches
                        .iter()
                        .map(|patch| (patch.address, patch.handle))
                        .collect()
                });
                let _ = reply.send(result);
            }
            TraceOp::ReadMemory(address, len, reply) => {
                let result = self
                    .tracee()
                    .and_then(|tracee| tracee.read_mem(address.value(), len));
                let _ = reply.send(result);
            }
            TraceOp::WriteMemory(address, data, reply) => {
                let result = self
                    .tracee()
                    .and_then(|tracee| tracee.write_mem(address.value(), &data));
                let _ = reply.send(result);
            }
            TraceOp::ReadRegisters(reply) => {
                let result = self.tracee().and_then(|tracee| x64::read_register_file(tracee.pid));
                let _ = reply.send(result);
            }
            TraceOp::WriteRegister(id, value, reply) => {
                let result = self
                    .tracee()
                    .and_then(|tracee| x64::write_register(tracee.pid, id, value));
                let _ = reply.send(result);
            }
            TraceOp::Detach { interrupted, reply } => {
                let _ = reply.send(self.detach_target(interrupted));
            }
            TraceOp::Quit(reply) => {
                let _ = reply.send(self.quit_target());
            }
        }
    }

    fn tracee(&mut self) -> BackendResult<&mut Tracee>
    {
        self.target
            .as_mut()
            .ok_or_else(|| BackendError::OperationFailed("no live target".into()))
    }

    fn launch(&mut self, request: &LaunchRequest) -> BackendResult<ProcessId>
    {
        if let Some(tracee) = &self.target {
            return Err(BackendError::AlreadyAttached(ProcessId(tracee.pid as u32)));
        }

        let mut command = Command::new(&request.path);
        command.args(&request.args);
        if let Some(dir) = &request.working_dir {
            command.current_dir(dir);
        }
        unsafe {
            command.pre_exec(|| {
                if libc::ptrace(
                    libc::PTRACE_TRACEME,
                    0,
                    std::ptr::null_mut::<libc::c_void>(),
                    std::ptr::null_mut::<libc::c_void>(),
                ) == -1
                {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let path = request.path.display().to_string();
        let child = command.spawn().map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => BackendError::TargetNotFound(path.clone()),
            io::ErrorKind::PermissionDenied => BackendError::PermissionDenied(path.clone()),
            _ => BackendError::Io(err),
        })?;

        let pid = child.id() as libc::pid_t;
        debug!(pid, path = %request.path.display(), "launched target under trace");
        self.target = Some(Tracee::new(pid, true));
        self.running.store(true, Ordering::SeqCst);
        Ok(ProcessId(pid as u32))
    }

    fn attach(&mut self, pid: ProcessId) -> BackendResult<()>
    {
        if let Some(tracee) = &self.target {
            return Err(BackendError::AlreadyAttached(ProcessId(tracee.pid as u32)));
        }

        let pid_t = pid.value() as libc::pid_t;
        ptrace_call(libc::PTRACE_ATTACH, pid_t, 0, 0).map_err(|err| match err {
            BackendError::PermissionDenied(_) => BackendError::PermissionDenied(format!(
                "cannot attach to {pid}; check /proc/sys/kernel/yama/ptrace_scope"
            )),
            other => other,
        })?;

        debug!(pid = pid_t, "attached to target");
        self.target = Some(Tracee::new(pid_t, false));
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Single-step across the breakpoint the target sits on, then re-arm it
    fn step_off_breakpoint(&mut self) -> BackendResult<bool>
    {
        let tracee = self.tracee()?;
        let bp = match tracee.at_breakpoint.take() {
            Some(bp) => bp,
            None => return Ok(true),
        };

        #[cfg(target_arch = "x86_64")]
        {
            tracee.disarm_installed(bp)?;
            let pid = tracee.pid;
            ptrace_call(libc::PTRACE_SINGLESTEP, pid, 0, 0)?;
            let status = wait_status(pid)?;
            if libc::WIFEXITED(status) || libc::WIFSIGNALED(status) {
                let code = exit_code_of(status);
                self.target = None;
                self.running.store(false, Ordering::SeqCst);
                let _ = self.events.send(TargetEvent::Exited { code });
                return Ok(false);
            }
            if libc::WIFSTOPPED(status) {
                let sig = libc::WSTOPSIG(status);
                if sig != libc::SIGTRAP {
                    self.tracee()?.pending_signal = Some(sig);
                }
            }
            self.tracee()?.rearm_installed(bp)?;
        }
        #[cfg(not(target_arch = "x86_64"))]
        {
            let _ = bp;
        }
        Ok(true)
    }

    fn resume_target(&mut self) -> BackendResult<()>
    {
        if !self.step_off_breakpoint()? {
            // The target exited during the step; resume is moot.
            return Ok(());
        }
        let tracee = self.tracee()?;
        let sig = tracee.pending_signal.take().unwrap_or(0);
        ptrace_call(libc::PTRACE_CONT, tracee.pid, 0, sig as u64)?;
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn step_target(&mut self) -> BackendResult<()>
    {
        #[cfg(target_arch = "x86_64")]
        {
            let tracee = self.tracee()?;
            if let Some(bp) = tracee.at_breakpoint.take() {
                tracee.disarm_installed(bp)?;
                tracee.disarmed = Some(bp);
            }
        }
        let tracee = self.tracee()?;
        let sig = tracee.pending_signal.take().unwrap_or(0);
        let pid = tracee.pid;
        ptrace_call(libc::PTRACE_SINGLESTEP, pid, 0, sig as u64)?;
        self.tracee()?.single_step = true;
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Run until the current frame returns, via a one-shot at the return site
    fn step_out(&mut self) -> BackendResult<()>
    {
        #[cfg(target_arch = "x86_64")]
        {
            let tracee = self.tracee()?;
            let regs = x64::read_regs(tracee.pid)?;
            // Frame-pointer frames keep the return address at rbp + 8.
            let frame = regs.rbp;
            let bytes = tracee.read_mem(frame + 8, 8).map_err(|_| {
                BackendError::OperationFailed("cannot locate the return address".into())
            })?;
            let mut raw = [0_u8; 8];
            raw.copy_from_slice(&bytes);
            let return_site = u64::from_le_bytes(raw);
            self.run_to(Address::new(return_site))
        }
        #[cfg(not(target_arch = "x86_64"))]
        {
            Err(BackendError::Unsupported(
                "step return is only implemented on x86-64",
            ))
        }
    }

    fn run_to(&mut self, address: Address) -> BackendResult<()>
    {
        #[cfg(target_arch = "x86_64")]
        {
            let tracee = self.tracee()?;
            let already_installed = tracee.patches.iter().any(|patch| patch.address == address);
            if !already_installed && tracee.temp.is_none() {
                let patch = tracee.arm(address, BreakpointHandle(0))?;
                tracee.temp = Some(patch);
            }
            self.resume_target()
        }
        #[cfg(not(target_arch = "x86_64"))]
        {
            let _ = address;
            Err(BackendError::Unsupported(
                "run to address is only implemented on x86-64",
            ))
        }
    }

    fn set_breakpoint(&mut self, address: Address) -> BackendResult<BreakpointHandle>
    {
        #[cfg(target_arch = "x86_64")]
        {
            let tracee = self.tracee()?;
            if let Some(patch) = tracee.patches.iter().find(|patch| patch.address == address) {
                return Ok(patch.handle);
            }
            let handle = BreakpointHandle(tracee.next_handle);
            tracee.next_handle += 1;
            let patch = tracee.arm(address, handle)?;
            tracee.patches.push(patch);
            trace!(%address, handle = handle.0, "installed breakpoint");
            Ok(handle)
        }
        #[cfg(not(target_arch = "x86_64"))]
        {
            let _ = address;
            Err(BackendError::Unsupported(
                "software breakpoints are only implemented on x86-64",
            ))
        }
    }

    fn clear_breakpoint(&mut self, handle: BreakpointHandle) -> BackendResult<()>
    {
        #[cfg(target_arch = "x86_64")]
        {
            let tracee = self.tracee()?;
            let index = tracee.patches.iter().position(|patch| patch.handle == handle);
            // An unknown handle means the patch is already gone.
            if let Some(index) = index {
                let patch = tracee.patches.remove(index);
                tracee.restore(patch)?;
                if tracee.at_breakpoint == Some(patch.address) {
                    tracee.at_breakpoint = None;
                }
                trace!(address = %patch.address, handle = handle.0, "cleared breakpoint");
            }
            Ok(())
        }
        #[cfg(not(target_arch = "x86_64"))]
        {
            let _ = handle;
            Err(BackendError::Unsupported(
                "software breakpoints are only implemented on x86-64",
            ))
        }
    }

    fn detach_target(&mut self, interrupted: bool) -> BackendResult<()>
    {
        match self.target.take() {
            Some(mut tracee) => {
                tracee.restore_all();
                let result = ptrace_call(libc::PTRACE_DETACH, tracee.pid, 0, 0);
                if interrupted {
                    // Clears the stop our wake-up SIGSTOP may have queued.
                    let _ = unsafe { libc::kill(tracee.pid, libc::SIGCONT) };
                }
                self.running.store(false, Ordering::SeqCst);
                debug!(pid = tracee.pid, "detached from target");
                result.map(|_| ())
            }
            None => Ok(()),
        }
    }

    fn quit_target(&mut self) -> BackendResult<()>
    {
        if let Some(tracee) = self.target.take() {
            unsafe {
                libc::kill(tracee.pid, libc::SIGKILL);
            }
            let _ = wait_status(tracee.pid);
            debug!(pid = tracee.pid, "killed target");
        }
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Block until the target stops or dies, then report it
    fn await_target(&mut self)
    {
        let pid = match &self.target {
            Some(tracee) => tracee.pid,
            None => {
                self.running.store(false, Ordering::SeqCst);
                return;
            }
        };

        let status = match wait_status(pid) {
            Ok(status) => status,
            Err(err) => {
                warn!(pid, %err, "waitpid failed; treating the target as lost");
                self.target = None;
                self.running.store(false, Ordering::SeqCst);
                let _ = self.events.send(TargetEvent::Disconnected);
                return;
            }
        };

        if libc::WIFEXITED(status) || libc::WIFSIGNALED(status) {
            let code = exit_code_of(status);
            self.target = None;
            self.running.store(false, Ordering::SeqCst);
            // A queued quit or detach consumes the exit silently.
            match self.ops.try_recv() {
                Ok(TraceOp::Quit(reply)) | Ok(TraceOp::Detach { reply, .. }) => {
                    let _ = reply.send(Ok(()));
                }
                Ok(other) => {
                    let _ = self.events.send(TargetEvent::Exited { code });
                    self.handle_op(other);
                }
                Err(_) => {
                    let _ = self.events.send(TargetEvent::Exited { code });
                }
            }
            return;
        }

        if libc::WIFSTOPPED(status) {
            self.running.store(false, Ordering::SeqCst);
            let sig = libc::WSTOPSIG(status);
            match self.ops.try_recv() {
                Ok(TraceOp::Detach { interrupted, reply }) => {
                    // The stop was our wake-up; no event for it.
                    let _ = reply.send(self.detach_target(interrupted));
                }
                Ok(TraceOp::Quit(reply)) => {
                    let _ = reply.send(self.quit_target());
                }
                Ok(other) => {
                    let reason = self.on_stop(sig);
                    let _ = self.events.send(TargetEvent::Stopped { reason });
                    self.handle_op(other);
                }
                Err(_) => {
                    let reason = self.on_stop(sig);
                    let _ = self.events.send(TargetEvent::Stopped { reason });
                }
            }
        }
    }

    /// Classify a ptrace stop and fix up breakpoint state
    fn on_stop(&mut self, sig: i32) -> StopReason
    {
        let tracee = match self.target.as_mut() {
            Some(tracee) => tracee,
            None => return StopReason::Unknown,
        };

        #[cfg(target_arch = "x86_64")]
        if let Some(bp) = tracee.disarmed.take() {
            if let Err(err) = tracee.rearm_installed(bp) {
                warn!(address = %bp, %err, "failed to re-arm breakpoint");
            }
        }

        let reason = if sig == libc::SIGTRAP {
            classify_trap(tracee)
        } else {
            match sig {
                libc::SIGSTOP => StopReason::Pause,
                libc::SIGSEGV => {
                    tracee.pending_signal = Some(sig);
                    StopReason::AccessViolation
                }
                libc::SIGILL => {
                    tracee.pending_signal = Some(sig);
                    StopReason::IllegalInstruction
                }
                other => {
                    tracee.pending_signal = Some(other);
                    StopReason::Signal(other)
                }
            }
        };

        // One-shot patches do not survive a stop, wherever it happened.
        if let Some(patch) = tracee.temp.take() {
            if let Err(err) = tracee.restore(patch) {
                warn!(address = %patch.address, %err, "failed to remove one-shot byte");
            }
        }

        trace!(sig, %reason, "target stopped");
        reason
    }
}

/// Work out why a SIGTRAP stop happened
fn classify_trap(tracee: &mut Tracee) -> StopReason
{
    if tracee.single_step {
        tracee.single_step = false;
        return StopReason::SingleStep;
    }
    if tracee.first_stop {
        tracee.first_stop = false;
        if tracee.launched {
            // Tie the launched target's life to ours.
            let _ = ptrace_call(
                libc::PTRACE_SETOPTIONS,
                tracee.pid,
                0,
                libc::PTRACE_O_EXITKILL as u64,
            );
        }
        return StopReason::InitialBreakpoint;
    }

    #[cfg(target_arch = "x86_64")]
    {
        let mut regs = match x64::read_regs(tracee.pid) {
            Ok(regs) => regs,
            Err(_) => return StopReason::Unknown,
        };
        // int3 leaves the instruction pointer one past the trap byte.
        let trap = regs.rip.wrapping_sub(1);

        if tracee.temp.map(|patch| patch.address.value()) == Some(trap) {
            if let Some(patch) = tracee.temp.take() {
                let _ = tracee.restore(patch);
            }
            regs.rip = trap;
            let _ = x64::write_regs(tracee.pid, &regs);
            return StopReason::SingleStep;
        }

        if tracee.patches.iter().any(|patch| patch.address.value() == trap) {
            regs.rip = trap;
            let _ = x64::write_regs(tracee.pid, &regs);
            tracee.at_breakpoint = Some(Address::new(trap));
            return StopReason::Breakpoint;
        }
    }

    StopReason::Unknown
}

/// x86-64 register plumbing
#[cfg(target_arch = "x86_64")]
mod x64
{
    use super::{ptrace_call, BackendError, BackendResult, RegisterFile, RegisterId};
    use crate::types::{Address, Architecture};

    pub(super) const BREAKPOINT_OPCODE: u8 = 0xCC;

    /// Order of `RegisterId::General` slots
    const GENERAL: usize = 14;

    pub(super) fn read_regs(pid: libc::pid_t) -> BackendResult<libc::user_regs_struct>
    {
        let mut regs = std::mem::MaybeUninit::<libc::user_regs_struct>::uninit();
        ptrace_call(libc::PTRACE_GETREGS, pid, 0, regs.as_mut_ptr() as u64)?;
        Ok(unsafe { regs.assume_init() })
    }

    pub(super) fn write_regs(pid: libc::pid_t, regs: &libc::user_regs_struct) -> BackendResult<()>
    {
        ptrace_call(libc::PTRACE_SETREGS, pid, 0, regs as *const _ as u64)?;
        Ok(())
    }

    pub(super) fn read_register_file(pid: libc::pid_t) -> BackendResult<RegisterFile>
    {
        let regs = read_regs(pid)?;
        let mut file = RegisterFile::new().with_arch(Architecture::X86_64);
        file.pc = Address::new(regs.rip);
        file.sp = Address::new(regs.rsp);
        file.fp = Address::new(regs.rbp);
        file.status = regs.eflags;
        // rax rbx rcx rdx rsi rdi r8 r9 r10 r11 r12 r13 r14 r15
        file.general.extend_from_slice(&[
            regs.rax, regs.rbx, regs.rcx, regs.rdx, regs.rsi, regs.rdi, regs.r8, regs.r9,
            regs.r10, regs.r11, regs.r12, regs.r13, regs.r14, regs.r15,
        ]);
        Ok(file)
    }

    pub(super) fn write_register(pid: libc::pid_t, id: RegisterId, value: u64)
        -> BackendResult<()>
    {
        let mut regs = read_regs(pid)?;
        match id {
            RegisterId::Pc => regs.rip = value,
            RegisterId::Sp => regs.rsp = value,
            RegisterId::Fp => regs.rbp = value,
            RegisterId::Status => regs.eflags = value,
            RegisterId::General(index) => {
                let slot = match usize::from(index) {
                    0 => &mut regs.rax,
                    1 => &mut regs.rbx,
                    2 => &mut regs.rcx,
                    3 => &mut regs.rdx,
                    4 => &mut regs.rsi,
                    5 => &mut regs.rdi,
                    6 => &mut regs.r8,
                    7 => &mut regs.r9,
                    8 => &mut regs.r10,
                    9 => &mut regs.r11,
                    10 => &mut regs.r12,
                    11 => &mut regs.r13,
                    12 => &mut regs.r14,
                    13 => &mut regs.r15,
                    _ => {
                        return Err(BackendError::OperationFailed(format!(
                            "no general register {index}; this target has {GENERAL}"
                        )))
                    }
                };
                *slot = value;
            }
        }
        write_regs(pid, &regs)
    }
}

#[cfg(not(target_arch = "x86_64"))]
mod x64
{
    use super::{BackendError, BackendResult, RegisterFile, RegisterId};

    pub(super) const BREAKPOINT_OPCODE: u8 = 0;

    pub(super) fn read_register_file(_pid: libc::pid_t) -> BackendResult<RegisterFile>
    {
        Err(BackendError::Unsupported(
            "register access is only implemented on x86-64",
        ))
    }

    pub(super) fn write_register(
        _pid: libc::pid_t,
        _id: RegisterId,
        _value: u64,
    ) -> BackendResult<()>
    {
        Err(BackendError::Unsupported(
            "register access is only implemented on x86-64",
        ))
    }
}

/// Issue one ptrace request, mapping errno onto backend errors
fn ptrace_call(
    request: libc::c_uint,
    pid: libc::pid_t,
    addr: u64,
    data: u64,
) -> BackendResult<libc::c_long>
{
    let result = unsafe {
        libc::ptrace(
            request,
            pid,
            addr as *mut libc::c_void,
            data as *mut libc::c_void,
        )
    };
    if result == -1 {
        let err = io::Error::last_os_error();
        return Err(match err.raw_os_error() {
            Some(libc::EPERM) => BackendError::PermissionDenied(format!(
                "ptrace request {request} on pid {pid} was refused"
            )),
            Some(libc::ESRCH) => {
                BackendError::OperationFailed(format!("target process {pid} is gone"))
            }
            _ => BackendError::Io(err),
        });
    }
    Ok(result)
}

/// waitpid that retries through signal interruptions
fn wait_status(pid: libc::pid_t) -> io::Result<libc::c_int>
{
    loop {
        let mut status = 0;
        let result = unsafe { libc::waitpid(pid, &mut status, 0) };
        if result == -1 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        return Ok(status);
    }
}

/// Exit code from a wait status; signal deaths are the negated signal
fn exit_code_of(status: libc::c_int) -> i32
{
    if libc::WIFEXITED(status) {
        libc::WEXITSTATUS(status)
    } else {
        -libc::WTERMSIG(status)
    }
}

fn send_signal(pid: ProcessId, sig: libc::c_int) -> BackendResult<()>
{
    let result = unsafe { libc::kill(pid.value() as libc::pid_t, sig) };
    if result == -1 {
        return Err(BackendError::OperationFailed(format!(
            "kill({pid}, {sig}): {}",
            io::Error::last_os_error()
        )));
    }
    Ok(())
}

/// Loaded modules of `pid`, grouped from `/proc/<pid>/maps`
fn modules_of(pid: ProcessId) -> BackendResult<Vec<ModuleInfo>>
{
    let text = fs::read_to_string(format!("/proc/{}/maps", pid.value()))?;
    // name, path, lowest start, highest end, in first-seen order
    let mut grouped: Vec<(PathBuf, u64, u64)> = Vec::new();

    for line in text.lines() {
        let path_start = match line.find('/') {
            Some(index) => index,
            None => continue,
        };
        let path = PathBuf::from(line[path_start..].trim_end_matches(" (deleted)"));

        let range = match line.split_whitespace().next() {
            Some(range) => range,
            None => continue,
        };
        let (start, end) = match parse_map_range(range) {
            Some(bounds) => bounds,
            None => continue,
        };

        match grouped.iter_mut().find(|(existing, _, _)| *existing == path) {
            Some((_, lowest, highest)) => {
                *lowest = (*lowest).min(start);
                *highest = (*highest).max(end);
            }
            None => grouped.push((path, start, end)),
        }
    }

    Ok(grouped
        .into_iter()
        .filter_map(|(path, start, end)| {
            let name = path.file_name()?.to_str()?.to_owned();
            Some(ModuleInfo::new(name, Address::new(start), end - start).with_path(path))
        })
        .collect())
}

fn parse_map_range(range: &str) -> Option<(u64, u64)>
{
    let (start, end) = range.split_once('-')?;
    Some((
        u64::from_str_radix(start, 16).ok()?,
        u64::from_str_radix(end, 16).ok()?,
    ))
}

/// Threads of `pid` from `/proc/<pid>/task`
///
/// Instruction pointers are refreshed by the session layer from the
/// active register file; they are reported as zero here.
fn threads_of(pid: ProcessId) -> BackendResult<Vec<ThreadInfo>>
{
    let mut threads = Vec::new();
    for entry in fs::read_dir(format!("/proc/{}/task", pid.value()))? {
        let entry = entry?;
        if let Some(tid) = entry.file_name().to_str().and_then(|name| name.parse::<u64>().ok()) {
            threads.push(ThreadInfo::new(ThreadId(tid), Address::ZERO));
        }
    }
    threads.sort_by_key(|info| info.id);
    Ok(threads)
}

/// Debuggable processes from a `/proc` scan
fn scan_processes() -> BackendResult<Vec<ProcessInfo>>
{
    let mut processes = Vec::new();
    for entry in fs::read_dir("/proc")? {
        let entry = entry?;
        let pid = match entry.file_name().to_str().and_then(|name| name.parse::<u32>().ok()) {
            Some(pid) => pid,
            None => continue,
        };
        let comm = fs::read_to_string(format!("/proc/{pid}/comm")).unwrap_or_default();
        let name = comm.trim();
        if name.is_empty() {
            continue;
        }
        processes.push(ProcessInfo::new(ProcessId(pid), name));
    }
    processes.sort_by_key(|info| info.pid);
    Ok(processes)
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_write_mem_rejects_a_range_past_the_address_space()
    {
        let mut tracee = Tracee::new(1, false);

        // The end of this range does not fit in a u64; the write must
        // fail cleanly before any /proc access.
        let result = tracee.write_mem(u64::MAX - 3, &[0_u8; 8]);
        match result {
            Err(BackendError::MemoryAccess(address)) => {
                assert_eq!(address, Address::new(u64::MAX - 3));
            }
            other => panic!("expected MemoryAccess, got {other:?}"),
        }
    }
}
