//! # Remote Stub Adapter
//!
//! Drives a target held by a debug stub on the far side of a transport.
//!
//! The adapter itself knows nothing about any wire format. It speaks
//! [`StubCommand`]/[`StubReply`] through a [`StubLink`], and a link
//! implementation owns the actual transport: framing, timeouts, and the
//! reader that turns asynchronous stop packets into [`TargetEvent`]s on
//! the sender it receives at [`StubLink::open`]. That keeps protocol
//! work (gdb remote serial, a vendor agent, a test loopback) pluggable
//! without touching session semantics.
//!
//! A stub owns its target's lifecycle: this side can connect to a
//! running target, never launch one or enumerate candidates, which is
//! exactly what the capability profile advertises.

use tracing::debug;

use crate::adapter::{
    AdapterCapabilities, AdapterKind, BackendAdapter, BreakpointHandle, RemoteEndpoint,
    TargetEventSender,
};
use crate::error::{BackendError, BackendResult};
use crate::types::{
    Address, ModuleInfo, RegisterFile, RegisterId, ThreadId, ThreadInfo,
};

/// One command sent across the link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StubCommand
{
    Resume,
    Pause,
    StepInto,
    StepOver,
    StepReturn,
    StepTo(Address),
    SetBreakpoint(Address),
    ClearBreakpoint(BreakpointHandle),
    ListBreakpoints,
    ReadMemory
    {
        address: Address,
        len: usize,
    },
    WriteMemory
    {
        address: Address,
        data: Vec<u8>,
    },
    ReadRegisters,
    WriteRegister
    {
        id: RegisterId,
        value: u64,
    },
    ListModules,
    ListThreads,
    ActiveThread,
    SetActiveThread(ThreadId),
    /// Release the target and leave it running
    Detach,
    /// Terminate the target
    Kill,
}

/// The stub's answer to one command
#[derive(Debug, Clone, PartialEq)]
pub enum StubReply
{
    /// Command acknowledged with no payload
    Done,
    Breakpoint(BreakpointHandle),
    Breakpoints(Vec<(Address, BreakpointHandle)>),
    Bytes(Vec<u8>),
    Written(usize),
    Registers(RegisterFile),
    Modules(Vec<ModuleInfo>),
    Threads(Vec<ThreadInfo>),
    Thread(ThreadId),
}

/// A transport to a remote debug stub
///
/// `open` hands the link the event sender it must use for asynchronous
/// target activity; a real transport typically spawns its reader there.
/// `exchange` is synchronous command traffic and must not be used to
/// deliver stops.
pub trait StubLink: Send
{
    /// Open the transport to `endpoint`
    fn open(&mut self, endpoint: &RemoteEndpoint, events: TargetEventSender) -> BackendResult<()>;

    /// Close the transport; no events may be posted afterwards
    fn close(&mut self) -> BackendResult<()>;

    /// Send one command and wait for its reply
    fn exchange(&mut self, command: StubCommand) -> BackendResult<StubReply>;
}

/// Backend adapter over a [`StubLink`]
pub struct RemoteStubAdapter
{
    link: Box<dyn StubLink>,
    events: TargetEventSender,
    endpoint: Option<RemoteEndpoint>,
    capabilities: AdapterCapabilities,
    kind: AdapterKind,
}

impl RemoteStubAdapter
{
    /// Adapter over `link` with the standard remote-stub profile
    #[must_use]
    pub fn new(link: Box<dyn StubLink>, events: TargetEventSender) -> Self
    {
        Self::with_profile(
            link,
            events,
            AdapterKind::RemoteStub,
            AdapterCapabilities::remote_stub(),
        )
    }

    /// Adapter over `link` with a caller-chosen kind and profile
    ///
    /// Used by backends that share the link machinery but advertise a
    /// different shape, such as kernel connections.
    #[must_use]
    pub fn with_profile(
        link: Box<dyn StubLink>,
        events: TargetEventSender,
        kind: AdapterKind,
        capabilities: AdapterCapabilities,
    ) -> Self
    {
        Self {
            link,
            events,
            endpoint: None,
            capabilities,
            kind,
        }
    }

    /// Endpoint of the current connection, if any
    #[must_use]
    pub fn endpoint(&self) -> Option<&RemoteEndpoint>
    {
        self.endpoint.as_ref()
    }

    fn require_connected(&self) -> BackendResult<()>
    {
        if self.endpoint.is_some() {
            Ok(())
        } else {
            Err(BackendError::OperationFailed("not connected".into()))
        }
    }

    fn exchange(&mut self, command: StubCommand) -> BackendResult<StubReply>
    {
        self.require_connected()?;
        self.link.exchange(command)
    }
}

fn protocol_violation(wanted: &'static str, got: &StubReply) -> BackendError
{
    BackendError::OperationFailed(format!(
        "stub protocol violation: expected {wanted}, got {got:?}"
    ))
}

fn expect_done(reply: StubReply) -> BackendResult<()>
{
    match reply {
        StubReply::Done => Ok(()),
        other => Err(protocol_violation("done", &other)),
    }
}

impl BackendAdapter for RemoteStubAdapter
{
    fn kind(&self) -> AdapterKind
    {
        self.kind
    }

    fn capabilities(&self) -> AdapterCapabilities
    {
        self.capabilities
    }

    fn connect_remote(&mut self, endpoint: &RemoteEndpoint) -> BackendResult<()>
    {
        if let Some(current) = &self.endpoint {
            return Err(BackendError::TransportRefused(format!(
                "already connected to {current}"
            )));
        }
        self.link.open(endpoint, self.events.clone())?;
        debug!(%endpoint, "connected to debug stub");
        self.endpoint = Some(endpoint.clone());
        Ok(())
    }

    fn disconnect_remote(&mut self) -> BackendResult<()>
    {
        self.require_connected()?;
        // Transport-level close only: the stub keeps the target and its
        // breakpoints exactly as they are.
        self.endpoint = None;
        debug!("disconnected from debug stub");
        self.link.close()
    }

    fn detach(&mut self) -> BackendResult<()>
    {
        let reply = self.exchange(StubCommand::Detach)?;
        expect_done(reply)?;
        self.endpoint = None;
        self.link.close()
    }

    fn quit(&mut self) -> BackendResult<()>
    {
        let reply = self.exchange(StubCommand::Kill)?;
        expect_done(reply)?;
        self.endpoint = None;
        self.link.close()
    }

    fn resume(&mut self) -> BackendResult<()>
    {
        expect_done(self.exchange(StubCommand::Resume)?)
    }

    fn pause(&mut self) -> BackendResult<()>
    {
        expect_done(self.exchange(StubCommand::Pause)?)
    }

    fn step_into(&mut self) -> BackendResult<()>
    {
        expect_done(self.exchange(StubCommand::StepInto)?)
    }

    fn step_over(&mut self) -> BackendResult<()>
    {
        expect_done(self.exchange(StubCommand::StepOver)?)
    }

    fn step_return(&mut self) -> BackendResult<()>
    {
        expect_done(self.exchange(StubCommand::StepReturn)?)
    }

    fn step_to(&mut self, address: Address) -> BackendResult<()>
    {
        expect_done(self.exchange(StubCommand::StepTo(address))?)
    }

    fn set_breakpoint(&mut self, address: Address) -> BackendResult<BreakpointHandle>
    {
        match self.exchange(StubCommand::SetBreakpoint(address))? {
            StubReply::Breakpoint(handle) => Ok(handle),
            other => Err(protocol_violation("breakpoint handle", &other)),
        }
    }

    fn clear_breakpoint(&mut self, handle: BreakpointHandle) -> BackendResult<()>
    {
        expect_done(self.exchange(StubCommand::ClearBreakpoint(handle))?)
    }

    fn list_backend_breakpoints(&mut self) -> BackendResult<Vec<(Address, BreakpointHandle)>>
    {
        match self.exchange(StubCommand::ListBreakpoints)? {
            StubReply::Breakpoints(installed) => Ok(installed),
            other => Err(protocol_violation("breakpoint list", &other)),
        }
    }

    fn read_memory(&mut self, address: Address, len: usize) -> BackendResult<Vec<u8>>
    {
        match self.exchange(StubCommand::ReadMemory { address, len })? {
            StubReply::Bytes(bytes) if bytes.len() == len => Ok(bytes),
            StubReply::Bytes(_) => Err(BackendError::MemoryAccess(address)),
            other => Err(protocol_violation("bytes", &other)),
        }
    }

    fn write_memory(&mut self, address: Address, data: &[u8]) -> BackendResult<usize>
    {
        match self.exchange(StubCommand::WriteMemory {
            address,
            data: data.to_vec(),
        })? {
            StubReply::Written(count) => Ok(count),
            other => Err(protocol_violation("written count", &other)),
        }
    }

    fn read_registers(&mut self) -> BackendResult<RegisterFile>
    {
        match self.exchange(StubCommand::ReadRegisters)? {
            StubReply::Registers(file) => Ok(file),
            other => Err(protocol_violation("registers", &other)),
        }
    }

    fn write_register(&mut self, id: RegisterId, value: u64) -> BackendResult<()>
    {
        expect_done(self.exchange(StubCommand::WriteRegister { id, value })?)
    }

    fn list_modules(&mut self) -> BackendResult<Vec<ModuleInfo>>
    {
        match self.exchange(StubCommand::ListModules)? {
            StubReply::Modules(modules) => Ok(modules),
            other => Err(protocol_violation("module list", &other)),
        }
    }

    fn list_threads(&mut self) -> BackendResult<Vec<ThreadInfo>>
    {
        match self.exchange(StubCommand::ListThreads)? {
            StubReply::Threads(threads) => Ok(threads),
            other => Err(protocol_violation("thread list", &other)),
        }
    }

    fn active_thread(&mut self) -> BackendResult<ThreadId>
    {
        match self.exchange(StubCommand::ActiveThread)? {
            StubReply::Thread(thread) => Ok(thread),
            other => Err(protocol_violation("thread id", &other)),
        }
    }

    fn set_active_thread(&mut self, thread: ThreadId) -> BackendResult<()>
    {
        expect_done(self.exchange(StubCommand::SetActiveThread(thread))?)
    }
}

impl Drop for RemoteStubAdapter
{
    fn drop(&mut self)
    {
        if self.endpoint.take().is_some() {
            let _ = self.link.close();
        }
    }
}
