//! # Kernel Adapter
//!
//! Connects to a kernel debug stub.
//!
//! A kernel target looks like a remote stub with a different shape:
//! "threads" are processors, "modules" are loaded kernel images, and
//! there is no user-mode process list on the other side to enumerate or
//! attach to. Register state is read-only over the kernel transports
//! this profile models. The command traffic itself is identical, so the
//! adapter reuses the [`StubLink`] machinery and only changes the
//! advertised capability profile.

use crate::adapter::stub::{RemoteStubAdapter, StubLink};
use crate::adapter::{
    AdapterCapabilities, AdapterKind, BackendAdapter, BreakpointHandle, RemoteEndpoint,
    TargetEventSender,
};
use crate::error::{BackendError, BackendResult};
use crate::types::{Address, ModuleInfo, RegisterFile, RegisterId, ThreadId, ThreadInfo};

/// Backend adapter for a kernel debug connection
pub struct KernelAdapter
{
    inner: RemoteStubAdapter,
}

impl KernelAdapter
{
    /// Kernel adapter over `link`
    #[must_use]
    pub fn new(link: Box<dyn StubLink>, events: TargetEventSender) -> Self
    {
        Self {
            inner: RemoteStubAdapter::with_profile(
                link,
                events,
                AdapterKind::Kernel,
                AdapterCapabilities::kernel(),
            ),
        }
    }

    /// Endpoint of the current connection, if any
    #[must_use]
    pub fn endpoint(&self) -> Option<&RemoteEndpoint>
    {
        self.inner.endpoint()
    }
}

impl BackendAdapter for KernelAdapter
{
    fn kind(&self) -> AdapterKind
    {
        self.inner.kind()
    }

    fn capabilities(&self) -> AdapterCapabilities
    {
        self.inner.capabilities()
    }

    fn connect_remote(&mut self, endpoint: &RemoteEndpoint) -> BackendResult<()>
    {
        self.inner.connect_remote(endpoint)
    }

    fn disconnect_remote(&mut self) -> BackendResult<()>
    {
        self.inner.disconnect_remote()
    }

    fn detach(&mut self) -> BackendResult<()>
    {
        self.inner.detach()
    }

    fn quit(&mut self) -> BackendResult<()>
    {
        self.inner.quit()
    }

    fn resume(&mut self) -> BackendResult<()>
    {
        self.inner.resume()
    }

    fn pause(&mut self) -> BackendResult<()>
    {
        self.inner.pause()
    }

    fn step_into(&mut self) -> BackendResult<()>
    {
        self.inner.step_into()
    }

    fn step_over(&mut self) -> BackendResult<()>
    {
        self.inner.step_over()
    }

    fn step_return(&mut self) -> BackendResult<()>
    {
        self.inner.step_return()
    }

    fn step_to(&mut self, address: Address) -> BackendResult<()>
    {
        self.inner.step_to(address)
    }

    fn set_breakpoint(&mut self, address: Address) -> BackendResult<BreakpointHandle>
    {
        self.inner.set_breakpoint(address)
    }

    fn clear_breakpoint(&mut self, handle: BreakpointHandle) -> BackendResult<()>
    {
        self.inner.clear_breakpoint(handle)
    }

    fn list_backend_breakpoints(&mut self) -> BackendResult<Vec<(Address, BreakpointHandle)>>
    {
        self.inner.list_backend_breakpoints()
    }

    fn read_memory(&mut self, address: Address, len: usize) -> BackendResult<Vec<u8>>
    {
        self.inner.read_memory(address, len)
    }

    fn write_memory(&mut self, address: Address, data: &[u8]) -> BackendResult<usize>
    {
        self.inner.write_memory(address, data)
    }

    fn read_registers(&mut self) -> BackendResult<RegisterFile>
    {
        self.inner.read_registers()
    }

    fn write_register(&mut self, _id: RegisterId, _value: u64) -> BackendResult<()>
    {
        Err(BackendError::Unsupported(
            "the kernel backend cannot write registers",
        ))
    }

    fn list_modules(&mut self) -> BackendResult<Vec<ModuleInfo>>
    {
        self.inner.list_modules()
    }

    fn list_threads(&mut self) -> BackendResult<Vec<ThreadInfo>>
    {
        self.inner.list_threads()
    }

    fn active_thread(&mut self) -> BackendResult<ThreadId>
    {
        self.inner.active_thread()
    }

    fn set_active_thread(&mut self, thread: ThreadId) -> BackendResult<()>
    {
        self.inner.set_active_thread(thread)
    }
}
