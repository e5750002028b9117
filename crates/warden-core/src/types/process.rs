//! Process, thread, and stop-reason types.

use std::fmt;

/// Identifier for a process
///
/// Wraps the operating system process identifier (pid). On every platform
/// Warden targets, pids fit in a `u32`.
///
/// ## Example
///
/// ```rust
/// use warden_core::types::ProcessId;
///
/// let pid = ProcessId::from(1234);
/// assert_eq!(pid.value(), 1234);
/// assert_eq!(pid.to_string(), "1234");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub u32);

impl ProcessId
{
    /// Get the raw pid value
    #[must_use]
    pub const fn value(self) -> u32
    {
        self.0
    }
}

impl From<u32> for ProcessId
{
    fn from(value: u32) -> Self
    {
        ProcessId(value)
    }
}

impl fmt::Display for ProcessId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.0)
    }
}

/// Identifier for a thread within the target
///
/// The value space is backend-defined: the local adapter uses Linux tids,
/// remote stubs report whatever their protocol carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u64);

impl ThreadId
{
    /// Get the raw thread identifier
    #[must_use]
    pub const fn value(self) -> u64
    {
        self.0
    }
}

impl From<u64> for ThreadId
{
    fn from(value: u64) -> Self
    {
        ThreadId(value)
    }
}

impl fmt::Display for ThreadId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.0)
    }
}

/// A candidate process for attaching
///
/// Returned by process discovery (`list_processes`) so a host can present
/// an attach picker. Backends that have no user-mode process list (kernel
/// targets) report the operation as unsupported instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo
{
    /// Operating system pid
    pub pid: ProcessId,
    /// Executable name as reported by the system
    pub name: String,
}

impl ProcessInfo
{
    /// Create a process record
    pub fn new(pid: ProcessId, name: impl Into<String>) -> Self
    {
        Self { pid, name: name.into() }
    }
}

impl fmt::Display for ProcessInfo
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{} ({})", self.name, self.pid)
    }
}

/// A thread observed in the stopped target
///
/// `ip` is the thread's instruction pointer at the time the snapshot was
/// taken. Backends that cannot cheaply read a non-active thread's context
/// report [`Address::ZERO`](super::Address::ZERO) for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadInfo
{
    /// Backend-defined thread identifier
    pub id: ThreadId,
    /// Instruction pointer at snapshot time
    pub ip: super::Address,
}

impl ThreadInfo
{
    /// Create a thread record
    #[must_use]
    pub const fn new(id: ThreadId, ip: super::Address) -> Self
    {
        Self { id, ip }
    }
}

/// Why the target halted
///
/// Carried by the `TargetStopped` event so sinks can render a status line
/// without querying session state that may have moved on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason
{
    /// First stop after launch, before user code has run
    InitialBreakpoint,
    /// A breakpoint installed by this session was hit
    Breakpoint,
    /// A single step completed
    SingleStep,
    /// The target halted in response to a pause request
    Pause,
    /// The target faulted on an invalid memory access
    AccessViolation,
    /// The target executed an illegal instruction
    IllegalInstruction,
    /// Stopped by a signal
    ///
    /// The `i32` value is the signal number (e.g. SIGSEGV = 11, SIGINT = 2).
    Signal(i32),
    /// Stopped for a reason the backend could not classify
    Unknown,
}

impl fmt::Display for StopReason
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            StopReason::InitialBreakpoint => write!(f, "initial breakpoint"),
            StopReason::Breakpoint => write!(f, "breakpoint"),
            StopReason::SingleStep => write!(f, "single step"),
            StopReason::Pause => write!(f, "paused"),
            StopReason::AccessViolation => write!(f, "access violation"),
            StopReason::IllegalInstruction => write!(f, "illegal instruction"),
            StopReason::Signal(signal) => write!(f, "signal {signal}"),
            StopReason::Unknown => write!(f, "unknown"),
        }
    }
}

/// CPU architecture of the target
///
/// Determines the register-bank layout in
/// [`RegisterFile`](super::RegisterFile) and which breakpoint mechanism the
/// local adapter can use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Architecture
{
    /// 64-bit x86 (Intel/AMD)
    X86_64,
    /// 64-bit ARM
    Arm64,
    /// Any other architecture (or unknown)
    ///
    /// The `&'static str` carries the architecture name (e.g. "riscv64").
    Unknown(&'static str),
}

impl Architecture
{
    /// Architecture of the machine this build runs on
    #[must_use]
    pub const fn host() -> Self
    {
        #[cfg(target_arch = "x86_64")]
        {
            Architecture::X86_64
        }
        #[cfg(target_arch = "aarch64")]
        {
            Architecture::Arm64
        }
        #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
        {
            Architecture::Unknown(std::env::consts::ARCH)
        }
    }
}

impl fmt::Display for Architecture
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Architecture::X86_64 => write!(f, "x86_64"),
            Architecture::Arm64 => write!(f, "arm64"),
            Architecture::Unknown(name) => write!(f, "{name}"),
        }
    }
}
