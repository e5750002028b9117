//! CPU register snapshot types.

use smallvec::SmallVec;

use super::{Address, Architecture};

/// Identifier for a register in a [`RegisterFile`]
///
/// The common registers (`Pc`, `Sp`, `Fp`, `Status`) exist on every
/// architecture Warden cares about; everything else is addressed by its
/// index in the general-purpose bank, whose layout is architecture-defined:
///
/// - **x86-64**: RAX, RBX, RCX, RDX, RSI, RDI, R8–R15 (14 slots)
/// - **ARM64**: X0–X30 (31 slots)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterId
{
    /// Program counter (RIP on x86-64, PC on ARM64)
    Pc,
    /// Stack pointer (RSP on x86-64, SP on ARM64)
    Sp,
    /// Frame pointer (RBP on x86-64, X29 on ARM64)
    Fp,
    /// Flags/status register (RFLAGS on x86-64, PSTATE on ARM64)
    Status,
    /// Index into the architecture-defined general-purpose bank
    General(u8),
}

/// Point-in-time register snapshot for the active thread
///
/// Snapshots are taken by the controller on every stop and handed out by
/// value; mutating a snapshot does not touch the target, writes go through
/// the session's `write_register` command.
///
/// ## Example
///
/// ```rust
/// use warden_core::types::{Address, Architecture, RegisterFile, RegisterId};
///
/// let mut regs = RegisterFile::new().with_arch(Architecture::X86_64);
/// regs.set(RegisterId::Pc, 0x400100);
/// assert_eq!(regs.get(RegisterId::Pc), Some(0x400100));
/// assert_eq!(regs.pc, Address::from(0x400100));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterFile
{
    /// Program counter - address of the next instruction to execute
    pub pc: Address,
    /// Stack pointer - top of the active thread's stack
    pub sp: Address,
    /// Frame pointer - base of the current stack frame
    pub fp: Address,
    /// Flags/status register
    pub status: u64,
    /// General-purpose registers in the architecture-defined order
    pub general: SmallVec<[u64; 16]>,
    /// CPU architecture (fixes the general-bank layout)
    architecture: Architecture,
}

impl RegisterFile
{
    /// Create an empty register file
    ///
    /// All registers are zero and the architecture is unknown; set it with
    /// [`with_arch`](Self::with_arch) before using indexed access.
    #[must_use]
    pub fn new() -> Self
    {
        Self {
            pc: Address::ZERO,
            sp: Address::ZERO,
            fp: Address::ZERO,
            status: 0,
            general: SmallVec::new(),
            architecture: Architecture::Unknown("unknown"),
        }
    }

    /// Set the CPU architecture for this register file
    #[must_use]
    pub fn with_arch(mut self, architecture: Architecture) -> Self
    {
        self.architecture = architecture;
        self
    }

    /// Get the CPU architecture for this register file
    #[must_use]
    pub fn architecture(&self) -> Architecture
    {
        self.architecture
    }

    /// Read a register by identifier
    ///
    /// Returns `None` when a `General` index is out of range for the
    /// snapshot's bank.
    #[must_use]
    pub fn get(&self, id: RegisterId) -> Option<u64>
    {
        match id {
            RegisterId::Pc => Some(self.pc.value()),
            RegisterId::Sp => Some(self.sp.value()),
            RegisterId::Fp => Some(self.fp.value()),
            RegisterId::Status => Some(self.status),
            RegisterId::General(index) => self.general.get(index as usize).copied(),
        }
    }

    /// Write a register in this snapshot by identifier
    ///
    /// Returns `None` when a `General` index is out of range; the snapshot
    /// is unchanged in that case.
    pub fn set(&mut self, id: RegisterId, value: u64) -> Option<()>
    {
        match id {
            RegisterId::Pc => {
                self.pc = Address::from(value);
                Some(())
            }
            RegisterId::Sp => {
                self.sp = Address::from(value);
                Some(())
            }
            RegisterId::Fp => {
                self.fp = Address::from(value);
                Some(())
            }
            RegisterId::Status => {
                self.status = value;
                Some(())
            }
            RegisterId::General(index) => {
                let slot = self.general.get_mut(index as usize)?;
                *slot = value;
                Some(())
            }
        }
    }
}

impl Default for RegisterFile
{
    fn default() -> Self
    {
        Self::new()
    }
}

/// One word of a stack window snapshot
///
/// `value` is `None` when the word could not be read; per-item memory
/// failures are reported as sentinels, never as errors that abort the
/// whole window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackSlot
{
    /// Address the word was read from
    pub address: Address,
    /// The word, or `None` if that address was unreadable
    pub value: Option<u64>,
}

impl StackSlot
{
    /// Create a stack slot record
    #[must_use]
    pub const fn new(address: Address, value: Option<u64>) -> Self
    {
        Self { address, value }
    }

    /// Whether the read at this address failed
    #[must_use]
    pub const fn is_unreadable(&self) -> bool
    {
        self.value.is_none()
    }
}
