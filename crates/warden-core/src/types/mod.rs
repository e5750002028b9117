//! # Types
//!
//! Platform-agnostic types used throughout the session controller.
//!
//! These types separate the two address spaces a debugger juggles (the
//! static view the host analyzed and the live view of a running target)
//! and describe processes, threads, registers, and stop reasons without
//! reference to any particular backend transport.

pub mod address;
pub mod module;
pub mod process;
pub mod registers;
pub mod target;

// Re-export all public types
pub use address::{Address, ModuleOffset};
pub use module::{ModuleInfo, ModuleMap};
pub use process::{Architecture, ProcessId, ProcessInfo, StopReason, ThreadId, ThreadInfo};
pub use registers::{RegisterFile, RegisterId, StackSlot};
pub use target::TargetDescriptor;
