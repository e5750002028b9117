//! # warden-core
//!
//! Debug session control for Warden.
//!
//! This crate provides everything that sits between a debugger host and
//! a target backend, including:
//! - A session state machine with ordered lifecycle events
//! - Module-relative address translation that survives relocation
//! - A persistent breakpoint set reconciled against the backend
//! - Pluggable backend adapters: local process, remote stub, kernel,
//!   and a scripted replay backend for tests
//!
//! ## Platform Support
//!
//! - **Linux**: local process debugging over `ptrace`
//! - **Everywhere**: the remote stub, kernel, and replay backends are
//!   pure protocol plumbing and build on any platform
//!
//! ## Why unsafe code is needed
//!
//! The local backend drives `ptrace(2)` and reads tracee state through
//! `/proc`, which means raw system calls against another process's
//! memory and registers. Those calls are wrapped in safe abstractions
//! here, but the calls themselves must be `unsafe`.

#![allow(unsafe_code)] // Required for ptrace in the local backend

pub mod adapter;
pub mod breakpoints;
pub mod controller;
pub mod error;
pub mod events;
pub mod registry;
pub mod translate;
pub mod types;

mod image;

pub use controller::{SessionController, SessionState};
// Re-export commonly used types
pub use error::{BackendError, SessionError, SessionResult};
pub use events::SessionEvent;
pub use translate::AddressTranslator;
pub use types::{Address, ModuleOffset, TargetDescriptor};
#[cfg(target_os = "linux")]
pub use adapter::local::LocalAdapter;
