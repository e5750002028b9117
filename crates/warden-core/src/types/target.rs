//! Static-view identity of the analyzed target.

use std::path::{Path, PathBuf};

use super::{Address, ModuleOffset};

/// What the host's static analysis knows about the target binary
///
/// A session is created against a `TargetDescriptor` rather than a live
/// process: it names the primary module and fixes the nominal static base
/// that module-relative fallback offsets are computed against, plus the
/// static entry point used for stop-at-entry breakpoints.
///
/// Hosts with their own analysis view fill this in directly; without one,
/// [`TargetDescriptor::from_image`](crate::image) parses the binary on
/// disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDescriptor
{
    /// Path to the target binary, when known
    pub path: PathBuf,
    /// Primary module name (file name of the analyzed binary)
    pub module: String,
    /// Nominal image base in the static view
    pub static_base: Address,
    /// Entry point, absolute in the static view
    pub entry: Address,
    /// Image size in the static view
    pub size: u64,
}

impl TargetDescriptor
{
    /// Create a descriptor from the primary module's static placement
    ///
    /// The entry point defaults to the static base; override it with
    /// [`with_entry`](Self::with_entry) when stop-at-entry matters.
    pub fn new(module: impl Into<String>, static_base: Address, size: u64) -> Self
    {
        Self {
            path: PathBuf::new(),
            module: module.into(),
            static_base,
            entry: static_base,
            size,
        }
    }

    /// Attach the on-disk path
    #[must_use]
    pub fn with_path(mut self, path: impl AsRef<Path>) -> Self
    {
        self.path = path.as_ref().to_path_buf();
        self
    }

    /// Set the static entry point
    #[must_use]
    pub fn with_entry(mut self, entry: Address) -> Self
    {
        self.entry = entry;
        self
    }

    /// Entry point as an offset from the static base
    #[must_use]
    pub fn entry_offset(&self) -> u64
    {
        self.entry.offset_from(self.static_base)
    }

    /// Entry point as a module-relative identity
    ///
    /// This is what gets added to the breakpoint set for a stop-at-entry
    /// launch; being module-relative it lands correctly wherever the
    /// loader places the image.
    #[must_use]
    pub fn entry_site(&self) -> ModuleOffset
    {
        ModuleOffset::new(self.module.clone(), self.entry_offset())
    }
}
