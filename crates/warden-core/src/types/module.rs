//! Loaded-module records and the per-stop module map.

use std::fmt;
use std::path::PathBuf;

use super::Address;

/// A module currently loaded in the target's address space
///
/// `name` is the short file name used in [`ModuleOffset`] identities;
/// `path` is the full on-disk path when the backend knows it.
///
/// [`ModuleOffset`]: super::ModuleOffset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo
{
    /// Short module name (file name, not full path)
    pub name: String,
    /// Full path as reported by the backend, if known
    pub path: PathBuf,
    /// Load base in the live address space
    pub base: Address,
    /// Mapped size in bytes
    pub size: u64,
}

impl ModuleInfo
{
    /// Create a module record without path information
    pub fn new(name: impl Into<String>, base: Address, size: u64) -> Self
    {
        Self {
            name: name.into(),
            path: PathBuf::new(),
            base,
            size,
        }
    }

    /// Attach the on-disk path to this record
    #[must_use]
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self
    {
        self.path = path.into();
        self
    }

    /// One past the last mapped address of this module
    #[must_use]
    pub fn end(&self) -> Address
    {
        self.base + self.size
    }

    /// Whether `address` falls inside this module's `[base, base + size)` range
    #[must_use]
    pub fn contains(&self, address: Address) -> bool
    {
        address >= self.base && address.offset_from(self.base) < self.size
    }
}

impl fmt::Display for ModuleInfo
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{} @ {} (0x{:x} bytes)", self.name, self.base, self.size)
    }
}

/// Snapshot of the modules loaded in the target
///
/// Rebuilt wholesale from the backend on attach and on every stop, and
/// cleared on session teardown; an empty map is the detached state. The
/// load order reported by the backend is preserved so consumers diffing
/// module lists see a stable sequence.
///
/// ## Example
///
/// ```rust
/// use warden_core::types::{Address, ModuleInfo, ModuleMap};
///
/// let mut map = ModuleMap::new();
/// map.rebuild(vec![ModuleInfo::new("a.out", Address::from(0x400000), 0x1000)]);
///
/// assert!(map.get("a.out").is_some());
/// assert_eq!(map.containing(Address::from(0x400100)).unwrap().name, "a.out");
/// assert!(map.containing(Address::from(0x500000)).is_none());
/// ```
#[derive(Debug, Clone, Default)]
pub struct ModuleMap
{
    modules: Vec<ModuleInfo>,
}

impl ModuleMap
{
    /// Create an empty module map
    #[must_use]
    pub fn new() -> Self
    {
        Self { modules: Vec::new() }
    }

    /// Replace the entire contents with a fresh backend-reported list
    pub fn rebuild(&mut self, modules: Vec<ModuleInfo>)
    {
        self.modules = modules;
    }

    /// Drop all modules (detached state)
    pub fn clear(&mut self)
    {
        self.modules.clear();
    }

    /// Look up a module by name (first match in load order)
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ModuleInfo>
    {
        self.modules.iter().find(|m| m.name == name)
    }

    /// Find the module whose mapped range contains `address`
    #[must_use]
    pub fn containing(&self, address: Address) -> Option<&ModuleInfo>
    {
        self.modules.iter().find(|m| m.contains(address))
    }

    /// Number of loaded modules
    #[must_use]
    pub fn len(&self) -> usize
    {
        self.modules.len()
    }

    /// Whether no modules are recorded
    #[must_use]
    pub fn is_empty(&self) -> bool
    {
        self.modules.is_empty()
    }

    /// Iterate over the modules in load order
    pub fn iter(&self) -> impl Iterator<Item = &ModuleInfo>
    {
        self.modules.iter()
    }

    /// Copy-out snapshot for external consumers
    #[must_use]
    pub fn snapshot(&self) -> Vec<ModuleInfo>
    {
        self.modules.clone()
    }
}

impl<'a> IntoIterator for &'a ModuleMap
{
    type Item = &'a ModuleInfo;
    type IntoIter = std::slice::Iter<'a, ModuleInfo>;

    fn into_iter(self) -> Self::IntoIter
    {
        self.modules.iter()
    }
}
