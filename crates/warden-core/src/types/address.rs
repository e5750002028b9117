//! Address types for the live and static views of a target.

use std::fmt;
use std::ops::{Add, Sub};

/// Strongly typed absolute runtime address
///
/// This wrapper around `u64` provides type safety when working with addresses
/// in the debuggee's address space. It prevents accidentally mixing addresses
/// with other `u64` values (sizes, offsets, handles).
///
/// An absolute address is only meaningful while a target is attached and the
/// module containing it is loaded at a known base: after a restart under
/// ASLR the same code will live somewhere else. Anything that must survive
/// detach or restart is stored as a [`ModuleOffset`] instead and converted
/// back through the translator at time of use.
///
/// ## Example
///
/// ```rust
/// use warden_core::types::Address;
///
/// let base = Address::from(0x400000);
/// let entry = base + 0x100; // Add offset
/// assert_eq!(entry.value(), 0x400100);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(u64);

impl Address
{
    /// The null address (0x0)
    ///
    /// Not a mapped address in any practical process image; used as a
    /// sentinel and for initialization.
    pub const ZERO: Self = Address(0);

    /// Create a new address from a `u64` value
    ///
    /// Equivalent to `Address::from(value)` but usable in const contexts.
    ///
    /// ## Example
    ///
    /// ```rust
    /// use warden_core::types::Address;
    ///
    /// const IMAGE_BASE: Address = Address::new(0x0000000100000000);
    /// ```
    #[must_use]
    pub const fn new(value: u64) -> Self
    {
        Address(value)
    }

    /// Get the raw `u64` value of this address
    ///
    /// Use this when handing the address to backend transports that expect
    /// a plain integer.
    ///
    /// ## Example
    ///
    /// ```rust
    /// use warden_core::types::Address;
    ///
    /// let addr = Address::from(0x400100);
    /// assert_eq!(addr.value(), 0x400100);
    /// ```
    #[must_use]
    pub const fn value(self) -> u64
    {
        self.0
    }

    /// Add an offset to this address, checking for overflow
    ///
    /// Returns `Some(new_address)` if the addition doesn't overflow, or `None` if it does.
    pub fn checked_add(self, offset: u64) -> Option<Self>
    {
        self.0.checked_add(offset).map(Address)
    }

    /// Distance from `base` to this address, wrapping on underflow
    ///
    /// This is the module-offset computation: the result is only meaningful
    /// when `base` is at or below `self`, which holds for any address inside
    /// a module's `[base, base + size)` range.
    ///
    /// ## Example
    ///
    /// ```rust
    /// use warden_core::types::Address;
    ///
    /// let base = Address::from(0x400000);
    /// let addr = Address::from(0x400100);
    /// assert_eq!(addr.offset_from(base), 0x100);
    /// ```
    #[must_use]
    pub const fn offset_from(self, base: Address) -> u64
    {
        self.0.wrapping_sub(base.0)
    }
}

impl From<u64> for Address
{
    fn from(value: u64) -> Self
    {
        Address(value)
    }
}

impl From<Address> for u64
{
    fn from(address: Address) -> Self
    {
        address.0
    }
}

impl fmt::Display for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "0x{:016x}", self.0)
    }
}

impl Add<u64> for Address
{
    type Output = Address;

    fn add(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_add(rhs))
    }
}

impl Sub<u64> for Address
{
    type Output = Address;

    fn sub(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_sub(rhs))
    }
}

/// Module-relative code location
///
/// The canonical identity of a code location: the name of the module that
/// owns it plus the offset from that module's base. Unlike an [`Address`],
/// a `ModuleOffset` stays valid across detach, reattach, process restart,
/// and ASLR, which is why the breakpoint set is keyed by it.
///
/// Equality and hashing are by the (module, offset) pair.
///
/// ## Example
///
/// ```rust
/// use warden_core::types::ModuleOffset;
///
/// let site = ModuleOffset::new("a.out", 0x100);
/// assert_eq!(site.to_string(), "a.out+0x100");
/// assert_eq!(site, ModuleOffset::new("a.out", 0x100));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleOffset
{
    /// Name of the owning module (file name, not full path)
    pub module: String,
    /// Offset from the module's load base
    pub offset: u64,
}

impl ModuleOffset
{
    /// Create a new module-relative location
    pub fn new(module: impl Into<String>, offset: u64) -> Self
    {
        Self {
            module: module.into(),
            offset,
        }
    }
}

impl fmt::Display for ModuleOffset
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}+0x{:x}", self.module, self.offset)
    }
}
