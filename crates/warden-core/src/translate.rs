//! # Address Translation
//!
//! Converts between module-relative sites and absolute runtime
//! addresses.
//!
//! The host analyzes an image at a fixed static base, but ASLR means the
//! loader places it somewhere else at every run. User-visible locations
//! are therefore stored as [`ModuleOffset`] values (stable across runs)
//! and converted to live [`Address`] values only against the current
//! [`ModuleMap`]. The translator itself is a small immutable value: it
//! knows the primary module's name and analyzed static base, and all
//! runtime knowledge comes in through the map argument.
//!
//! ## Direction Asymmetry
//!
//! - [`AddressTranslator::to_absolute`] is fallible: a site in a module
//!   that is not currently loaded has no absolute address yet.
//! - [`AddressTranslator::to_relative`] is total: an address outside
//!   every known module is expressed relative to the primary module, so
//!   callers can always render *something* stable for an arbitrary
//!   pointer.
//!
//! ## Example
//!
//! ```rust
//! use warden_core::translate::AddressTranslator;
//! use warden_core::types::{Address, ModuleInfo, ModuleMap, ModuleOffset, TargetDescriptor};
//!
//! let target = TargetDescriptor::new("app", Address::new(0x0040_0000), 0x1000);
//! let translator = AddressTranslator::new(&target);
//!
//! let mut modules = ModuleMap::new();
//! modules.rebuild(vec![ModuleInfo::new("app", Address::new(0x0055_0000), 0x1000)]);
//!
//! let site = ModuleOffset::new("app", 0x100);
//! let absolute = translator.to_absolute(&site, &modules).unwrap();
//! assert_eq!(absolute, Address::new(0x0055_0100));
//! assert_eq!(translator.to_relative(absolute, &modules), site);
//! ```

use thiserror::Error;

use crate::types::{Address, ModuleMap, ModuleOffset, TargetDescriptor};

/// Failure to resolve a module-relative site
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TranslateError
{
    /// The named module is not present in the current module map
    ///
    /// The site itself stays valid; resolution can be retried after the
    /// next module refresh.
    #[error("Module '{module}' is not loaded")]
    NotLoaded
    {
        /// Name of the module the site refers to
        module: String,
    },
}

/// Translates between module-relative and absolute addresses
///
/// Constructed once per session from the target's static identity and
/// consulted at every stop with the freshly refreshed module map. The
/// translator carries no mutable state, so a stale copy can never poison
/// later translations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressTranslator
{
    primary: String,
    static_base: Address,
}

impl AddressTranslator
{
    /// Create a translator for the given target
    #[must_use]
    pub fn new(target: &TargetDescriptor) -> Self
    {
        Self {
            primary: target.module.clone(),
            static_base: target.static_base,
        }
    }

    /// Name of the primary module, used as the relative fallback
    #[must_use]
    pub fn primary_module(&self) -> &str
    {
        &self.primary
    }

    /// Static base the primary module was analyzed at
    #[must_use]
    pub const fn static_base(&self) -> Address
    {
        self.static_base
    }

    /// Runtime base of the primary module, if it is currently loaded
    #[must_use]
    pub fn runtime_base(&self, modules: &ModuleMap) -> Option<Address>
    {
        modules.get(&self.primary).map(|info| info.base)
    }

    /// Resolve a module-relative site against the current module map
    ///
    /// Module names are matched exactly against the map. The module's
    /// size is deliberately not consulted: a site past the recorded end
    /// still resolves, since maps routinely under-report section padding.
    ///
    /// # Errors
    ///
    /// Returns [`TranslateError::NotLoaded`] when the site's module has no
    /// entry in `modules`.
    pub fn to_absolute(&self, site: &ModuleOffset, modules: &ModuleMap) -> Result<Address, TranslateError>
    {
        match modules.get(&site.module) {
            Some(info) => Ok(info.base + site.offset),
            None => Err(TranslateError::NotLoaded {
                module: site.module.clone(),
            }),
        }
    }

    /// Express an absolute address as a module-relative site
    ///
    /// Prefers the module whose range contains the address. Addresses
    /// outside every known module fall back to the primary module,
    /// measured from its runtime base when loaded and from the analyzed
    /// static base otherwise. Offsets use wrapping arithmetic, so an
    /// address below the fallback base produces a large offset rather
    /// than a panic.
    #[must_use]
    pub fn to_relative(&self, address: Address, modules: &ModuleMap) -> ModuleOffset
    {
        if let Some(info) = modules.containing(address) {
            return ModuleOffset::new(info.name.clone(), address.offset_from(info.base));
        }

        let fallback_base = self.runtime_base(modules).unwrap_or(self.static_base);
        ModuleOffset::new(self.primary.clone(), address.offset_from(fallback_base))
    }
}
