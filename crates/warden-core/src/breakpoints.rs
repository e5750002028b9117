//! # Breakpoint Set
//!
//! The session's source of truth for user breakpoints.
//!
//! Breakpoints are stored as module-relative [`ModuleOffset`] sites, not
//! absolute addresses, so they stay meaningful across runs, restarts, and
//! module rebasing. The set is pure bookkeeping: it never talks to a
//! backend. The controller mirrors it into whatever backend is currently
//! connected and reconciles the two at every stop, which is also why the
//! set deliberately outlives individual sessions: tearing a target down
//! must not cost the user their breakpoints.
//!
//! Insertion order is preserved and observable: listings, snapshots, and
//! reconciliation all walk sites oldest-first.

use crate::types::ModuleOffset;

/// Ordered, duplicate-free collection of breakpoint sites
///
/// ## Example
///
/// ```rust
/// use warden_core::breakpoints::BreakpointSet;
/// use warden_core::types::ModuleOffset;
///
/// let mut set = BreakpointSet::new();
/// let site = ModuleOffset::new("app", 0x100);
///
/// assert!(set.add(site.clone()));
/// assert!(!set.add(site.clone()));
/// assert!(set.contains(&site));
/// assert_eq!(set.len(), 1);
///
/// assert!(set.remove(&site));
/// assert!(set.is_empty());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BreakpointSet
{
    sites: Vec<ModuleOffset>,
}

impl BreakpointSet
{
    /// Create an empty set
    #[must_use]
    pub const fn new() -> Self
    {
        Self { sites: Vec::new() }
    }

    /// Add a site, returning whether the set changed
    ///
    /// Adding a site that is already present is a no-op and returns
    /// `false`; the original insertion position is kept.
    pub fn add(&mut self, site: ModuleOffset) -> bool
    {
        if self.contains(&site) {
            return false;
        }
        self.sites.push(site);
        true
    }

    /// Remove a site, returning whether the set changed
    pub fn remove(&mut self, site: &ModuleOffset) -> bool
    {
        let before = self.sites.len();
        self.sites.retain(|existing| existing != site);
        self.sites.len() != before
    }

    /// Whether the exact site is present
    #[must_use]
    pub fn contains(&self, site: &ModuleOffset) -> bool
    {
        self.sites.iter().any(|existing| existing == site)
    }

    /// All sites in insertion order
    #[must_use]
    pub fn list(&self) -> &[ModuleOffset]
    {
        &self.sites
    }

    /// Owned copy of the sites in insertion order
    ///
    /// Handed to callers that need the list to survive later mutation of
    /// the set.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ModuleOffset>
    {
        self.sites.clone()
    }

    /// Number of sites in the set
    #[must_use]
    pub fn len(&self) -> usize
    {
        self.sites.len()
    }

    /// Whether the set holds no sites
    #[must_use]
    pub fn is_empty(&self) -> bool
    {
        self.sites.is_empty()
    }

    /// Remove every site
    pub fn clear(&mut self)
    {
        self.sites.clear();
    }

    /// Iterate sites in insertion order
    pub fn iter(&self) -> std::slice::Iter<'_, ModuleOffset>
    {
        self.sites.iter()
    }
}

impl<'a> IntoIterator for &'a BreakpointSet
{
    type Item = &'a ModuleOffset;
    type IntoIter = std::slice::Iter<'a, ModuleOffset>;

    fn into_iter(self) -> Self::IntoIter
    {
        self.iter()
    }
}

impl FromIterator<ModuleOffset> for BreakpointSet
{
    fn from_iter<I: IntoIterator<Item = ModuleOffset>>(iter: I) -> Self
    {
        let mut set = Self::new();
        for site in iter {
            set.add(site);
        }
        set
    }
}
