//! # Image Inspection
//!
//! Reads a target binary's static identity straight from the file.
//!
//! The session needs three facts about an image before the target ever
//! runs: the analyzed static base (the lowest loadable segment address),
//! the image span, and the entry point. Everything else about the binary
//! is the host's business; this module parses just enough of the object
//! file to fill a [`TargetDescriptor`] and nothing more.

use std::fs;
use std::path::Path;

use object::{Object, ObjectSegment};
use tracing::debug;

use crate::error::{SessionError, SessionResult};
use crate::types::{Address, TargetDescriptor};

impl TargetDescriptor
{
    /// Build a descriptor by parsing the image at `path`
    ///
    /// The static base is taken as the lowest loadable segment address
    /// and the size as the span up to the highest loadable segment end,
    /// so position-independent images report a base of zero. The module
    /// name is the image's file name, which is also how backends report
    /// it in their module lists.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidImage`] when the file cannot be
    /// read, is not a recognized object format, has no loadable
    /// segments, or its path carries no file name.
    pub fn from_image(path: impl AsRef<Path>) -> SessionResult<TargetDescriptor>
    {
        let path = path.as_ref();

        let data = fs::read(path)
            .map_err(|err| SessionError::InvalidImage(format!("{}: {err}", path.display())))?;
        let file = object::File::parse(&*data)
            .map_err(|err| SessionError::InvalidImage(format!("{}: {err}", path.display())))?;

        let mut lowest = u64::MAX;
        let mut highest = 0u64;
        for segment in file.segments() {
            let size = segment.size();
            if size == 0 {
                continue;
            }
            let address = segment.address();
            lowest = lowest.min(address);
            highest = highest.max(address.saturating_add(size));
        }
        if lowest == u64::MAX {
            return Err(SessionError::InvalidImage(format!(
                "{}: no loadable segments",
                path.display()
            )));
        }

        let module = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_owned)
            .ok_or_else(|| {
                SessionError::InvalidImage(format!("{}: path has no file name", path.display()))
            })?;

        let descriptor = TargetDescriptor::new(module, Address::new(lowest), highest - lowest)
            .with_path(path)
            .with_entry(Address::new(file.entry()));

        debug!(
            module = %descriptor.module,
            base = %descriptor.static_base,
            entry = %descriptor.entry,
            size = descriptor.size,
            "parsed target image"
        );

        Ok(descriptor)
    }
}
