//! Master boot record writes.

use crate::HalResult;
use std::path::Path;

/// Options for destructive boot record writes.
#[derive(Debug, Clone)]
pub struct BootRecordOptions {
    pub dry_run: bool,
    pub confirmed: bool,
}

impl BootRecordOptions {
    pub fn new(dry_run: bool, confirmed: bool) -> Self {
        Self { dry_run, confirmed }
    }
}

/// Trait for writing a boot code template onto the start of a whole disk.
pub trait BootRecordOps {
    /// Copy the bytes of `template` (e.g. syslinux `mbr.bin`) to offset 0 of
    /// `target_disk`, leaving the rest of the device (including the partition
    /// table that follows the boot code) untouched, then flush.
    fn write_boot_record(
        &self,
        template: &Path,
        target_disk: &Path,
        opts: &BootRecordOptions,
    ) -> HalResult<()>;
}
