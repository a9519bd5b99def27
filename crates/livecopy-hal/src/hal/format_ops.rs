//! mkfs wrappers for the three target partitions.

use crate::HalResult;
use std::path::Path;

pub trait FormatOps {
    /// Format a device with ext4. Labels and tuning go in `opts.extra_args`.
    fn format_ext4(&self, device: &Path, opts: &FormatOptions) -> HalResult<()>;

    /// Format a device with VFAT (FAT32) and the given volume label.
    fn format_vfat(&self, device: &Path, label: &str, opts: &FormatOptions) -> HalResult<()>;

    /// Adjust ext2/3/4 superblock parameters (`tune2fs`).
    fn tune_ext(&self, device: &Path, opts: &FormatOptions) -> HalResult<()>;
}

/// Without `confirmed` every format call is refused with `SafetyLock`;
/// with `dry_run` the command is only logged.
#[derive(Debug, Clone)]
pub struct FormatOptions {
    pub dry_run: bool,
    pub confirmed: bool,
    /// Passed to the tool verbatim, before the device path.
    pub extra_args: Vec<String>,
}

impl FormatOptions {
    pub fn new(dry_run: bool, confirmed: bool) -> Self {
        Self {
            dry_run,
            confirmed,
            extra_args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }
}
