//! Mount operations trait.

use crate::HalResult;
use std::path::Path;

/// Trait for mounting and unmounting filesystems.
pub trait MountOps {
    /// Mount a device to a target path.
    ///
    /// # Arguments
    /// * `device` - Device path (e.g., `/dev/sdb1`), or a pseudo source such as `overlay`
    /// * `target` - Mount point path
    /// * `fstype` - Optional filesystem type (e.g., `"ext4"`, `"vfat"`)
    /// * `options` - Mount options
    /// * `dry_run` - If true, log the operation but don't execute it
    fn mount_device(
        &self,
        device: &Path,
        target: &Path,
        fstype: Option<&str>,
        options: MountOptions,
        dry_run: bool,
    ) -> HalResult<()>;

    /// Unmount a filesystem.
    fn unmount(&self, target: &Path, dry_run: bool) -> HalResult<()>;

    /// Unmount `target` and everything mounted below it, deepest first.
    fn unmount_recursive(&self, target: &Path, dry_run: bool) -> HalResult<()>;

    /// Check if a path is currently mounted.
    fn is_mounted(&self, path: &Path) -> HalResult<bool>;
}

/// Mount options and flags.
#[derive(Debug, Clone, Default)]
pub struct MountOptions {
    /// Mount read-only (`MS_RDONLY`).
    pub read_only: bool,
    /// Filesystem-specific options as a comma-separated string (e.g. "umask=0")
    pub options: Option<String>,
}

impl MountOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: impl Into<String>) -> Self {
        Self {
            read_only: false,
            options: Some(options.into()),
        }
    }

    pub fn read_only() -> Self {
        Self {
            read_only: true,
            options: None,
        }
    }

    pub fn and_read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}
