//! Device probing operations (sysfs, blkid, statvfs).

use crate::{HalResult, StorageDevice};
use std::path::{Path, PathBuf};

/// Probing operations trait.
pub trait ProbeOps {
    /// Candidate target devices. Hard disks are only listed when
    /// `include_non_removable` is set.
    fn list_devices(&self, include_non_removable: bool) -> HalResult<Vec<StorageDevice>>;

    /// Mount points of `device` and its partitions, deepest first.
    fn mounted_partitions(&self, device: &StorageDevice) -> HalResult<Vec<PathBuf>>;

    /// Block device carrying the filesystem label `label`, if any.
    fn device_by_label(&self, label: &str) -> HalResult<Option<PathBuf>>;

    /// Used bytes of the filesystem mounted at `mount_point`.
    fn used_bytes(&self, mount_point: &Path) -> HalResult<u64>;

    /// Sum of regular file sizes below `dir`.
    fn tree_size_bytes(&self, dir: &Path) -> HalResult<u64>;
}
