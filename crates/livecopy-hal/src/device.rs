//! Target storage device descriptors.

use std::fmt;
use std::path::{Path, PathBuf};

/// What kind of hardware a [`StorageDevice`] is, with the descriptive fields
/// the discovery backend could read for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceKind {
    UsbDrive {
        vendor: String,
        model: String,
        revision: String,
    },
    SdCard {
        name: String,
    },
    HardDisk {
        vendor: String,
        model: String,
    },
}

impl DeviceKind {
    /// Separator placed between the disk path and the partition number.
    ///
    /// SD cards (`/dev/mmcblk0p1`) and any disk whose name already ends in a
    /// digit (`/dev/nvme0n1p1`) need `p`; everything else appends the number
    /// directly (`/dev/sdb1`).
    pub fn partition_separator(&self, disk: &Path) -> &'static str {
        let ends_with_digit = disk
            .to_string_lossy()
            .chars()
            .last()
            .is_some_and(|c| c.is_ascii_digit());
        match self {
            DeviceKind::SdCard { .. } => "p",
            _ if ends_with_digit => "p",
            _ => "",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DeviceKind::UsbDrive { .. } => "USB drive",
            DeviceKind::SdCard { .. } => "SD card",
            DeviceKind::HardDisk { .. } => "hard disk",
        }
    }
}

/// A physical target discovered on the host. Never mutated after discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageDevice {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub block_size: u64,
    pub kind: DeviceKind,
}

impl StorageDevice {
    pub fn new(path: impl Into<PathBuf>, size_bytes: u64, kind: DeviceKind) -> Self {
        Self {
            path: path.into(),
            size_bytes,
            block_size: 512,
            kind,
        }
    }

    /// Path of partition `num` (1-based) on this device.
    pub fn partition_path(&self, num: u32) -> PathBuf {
        let sep = self.kind.partition_separator(&self.path);
        PathBuf::from(format!("{}{}{}", self.path.display(), sep, num))
    }

    /// Hard disks are the only non-removable kind; they get the heightened
    /// confirmation.
    pub fn is_removable(&self) -> bool {
        !matches!(self.kind, DeviceKind::HardDisk { .. })
    }

    /// Whether `candidate` is this device or one of its partitions.
    pub fn owns(&self, candidate: &Path) -> bool {
        let disk = self.path.to_string_lossy();
        let candidate = candidate.to_string_lossy();
        let Some(rest) = candidate.strip_prefix(disk.as_ref()) else {
            return false;
        };
        if rest.is_empty() {
            return true;
        }
        let sep = self.kind.partition_separator(&self.path);
        let Some(num) = rest.strip_prefix(sep) else {
            return false;
        };
        !num.is_empty() && num.chars().all(|c| c.is_ascii_digit())
    }
}

impl fmt::Display for StorageDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let gib = self.size_bytes as f64 / (1024.0 * 1024.0 * 1024.0);
        match &self.kind {
            DeviceKind::UsbDrive {
                vendor,
                model,
                revision,
            } => write!(
                f,
                "{} {} {} (rev {}) {:.1} GiB",
                self.path.display(),
                vendor,
                model,
                revision,
                gib
            ),
            DeviceKind::SdCard { name } => {
                write!(f, "{} SD card {} {:.1} GiB", self.path.display(), name, gib)
            }
            DeviceKind::HardDisk { vendor, model } => write!(
                f,
                "{} hard disk {} {} {:.1} GiB",
                self.path.display(),
                vendor,
                model,
                gib
            ),
        }
    }
}
