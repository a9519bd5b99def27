//! Block device discovery from sysfs.

use crate::{DeviceKind, StorageDevice};
use anyhow::{anyhow, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub fn device_basename(path: &Path) -> Result<String> {
    let name = path
        .file_name()
        .ok_or_else(|| anyhow!("invalid device path {}", path.display()))?
        .to_string_lossy()
        .to_string();
    Ok(name)
}

/// Reads the block device size from `/sys/class/block/<dev>/size`.
///
/// The `size` file is expressed in 512-byte sectors.
pub fn block_device_size_bytes(sys_block_dev_dir: &Path) -> Result<u64> {
    let sectors_str = fs::read_to_string(sys_block_dev_dir.join("size"))?;
    let sectors: u64 = sectors_str.trim().parse()?;
    Ok(sectors.saturating_mul(512))
}

pub fn scan_block_devices(include_non_removable: bool) -> Result<Vec<StorageDevice>> {
    scan_block_devices_in(Path::new("/sys/block"), include_non_removable)
}

pub fn scan_block_devices_in(
    sys_block_root: &Path,
    include_non_removable: bool,
) -> Result<Vec<StorageDevice>> {
    let mut out = Vec::new();
    let entries = fs::read_dir(sys_block_root)?;
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if should_skip_block_device(&name) {
            continue;
        }
        let sysfs_path = sys_block_root.join(&name);
        let size_bytes = match block_device_size_bytes(&sysfs_path) {
            Ok(v) => v,
            Err(_) => continue,
        };
        if size_bytes == 0 {
            continue;
        }

        let kind = classify(&name, &sysfs_path);
        if matches!(kind, DeviceKind::HardDisk { .. }) && !include_non_removable {
            continue;
        }
        let block_size = read_trimmed(sysfs_path.join("queue/logical_block_size"))
            .and_then(|v| v.parse().ok())
            .unwrap_or(512);

        out.push(StorageDevice {
            path: PathBuf::from("/dev").join(&name),
            size_bytes,
            block_size,
            kind,
        });
    }
    out.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(out)
}

fn classify(name: &str, sysfs_path: &Path) -> DeviceKind {
    if name.starts_with("mmcblk") {
        return DeviceKind::SdCard {
            name: read_trimmed(sysfs_path.join("device/name")).unwrap_or_default(),
        };
    }
    // /sys/block/<dev> is a symlink into the device tree; USB devices sit below a usb bus node.
    let on_usb_bus = fs::canonicalize(sysfs_path)
        .map(|p| p.to_string_lossy().contains("/usb"))
        .unwrap_or(false);
    let removable = read_trimmed(sysfs_path.join("removable"))
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0)
        == 1;
    let vendor = read_trimmed(sysfs_path.join("device/vendor")).unwrap_or_default();
    let model = read_trimmed(sysfs_path.join("device/model")).unwrap_or_default();
    if on_usb_bus || removable {
        DeviceKind::UsbDrive {
            vendor,
            model,
            revision: read_trimmed(sysfs_path.join("device/rev")).unwrap_or_default(),
        }
    } else {
        DeviceKind::HardDisk { vendor, model }
    }
}

fn read_trimmed(path: PathBuf) -> Option<String> {
    fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn should_skip_block_device(name: &str) -> bool {
    // Avoid ephemeral / virtual devices in disk selection.
    name.starts_with("loop")
        || name.starts_with("ram")
        || name.starts_with("zram")
        || name.starts_with("dm-")
        || name.starts_with("md")
        || name.starts_with("sr")
}
