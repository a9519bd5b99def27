//! Per-device scratch mount points and guarded mounting.

use anyhow::Context;
use livecopy_hal::{HalResult, MountGuard, MountOps, MountOptions};
use std::fs;
use std::path::{Path, PathBuf};

/// Scratch mount points below the work directory.
///
/// Each device of a batch, and each ISO build, gets its own set.
#[derive(Debug, Clone)]
pub struct MountPoints {
    pub system: PathBuf,
    pub exchange: PathBuf,
    /// Persistence store of the running system
    pub persistence_src: PathBuf,
    /// Persistence partition of the target
    pub persistence_dst: PathBuf,
    /// Base squashfs (ISO branch)
    pub base: PathBuf,
    /// Read-only overlay of persistence over base (ISO branch)
    pub union: PathBuf,
}

impl MountPoints {
    pub fn new(work_dir: &Path) -> Self {
        Self {
            system: work_dir.join("system"),
            exchange: work_dir.join("exchange"),
            persistence_src: work_dir.join("persistence_src"),
            persistence_dst: work_dir.join("persistence_dst"),
            base: work_dir.join("base"),
            union: work_dir.join("union"),
        }
    }

    pub fn ensure_dirs(&self) -> anyhow::Result<()> {
        for dir in [
            &self.system,
            &self.exchange,
            &self.persistence_src,
            &self.persistence_dst,
            &self.base,
            &self.union,
        ] {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create mount point: {}", dir.display()))?;
        }
        Ok(())
    }
}

/// Mount `device` on `target` and hand back the guard that unmounts it.
pub fn mount_guarded<'a, H: MountOps + ?Sized>(
    hal: &'a H,
    device: &Path,
    target: &Path,
    fstype: Option<&str>,
    options: MountOptions,
    dry_run: bool,
) -> HalResult<MountGuard<'a, H>> {
    log::info!(
        "Mounting {} on {} ({})",
        device.display(),
        target.display(),
        fstype.unwrap_or("auto")
    );
    hal.mount_device(device, target, fstype, options, dry_run)?;
    Ok(MountGuard::new(hal, target, dry_run))
}
