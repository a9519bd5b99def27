//! Scoped cleanup for mounts and loop devices.
//!
//! Transfer and ISO packaging mount several things at once; every one of
//! them must be released in reverse order on every exit path. Holding the
//! guards in a struct field order that mirrors the setup gives that for free.

use crate::{HalResult, LoopOps, MountOps};
use std::path::{Path, PathBuf};

/// Unmounts `target` (recursively) when dropped, unless already released
/// with [`MountGuard::unmount`].
#[derive(Debug)]
pub struct MountGuard<'a, H: MountOps + ?Sized> {
    hal: &'a H,
    target: PathBuf,
    dry_run: bool,
    armed: bool,
}

impl<'a, H: MountOps + ?Sized> MountGuard<'a, H> {
    pub fn new(hal: &'a H, target: impl Into<PathBuf>, dry_run: bool) -> Self {
        Self {
            hal,
            target: target.into(),
            dry_run,
            armed: true,
        }
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Unmount now. Unlike the drop path, a failure is returned to the caller.
    pub fn unmount(mut self) -> HalResult<()> {
        self.armed = false;
        log::debug!("Releasing mount {}", self.target.display());
        self.hal.unmount_recursive(&self.target, self.dry_run)
    }
}

impl<H: MountOps + ?Sized> Drop for MountGuard<'_, H> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        log::debug!("Dropping mount {}", self.target.display());
        if let Err(err) = self.hal.unmount_recursive(&self.target, self.dry_run) {
            log::warn!("Could not unmount {}: {}", self.target.display(), err);
        }
    }
}

/// Detaches a loop device (e.g. the one backing the base squashfs) when
/// dropped.
#[derive(Debug)]
pub struct LoopGuard<'a, H: LoopOps + ?Sized> {
    hal: &'a H,
    device: String,
    armed: bool,
}

impl<'a, H: LoopOps + ?Sized> LoopGuard<'a, H> {
    pub fn new(hal: &'a H, device: impl Into<String>) -> Self {
        Self {
            hal,
            device: device.into(),
            armed: true,
        }
    }

    /// The attached `/dev/loopN`.
    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn detach(mut self) -> HalResult<()> {
        self.armed = false;
        self.hal.losetup_detach(&self.device)
    }
}

impl<H: LoopOps + ?Sized> Drop for LoopGuard<'_, H> {
    fn drop(&mut self) {
        if self.armed {
            if let Err(err) = self.hal.losetup_detach(&self.device) {
                log::warn!("Could not detach {}: {}", self.device, err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FakeHal, MountOptions, Operation};

    fn count(hal: &FakeHal, check: fn(&Operation) -> bool) -> usize {
        hal.operations().iter().filter(|op| check(op)).count()
    }

    fn mounted(hal: &FakeHal, source: &str, target: &Path) {
        hal.mount_device(
            Path::new(source),
            target,
            Some("vfat"),
            MountOptions::new(),
            false,
        )
        .unwrap();
    }

    #[test]
    fn dropped_guard_unmounts_system_partition() {
        let hal = FakeHal::new();
        let target = Path::new("/run/livecopy/device0/system");
        mounted(&hal, "/dev/sdb2", target);
        assert!(hal.is_mounted(target).unwrap());

        drop(MountGuard::new(&hal, target, false));

        assert!(!hal.is_mounted(target).unwrap());
    }

    #[test]
    fn explicit_unmount_is_not_repeated_on_drop() {
        let hal = FakeHal::new();
        let target = Path::new("/run/livecopy/device0/exchange");
        mounted(&hal, "/dev/sdb1", target);

        MountGuard::new(&hal, target, false).unmount().unwrap();

        assert_eq!(count(&hal, |op| matches!(op, Operation::Unmount { .. })), 1);
    }

    #[test]
    fn guards_release_in_reverse_declaration_order() {
        let hal = FakeHal::new();
        let loop_dev = hal
            .losetup_attach(Path::new("/tmp/filesystem.squashfs"), true)
            .unwrap();
        let base = Path::new("/run/livecopy/iso/base");
        mounted(&hal, &loop_dev, base);

        {
            let _squashfs = LoopGuard::new(&hal, loop_dev.clone());
            let _base = MountGuard::new(&hal, base, false);
        }

        let ops = hal.operations();
        let unmount = ops
            .iter()
            .position(|op| matches!(op, Operation::Unmount { .. }))
            .unwrap();
        let detach = ops
            .iter()
            .position(|op| matches!(op, Operation::LosetupDetach { .. }))
            .unwrap();
        assert!(unmount < detach);
    }

    #[test]
    fn detached_loop_guard_does_nothing_on_drop() {
        let hal = FakeHal::new();
        let loop_dev = hal
            .losetup_attach(Path::new("/tmp/filesystem.squashfs"), true)
            .unwrap();

        LoopGuard::new(&hal, loop_dev).detach().unwrap();

        assert_eq!(
            count(&hal, |op| matches!(op, Operation::LosetupDetach { .. })),
            1
        );
    }
}
