//! Making the system partition bootable.

use crate::boot_config::{isolinux_to_syslinux, LoaderKind};
use crate::config::ProvisioningOptions;
use crate::mounts::mount_guarded;
use crate::progress::{Phase, ProgressReporter};
use crate::safety::ArmToken;
use livecopy_error::{DestructiveStep, ProvisionError, ProvisionResult};
use livecopy_hal::{MountOptions, StorageDevice, SystemHal};
use std::fs;
use std::path::Path;
use std::time::Duration;

const SYSLINUX_TIMEOUT: Duration = Duration::from_secs(120);

/// Make sure `syslinux/syslinux.cfg` exists below `root`, renaming a
/// leftover CD loader when needed.
pub fn ensure_syslinux_config(root: &Path) -> anyhow::Result<()> {
    let sys = LoaderKind::Syslinux;
    let dir = root.join(sys.name());
    if !dir.is_dir() {
        isolinux_to_syslinux(root)?;
    }
    let cfg = dir.join(sys.config_file());
    if cfg.exists() {
        return Ok(());
    }
    let legacy = dir.join(LoaderKind::Isolinux.config_file());
    if legacy.exists() {
        log::info!("Renaming {} -> {}", legacy.display(), cfg.display());
        fs::rename(&legacy, &cfg)?;
        return Ok(());
    }
    anyhow::bail!("{} is missing", cfg.display())
}

/// Install syslinux into `system_partition` and write the boot code onto
/// `device`.
pub fn install<H: SystemHal + ?Sized>(
    hal: &H,
    device: &StorageDevice,
    system_partition: &Path,
    mount_point: &Path,
    options: &ProvisioningOptions,
    progress: &ProgressReporter,
    token: &ArmToken,
) -> ProvisionResult<()> {
    let fail = |step, e: &dyn std::fmt::Display| ProvisionError::step(&device.path, step, e);
    let dry_run = options.dry_run;
    progress.phase_started(Phase::Bootloader);

    let guard = mount_guarded(
        hal,
        system_partition,
        mount_point,
        Some("vfat"),
        MountOptions::with_options("umask=0"),
        dry_run,
    )
    .map_err(|e| fail(DestructiveStep::Mount, &e))?;
    if !dry_run {
        ensure_syslinux_config(mount_point)
            .map_err(|e| fail(DestructiveStep::Bootloader, &format!("{e:#}")))?;
    }
    guard
        .unmount()
        .map_err(|e| fail(DestructiveStep::Unmount, &e))?;

    let partition = system_partition.to_string_lossy();
    let args = ["-i", "-d", LoaderKind::Syslinux.name(), &*partition];
    if dry_run {
        log::info!("DRY RUN: syslinux {}", args.join(" "));
    } else {
        log::info!("Installing syslinux on {}", system_partition.display());
        hal.command_status("syslinux", &args, SYSLINUX_TIMEOUT)
            .map_err(|e| fail(DestructiveStep::Bootloader, &e))?;
    }

    log::info!(
        "Writing {} to {}",
        options.mbr_template.display(),
        device.path.display()
    );
    hal.write_boot_record(
        &options.mbr_template,
        &device.path,
        &token.boot_record_options(dry_run),
    )
    .map_err(|e| fail(DestructiveStep::BootRecord, &e))?;
    hal.sync()
        .map_err(|e| fail(DestructiveStep::BootRecord, &e))?;

    progress.phase_completed(Phase::Bootloader);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::safety::{Answer, ConfirmRequest};
    use livecopy_hal::{DeviceKind, FakeHal, MountOps, Operation};
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn sd() -> StorageDevice {
        StorageDevice::new(
            "/dev/mmcblk0",
            16 << 30,
            DeviceKind::SdCard {
                name: "SL16G".to_string(),
            },
        )
    }

    fn token() -> ArmToken {
        ArmToken::try_new(&ConfirmRequest::for_selection(&[sd()]), &Answer::Yes).unwrap()
    }

    #[test]
    fn leftover_isolinux_cfg_is_renamed() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("syslinux")).unwrap();
        fs::write(dir.path().join("syslinux/isolinux.cfg"), "default live\n").unwrap();
        ensure_syslinux_config(dir.path()).unwrap();
        assert!(dir.path().join("syslinux/syslinux.cfg").exists());
    }

    #[test]
    fn missing_loader_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(ensure_syslinux_config(dir.path()).is_err());
    }

    #[test]
    fn installs_syslinux_then_boot_record() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("syslinux")).unwrap();
        fs::write(dir.path().join("syslinux/syslinux.cfg"), "default live\n").unwrap();
        let hal = FakeHal::new();
        let dev = sd();

        install(
            &hal,
            &dev,
            Path::new("/dev/mmcblk0p2"),
            dir.path(),
            &ProvisioningOptions::default(),
            &ProgressReporter::silent(),
            &token(),
        )
        .unwrap();

        assert_eq!(
            hal.commands("syslinux"),
            vec![vec![
                "-i".to_string(),
                "-d".to_string(),
                "syslinux".to_string(),
                "/dev/mmcblk0p2".to_string()
            ]]
        );
        let ops = hal.operations();
        let syslinux = ops
            .iter()
            .position(|op| matches!(op, Operation::Command { program, .. } if program == "syslinux"))
            .unwrap();
        let mbr = ops
            .iter()
            .position(|op| {
                *op == Operation::BootRecord {
                    template: PathBuf::from("/usr/lib/syslinux/mbr/mbr.bin"),
                    disk: PathBuf::from("/dev/mmcblk0"),
                }
            })
            .unwrap();
        assert!(syslinux < mbr);
        assert!(!hal.is_mounted(dir.path()).unwrap());
    }

    #[test]
    fn syslinux_failure_skips_boot_record() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("syslinux")).unwrap();
        fs::write(dir.path().join("syslinux/syslinux.cfg"), "default live\n").unwrap();
        let hal = FakeHal::new().fail_command("syslinux");

        let err = install(
            &hal,
            &sd(),
            Path::new("/dev/mmcblk0p2"),
            dir.path(),
            &ProvisioningOptions::default(),
            &ProgressReporter::silent(),
            &token(),
        )
        .unwrap_err();
        assert_eq!(err.failed_step(), Some(DestructiveStep::Bootloader));
        assert!(!hal.has_operation(|op| matches!(op, Operation::BootRecord { .. })));
    }
}
