//! Filling freshly formatted partitions from the running live system.

use crate::boot_config::{isolinux_to_syslinux, set_boot_flags, LoaderKind};
use crate::config::ProvisioningOptions;
use crate::mounts::{mount_guarded, MountPoints};
use crate::planner::PartitionLayout;
use crate::progress::{Phase, ProgressReporter};
use crate::provisioner::PartitionPaths;
use crate::telemetry::{ProgressEvent, ProgressParser, ProgressStream};
use livecopy_error::{DestructiveStep, ProvisionError, ProvisionResult, ValidationError};
use livecopy_hal::{CopyJob, CopyOptions, MountOptions, RsyncOptions, StorageDevice, SystemHal};
use std::path::Path;

/// Copy the system image (and exchange data), rewrite the boot
/// configuration, then mirror the persistence store.
///
/// Everything mounted here is unmounted again before returning, on error
/// paths through the guards.
pub fn populate<H: SystemHal + ?Sized>(
    hal: &H,
    device: &StorageDevice,
    layout: &PartitionLayout,
    paths: &PartitionPaths,
    mounts: &MountPoints,
    options: &ProvisioningOptions,
    progress: &ProgressReporter,
) -> ProvisionResult<()> {
    copy_system(hal, device, layout, paths, mounts, options, progress)?;

    if options.copy_persistence {
        match &paths.persistence {
            Some(target) => copy_persistence(hal, device, target, mounts, options, progress)?,
            None => log::warn!(
                "{}: no persistence partition, persistence copy skipped",
                device.path.display()
            ),
        }
    }

    hal.sync()
        .map_err(|e| ProvisionError::step(&device.path, DestructiveStep::Copy, e))?;
    Ok(())
}

fn copy_system<H: SystemHal + ?Sized>(
    hal: &H,
    device: &StorageDevice,
    layout: &PartitionLayout,
    paths: &PartitionPaths,
    mounts: &MountPoints,
    options: &ProvisioningOptions,
    progress: &ProgressReporter,
) -> ProvisionResult<()> {
    let fail = |step, e: &dyn std::fmt::Display| ProvisionError::step(&device.path, step, e);
    let dry_run = options.dry_run;
    let sources = &options.sources;
    if options.copy_exchange && sources.exchange_dir.is_none() {
        return Err(ProvisionError::Validation(ValidationError::NoExchangeSource));
    }

    let system_guard = mount_guarded(
        hal,
        &paths.system,
        &mounts.system,
        Some("vfat"),
        MountOptions::with_options("umask=0"),
        dry_run,
    )
    .map_err(|e| fail(DestructiveStep::Mount, &e))?;

    let mut jobs = vec![CopyJob::new(&sources.image_dir, &mounts.system)];
    let mut exchange_guard = None;
    if options.copy_exchange {
        match (&paths.exchange, &sources.exchange_dir) {
            (Some(partition), Some(exchange_dir)) => {
                let guard = mount_guarded(
                    hal,
                    partition,
                    &mounts.exchange,
                    Some("vfat"),
                    MountOptions::with_options("umask=0"),
                    dry_run,
                )
                .map_err(|e| fail(DestructiveStep::Mount, &e))?;
                jobs.push(CopyJob::new(exchange_dir, &mounts.exchange));
                exchange_guard = Some(guard);
            }
            _ => log::warn!(
                "{}: no exchange partition, exchange copy skipped",
                device.path.display()
            ),
        }
    }

    progress.phase_started(Phase::Copy);
    if dry_run {
        for job in &jobs {
            log::info!(
                "DRY RUN: copy {} -> {}",
                job.source.display(),
                job.destination.display()
            );
        }
    } else {
        let mut last_percent = None;
        hal.copy_jobs(&jobs, &CopyOptions::vfat_safe(), &mut |p| {
            let percent = p.percent();
            if last_percent != Some(percent) {
                last_percent = Some(percent);
                progress.telemetry(Phase::Copy, ProgressEvent::new(ProgressStream::Copy, percent));
            }
            true
        })
        .map_err(|e| fail(DestructiveStep::Copy, &e))?;
    }
    progress.phase_completed(Phase::Copy);

    progress.phase_started(Phase::BootConfig);
    if !dry_run {
        configure_boot(&mounts.system, layout.has_persistence())
            .map_err(|e| fail(DestructiveStep::BootConfig, &format!("{e:#}")))?;
    }
    progress.phase_completed(Phase::BootConfig);

    if let Some(guard) = exchange_guard {
        guard.unmount().map_err(|e| fail(DestructiveStep::Unmount, &e))?;
    }
    system_guard
        .unmount()
        .map_err(|e| fail(DestructiveStep::Unmount, &e))?;
    Ok(())
}

/// Turn the copied CD loader into the USB one and pick the boot menu
/// default.
fn configure_boot(root: &Path, persistent: bool) -> anyhow::Result<()> {
    isolinux_to_syslinux(root)?;
    if !persistent {
        return Ok(());
    }
    for loader in [LoaderKind::Syslinux, LoaderKind::Isolinux] {
        let dir = root.join(loader.name());
        if dir.is_dir() {
            set_boot_flags(&dir, true)?;
            return Ok(());
        }
    }
    log::warn!("No loader directory in {}, boot flags unchanged", root.display());
    Ok(())
}

fn copy_persistence<H: SystemHal + ?Sized>(
    hal: &H,
    device: &StorageDevice,
    target: &Path,
    mounts: &MountPoints,
    options: &ProvisioningOptions,
    progress: &ProgressReporter,
) -> ProvisionResult<()> {
    let fail = |step, e: &dyn std::fmt::Display| ProvisionError::step(&device.path, step, e);
    let dry_run = options.dry_run;
    let label = &options.sources.persistence_label;

    progress.phase_started(Phase::Persistence);
    let source = hal
        .device_by_label(label)
        .map_err(|e| fail(DestructiveStep::PersistenceCopy, &e))?
        .ok_or_else(|| {
            fail(
                DestructiveStep::PersistenceCopy,
                &format!("no partition labelled {label} on this system"),
            )
        })?;
    if device.owns(&source) {
        return Err(fail(
            DestructiveStep::PersistenceCopy,
            &format!("{} is on the target device", source.display()),
        ));
    }

    let src_guard = mount_guarded(
        hal,
        &source,
        &mounts.persistence_src,
        Some("ext4"),
        MountOptions::read_only(),
        dry_run,
    )
    .map_err(|e| fail(DestructiveStep::Mount, &e))?;
    let dst_guard = mount_guarded(
        hal,
        target,
        &mounts.persistence_dst,
        Some("ext4"),
        MountOptions::new(),
        dry_run,
    )
    .map_err(|e| fail(DestructiveStep::Mount, &e))?;

    if dry_run {
        log::info!(
            "DRY RUN: rsync {} -> {}",
            source.display(),
            target.display()
        );
    } else {
        log::info!("Mirroring persistence {} -> {}", source.display(), target.display());
        let mut parser = ProgressParser::new(ProgressStream::Rsync);
        hal.rsync_stream_stdout(
            &mounts.persistence_src,
            &mounts.persistence_dst,
            &RsyncOptions::mirror(),
            &mut |line| {
                if let Some(event) = parser.parse_line(line) {
                    progress.telemetry(Phase::Persistence, event);
                }
                true
            },
        )
        .map_err(|e| fail(DestructiveStep::PersistenceCopy, &e))?;
    }

    dst_guard
        .unmount()
        .map_err(|e| fail(DestructiveStep::Unmount, &e))?;
    src_guard
        .unmount()
        .map_err(|e| fail(DestructiveStep::Unmount, &e))?;
    progress.phase_completed(Phase::Persistence);
    Ok(())
}
