//! Subcommand implementations.

use crate::confirm::TerminalConfirmer;
use crate::progress::spawn_printer;
use anyhow::{anyhow, bail, Context, Result};
use livecopy_hal::{StorageDevice, SystemHal};
use livecopy_workflow::planner::plan;
use livecopy_workflow::workflow::measure_sources;
use livecopy_workflow::{
    DeviceOutcome, IsoTarget, ProgressReporter, ProvisioningOptions, Workflow,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc;

/// One line per candidate device with the layout it would receive.
pub fn device_rows<H: SystemHal + ?Sized>(
    hal: &H,
    options: &ProvisioningOptions,
    all: bool,
) -> Result<Vec<String>> {
    let devices = hal.list_devices(all).context("Failed to list devices")?;
    let sizes = match measure_sources(hal, options) {
        Ok(sizes) => Some(sizes),
        Err(e) => {
            log::warn!("Could not measure the live system: {}", e);
            None
        }
    };

    Ok(devices
        .iter()
        .map(|device| match &sizes {
            Some(sizes) => {
                let layout = plan(
                    device.size_bytes,
                    sizes.system_bytes,
                    options.requested_exchange_bytes(),
                );
                format!("{}  [{}]", device, layout.class)
            }
            None => device.to_string(),
        })
        .collect())
}

pub fn list<H: SystemHal + ?Sized>(
    hal: &H,
    mut options: ProvisioningOptions,
    all: bool,
) -> Result<()> {
    options.resolve_flavor(&hal.os_release().unwrap_or_default());
    let rows = device_rows(hal, &options, all)?;
    if rows.is_empty() {
        println!("No candidate devices found.");
    }
    for row in rows {
        println!("{}", row);
    }
    Ok(())
}

/// Map requested paths (symlinks such as `/dev/disk/by-id/...` included)
/// onto discovered devices.
pub fn resolve_targets<H: SystemHal + ?Sized>(
    hal: &H,
    requested: &[PathBuf],
) -> Result<Vec<StorageDevice>> {
    let known = hal.list_devices(true).context("Failed to list devices")?;
    requested
        .iter()
        .map(|path| {
            let resolved = fs::canonicalize(path).unwrap_or_else(|_| path.clone());
            known
                .iter()
                .find(|d| d.path == resolved || d.path == *path)
                .cloned()
                .ok_or_else(|| anyhow!("{} is not a usable target device", path.display()))
        })
        .collect()
}

pub fn install<H: SystemHal + ?Sized>(
    hal: &H,
    options: ProvisioningOptions,
    devices: &[PathBuf],
    yes_i_know: bool,
) -> Result<()> {
    let targets = resolve_targets(hal, devices)?;
    let confirmer = TerminalConfirmer::new(yes_i_know);
    let (tx, rx) = mpsc::channel();
    let printer = spawn_printer(rx);

    let mut workflow = Workflow::new(hal, options, &confirmer, ProgressReporter::new(tx));
    let outcome = workflow.run(&targets);
    drop(workflow);
    printer
        .join()
        .map_err(|_| anyhow!("progress printer panicked"))?;

    let result = match outcome {
        Ok(result) => result,
        Err(err) if err.is_safety_abort() => {
            log::info!("🛑 {}", err);
            println!("Aborted, nothing was written.");
            return Ok(());
        }
        Err(err) => return Err(err).context("Provisioning did not start"),
    };

    for (device, outcome) in &result.outcomes {
        match outcome {
            DeviceOutcome::Succeeded => println!("✅ {}", device.display()),
            DeviceOutcome::Failed(reason) => println!("❌ {}: {}", device.display(), reason),
            DeviceOutcome::NotStarted => println!("⏭  {} (not started)", device.display()),
        }
    }
    if let Some((device, reason)) = result.failure() {
        bail!("Provisioning failed on {}: {}", device.display(), reason);
    }
    log::info!("🎉 {} device(s) ready", result.succeeded());
    Ok(())
}

pub fn iso<H: SystemHal + ?Sized>(
    hal: &H,
    options: ProvisioningOptions,
    output: &Path,
    label: Option<&str>,
) -> Result<()> {
    let confirmer = TerminalConfirmer::new(false);
    let (tx, rx) = mpsc::channel();
    let printer = spawn_printer(rx);

    let mut workflow = Workflow::new(hal, options, &confirmer, ProgressReporter::new(tx));
    let label = label
        .map(str::to_string)
        .unwrap_or_else(|| workflow.options().system_label().to_string());
    let target = IsoTarget::new(output, label);
    let outcome = workflow.build_iso(&target);
    drop(workflow);
    printer
        .join()
        .map_err(|_| anyhow!("progress printer panicked"))?;

    outcome.with_context(|| format!("Failed to build {}", output.display()))?;
    log::info!("🎉 ISO written to {}", output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use livecopy_hal::{DeviceKind, FakeHal};
    use livecopy_workflow::planner::MIB;

    const GIB: u64 = 1024 * MIB;

    fn hal() -> FakeHal {
        FakeHal::new()
            .with_device(StorageDevice::new(
                "/dev/sdb",
                8 * GIB,
                DeviceKind::UsbDrive {
                    vendor: "Kingston".to_string(),
                    model: "DataTraveler".to_string(),
                    revision: "PMAP".to_string(),
                },
            ))
            .with_device(StorageDevice::new(
                "/dev/sda",
                500 * GIB,
                DeviceKind::HardDisk {
                    vendor: "WDC".to_string(),
                    model: "Blue".to_string(),
                },
            ))
    }

    #[test]
    fn rows_show_layout_class() {
        let options = ProvisioningOptions {
            system_size_bytes: Some(GIB),
            ..Default::default()
        };
        let rows = device_rows(&hal(), &options, false).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].starts_with("/dev/sdb"));
        assert!(rows[0].ends_with("[EXCHANGE]"), "{}", rows[0]);
    }

    #[test]
    fn all_includes_hard_disks() {
        let options = ProvisioningOptions {
            system_size_bytes: Some(GIB),
            ..Default::default()
        };
        assert_eq!(device_rows(&hal(), &options, true).unwrap().len(), 2);
    }

    #[test]
    fn unknown_target_is_rejected() {
        let err = resolve_targets(&hal(), &[PathBuf::from("/dev/sdz")]).unwrap_err();
        assert!(err.to_string().contains("/dev/sdz"));

        let found = resolve_targets(&hal(), &[PathBuf::from("/dev/sda")]).unwrap();
        assert!(!found[0].is_removable());
    }
}
