//! The provisioning state machine: select, confirm, then provision devices
//! one after the other (or build an ISO instead).

use crate::bootloader;
use crate::config::ProvisioningOptions;
use crate::iso::{self, IsoTarget};
use crate::mounts::{mount_guarded, MountPoints};
use crate::orchestrator;
use crate::progress::{ProgressReporter, ProgressUpdate};
use crate::provisioner;
use crate::safety::{ArmToken, ConfirmRequest, Confirmer};
use crate::validation::{validate_iso_target, validate_selection, PlannedDevice, SourceSizes};
use livecopy_error::{HalError, HalResult, ProvisionError, ProvisionResult};
use livecopy_hal::procfs::mountinfo::{mounted_from, parse_mountinfo};
use livecopy_hal::{MountOptions, StorageDevice, SystemHal};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowState {
    SelectingDevices,
    ConfirmingDestructiveAction,
    /// Working on the device with this index in the selection.
    Provisioning(usize),
    ConfiguringTarget,
    BuildingIso,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceOutcome {
    Succeeded,
    Failed(String),
    /// Skipped because an earlier device failed.
    NotStarted,
}

/// Per-device outcomes of one batch, in selection order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunResult {
    pub outcomes: Vec<(PathBuf, DeviceOutcome)>,
}

impl RunResult {
    pub fn is_success(&self) -> bool {
        !self.outcomes.is_empty()
            && self
                .outcomes
                .iter()
                .all(|(_, outcome)| *outcome == DeviceOutcome::Succeeded)
    }

    /// The device that stopped the batch, with the reason.
    pub fn failure(&self) -> Option<(&Path, &str)> {
        self.outcomes.iter().find_map(|(device, outcome)| match outcome {
            DeviceOutcome::Failed(reason) => Some((device.as_path(), reason.as_str())),
            _ => None,
        })
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| *o == DeviceOutcome::Succeeded)
            .count()
    }
}

/// Used bytes of the persistence store labelled `label`, mounting it
/// read-only below `scratch_dir` when the running system has not.
fn persistence_used_bytes<H: SystemHal + ?Sized>(
    hal: &H,
    label: &str,
    scratch_dir: &Path,
) -> HalResult<u64> {
    let Some(device) = hal.device_by_label(label)? else {
        log::warn!("No partition labelled {label}");
        return Ok(0);
    };
    let mounts = parse_mountinfo(&hal.proc_mountinfo()?);
    if let Some(mount_point) = mounted_from(&mounts, |src| src == device).last() {
        return hal.used_bytes(mount_point);
    }

    fs::create_dir_all(scratch_dir)?;
    let probe = tempfile::Builder::new()
        .prefix("probe-")
        .tempdir_in(scratch_dir)?;
    let guard = mount_guarded(
        hal,
        &device,
        probe.path(),
        Some("ext4"),
        MountOptions::read_only(),
        false,
    )?;
    let used = hal.used_bytes(probe.path());
    guard.unmount()?;
    used
}

/// Measure what a run has to fit onto each target.
///
/// The system size is the image tree plus 10 % unless configured.
pub fn measure_sources<H: SystemHal + ?Sized>(
    hal: &H,
    options: &ProvisioningOptions,
) -> HalResult<SourceSizes> {
    let sources = &options.sources;
    let system_bytes = match options.system_size_bytes {
        Some(bytes) => bytes,
        None => {
            let tree = hal.tree_size_bytes(&sources.image_dir)?;
            tree.saturating_add(tree / 10)
        }
    };

    let exchange_used_bytes = match (&sources.exchange_dir, options.copy_exchange) {
        (Some(dir), true) => hal.used_bytes(dir)?,
        _ => 0,
    };

    let persistence_used_bytes = if options.copy_persistence {
        persistence_used_bytes(hal, &sources.persistence_label, &options.scratch_dir)?
    } else {
        0
    };

    let sizes = SourceSizes {
        system_bytes,
        exchange_used_bytes,
        persistence_used_bytes,
    };
    log::debug!("Source sizes: {:?}", sizes);
    Ok(sizes)
}

/// Drives one run from device selection to the last device (or the ISO).
pub struct Workflow<'a, H: SystemHal + ?Sized> {
    hal: &'a H,
    options: ProvisioningOptions,
    confirmer: &'a dyn Confirmer,
    progress: ProgressReporter,
    state: WorkflowState,
}

impl<'a, H: SystemHal + ?Sized> Workflow<'a, H> {
    pub fn new(
        hal: &'a H,
        mut options: ProvisioningOptions,
        confirmer: &'a dyn Confirmer,
        progress: ProgressReporter,
    ) -> Self {
        match hal.os_release() {
            Ok(content) => options.resolve_flavor(&content),
            Err(err) => log::warn!("Cannot read os-release ({}), assuming Debian", err),
        }
        Self {
            hal,
            options,
            confirmer,
            progress,
            state: WorkflowState::SelectingDevices,
        }
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    pub fn options(&self) -> &ProvisioningOptions {
        &self.options
    }

    /// Validate `devices` against the measured sources and plan their
    /// layouts.
    pub fn select(&mut self, devices: &[StorageDevice]) -> ProvisionResult<Vec<PlannedDevice>> {
        self.state = WorkflowState::SelectingDevices;
        let sizes = measure_sources(self.hal, &self.options)?;
        let planned = validate_selection(devices, &self.options, &sizes)?;
        for p in &planned {
            log::info!(
                "{} ({}): {}",
                p.device.path.display(),
                p.device.kind.label(),
                p.layout.class
            );
        }
        self.state = WorkflowState::ConfirmingDestructiveAction;
        Ok(planned)
    }

    /// Ask before erasing. Declining goes back to device selection.
    pub fn confirm(&mut self, planned: &[PlannedDevice]) -> ProvisionResult<ArmToken> {
        let devices: Vec<StorageDevice> = planned.iter().map(|p| p.device.clone()).collect();
        let request = ConfirmRequest::for_selection(&devices);
        let answer = self.confirmer.confirm(&request);
        match ArmToken::try_new(&request, &answer) {
            Ok(token) => Ok(token),
            Err(err) => {
                log::info!("Destructive action declined");
                self.state = WorkflowState::SelectingDevices;
                Err(err)
            }
        }
    }

    fn provision_device(
        &self,
        planned: &PlannedDevice,
        work_dir: &Path,
        index: usize,
        progress: &ProgressReporter,
        token: &ArmToken,
    ) -> ProvisionResult<()> {
        let device = &planned.device;
        let mounts = MountPoints::new(&work_dir.join(format!("device{index}")));
        mounts.ensure_dirs().map_err(|e| {
            ProvisionError::Hal(HalError::Other(format!("{e:#}")))
        })?;

        let paths = provisioner::provision(
            self.hal,
            device,
            &planned.layout,
            &self.options,
            self.confirmer,
            progress,
            token,
        )?;
        orchestrator::populate(
            self.hal,
            device,
            &planned.layout,
            &paths,
            &mounts,
            &self.options,
            progress,
        )?;
        bootloader::install(
            self.hal,
            device,
            &paths.system,
            &mounts.system,
            &self.options,
            progress,
            token,
        )?;
        Ok(())
    }

    fn work_dir(&self) -> HalResult<TempDir> {
        fs::create_dir_all(&self.options.scratch_dir)?;
        Ok(tempfile::Builder::new()
            .prefix("livecopy-")
            .tempdir_in(&self.options.scratch_dir)?)
    }

    /// Provision every planned device in order, stopping at the first
    /// failure.
    pub fn provision_all(&mut self, planned: &[PlannedDevice], token: &ArmToken) -> RunResult {
        let count = planned.len();
        let mut result = RunResult {
            outcomes: planned
                .iter()
                .map(|p| (p.device.path.clone(), DeviceOutcome::NotStarted))
                .collect(),
        };

        let work_dir = match self.work_dir() {
            Ok(dir) => Some(dir),
            Err(err) => {
                let reason = format!("Cannot create work directory: {err}");
                if let Some(first) = result.outcomes.first_mut() {
                    first.1 = DeviceOutcome::Failed(reason.clone());
                }
                log::error!("{}", reason);
                self.state = WorkflowState::Failed;
                self.progress.send(ProgressUpdate::Error(reason));
                None
            }
        };
        let Some(work_dir) = work_dir else {
            return result;
        };

        for (index, item) in planned.iter().enumerate() {
            self.state = WorkflowState::Provisioning(index);
            let device = &item.device;
            let progress = self.progress.for_device(index, count);
            progress.send(ProgressUpdate::DeviceStarted {
                device: device.path.clone(),
                index,
                count,
            });
            log::info!(
                "💾 Provisioning {} ({} of {})",
                device.path.display(),
                index + 1,
                count
            );

            match self.provision_device(item, work_dir.path(), index, &progress, token) {
                Ok(()) => {
                    log::info!("✅ {} done", device.path.display());
                    result.outcomes[index].1 = DeviceOutcome::Succeeded;
                    progress.send(ProgressUpdate::DeviceFinished {
                        device: device.path.clone(),
                        succeeded: true,
                    });
                }
                Err(err) => {
                    let reason = err.to_string();
                    log::error!("{} failed: {}", device.path.display(), reason);
                    result.outcomes[index].1 = DeviceOutcome::Failed(reason.clone());
                    progress.send(ProgressUpdate::DeviceFinished {
                        device: device.path.clone(),
                        succeeded: false,
                    });
                    self.state = WorkflowState::Failed;
                    self.progress.send(ProgressUpdate::Error(reason));
                    return result;
                }
            }
        }

        self.state = WorkflowState::Done;
        self.progress.send(ProgressUpdate::Overall(100));
        self.progress.send(ProgressUpdate::Complete);
        log::info!("🎉 All {} device(s) provisioned", count);
        result
    }

    /// Select, confirm and provision in one go.
    pub fn run(&mut self, devices: &[StorageDevice]) -> ProvisionResult<RunResult> {
        let planned = self.select(devices)?;
        let token = self.confirm(&planned)?;
        Ok(self.provision_all(&planned, &token))
    }

    /// The ISO branch: validate the target, then build the image.
    pub fn build_iso(&mut self, target: &IsoTarget) -> ProvisionResult<()> {
        self.state = WorkflowState::ConfiguringTarget;
        validate_iso_target(&target.output, &target.label)?;

        self.state = WorkflowState::BuildingIso;
        let progress = self.progress.for_device(0, 1);
        progress.send(ProgressUpdate::DeviceStarted {
            device: target.output.clone(),
            index: 0,
            count: 1,
        });
        match iso::build_iso(self.hal, target, &self.options, &progress) {
            Ok(()) => {
                self.state = WorkflowState::Done;
                self.progress.send(ProgressUpdate::Overall(100));
                self.progress.send(ProgressUpdate::Complete);
                Ok(())
            }
            Err(err) => {
                log::error!("ISO build failed: {}", err);
                self.state = WorkflowState::Failed;
                self.progress.send(ProgressUpdate::Error(err.to_string()));
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::MIB;
    use crate::safety::ScriptedConfirmer;
    use livecopy_hal::{DeviceKind, FakeHal};

    const GIB: u64 = 1024 * MIB;

    fn usb(path: &str) -> StorageDevice {
        StorageDevice::new(
            path,
            4 * GIB,
            DeviceKind::UsbDrive {
                vendor: "Intenso".to_string(),
                model: "Speed Line".to_string(),
                revision: "1.00".to_string(),
            },
        )
    }

    #[test]
    fn run_result_success_and_failure() {
        let ok = RunResult {
            outcomes: vec![(PathBuf::from("/dev/sdb"), DeviceOutcome::Succeeded)],
        };
        assert!(ok.is_success());
        assert!(ok.failure().is_none());
        assert!(!RunResult::default().is_success());

        let failed = RunResult {
            outcomes: vec![
                (PathBuf::from("/dev/sdb"), DeviceOutcome::Succeeded),
                (PathBuf::from("/dev/sdc"), DeviceOutcome::Failed("format".to_string())),
                (PathBuf::from("/dev/sdd"), DeviceOutcome::NotStarted),
            ],
        };
        assert!(!failed.is_success());
        assert_eq!(failed.failure(), Some((Path::new("/dev/sdc"), "format")));
        assert_eq!(failed.succeeded(), 1);
    }

    #[test]
    fn system_size_gets_ten_percent_headroom() {
        let hal = FakeHal::new().with_tree_size("/lib/live/mount/medium", 1000 * MIB);
        let sizes = measure_sources(&hal, &ProvisioningOptions::default()).unwrap();
        assert_eq!(sizes.system_bytes, 1100 * MIB);
        assert_eq!(sizes.exchange_used_bytes, 0);

        let options = ProvisioningOptions {
            system_size_bytes: Some(GIB),
            ..Default::default()
        };
        assert_eq!(measure_sources(&hal, &options).unwrap().system_bytes, GIB);
    }

    #[test]
    fn persistence_usage_read_from_existing_mount() {
        let hal = FakeHal::new()
            .with_label("live-rw", "/dev/sda3")
            .with_mount("/dev/sda3", "/lib/live/mount/persistence/sda3", "ext4")
            .with_used_bytes("/lib/live/mount/persistence/sda3", 300 * MIB);
        let options = ProvisioningOptions {
            system_size_bytes: Some(GIB),
            copy_persistence: true,
            ..Default::default()
        };
        let sizes = measure_sources(&hal, &options).unwrap();
        assert_eq!(sizes.persistence_used_bytes, 300 * MIB);
    }

    #[test]
    fn flavor_is_detected_from_os_release() {
        let hal = FakeHal::new().with_os_release("ID=lernstick\nID_LIKE=debian\n");
        let confirmer = ScriptedConfirmer::approving();
        let workflow = Workflow::new(
            &hal,
            ProvisioningOptions::default(),
            &confirmer,
            ProgressReporter::silent(),
        );
        assert_eq!(workflow.options().system_label(), "LERNSTICK");
        assert_eq!(workflow.options().exchange_label(), "AUSTAUSCH");
        assert_eq!(workflow.state(), WorkflowState::SelectingDevices);
    }

    #[test]
    fn select_moves_to_confirmation() {
        let hal = FakeHal::new();
        let confirmer = ScriptedConfirmer::approving();
        let options = ProvisioningOptions {
            system_size_bytes: Some(GIB),
            ..Default::default()
        };
        let mut workflow = Workflow::new(&hal, options, &confirmer, ProgressReporter::silent());
        let planned = workflow.select(&[usb("/dev/sdb")]).unwrap();
        assert_eq!(planned.len(), 1);
        assert_eq!(workflow.state(), WorkflowState::ConfirmingDestructiveAction);
    }
}
