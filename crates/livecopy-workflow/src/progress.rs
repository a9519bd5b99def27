//! Progress tracking for provisioning and ISO runs.

use crate::telemetry::ProgressEvent;
use std::path::PathBuf;
use std::sync::mpsc::Sender;
use std::time::Instant;

/// Provisioning and ISO phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    SwapOff,
    Unmount,
    Partition,
    Format,
    Copy,
    BootConfig,
    Persistence,
    Bootloader,
    // ISO branch
    MountSources,
    CopyMedium,
    Compress,
    Manifest,
    MasterIso,
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::SwapOff => "Deactivating swap",
            Phase::Unmount => "Unmounting partitions",
            Phase::Partition => "Partitioning device",
            Phase::Format => "Formatting partitions",
            Phase::Copy => "Copying system files",
            Phase::BootConfig => "Adjusting boot configuration",
            Phase::Persistence => "Copying persistence",
            Phase::Bootloader => "Installing boot loader",
            Phase::MountSources => "Mounting system image",
            Phase::CopyMedium => "Copying boot medium",
            Phase::Compress => "Compressing file system",
            Phase::Manifest => "Writing checksums",
            Phase::MasterIso => "Writing ISO image",
        }
    }

    /// Share of the per-device (or per-image) percentage this phase covers.
    pub fn span(&self) -> (u8, u8) {
        match self {
            Phase::SwapOff => (0, 1),
            Phase::Unmount => (1, 2),
            Phase::Partition => (2, 5),
            Phase::Format => (5, 10),
            Phase::Copy => (10, 75),
            Phase::BootConfig => (75, 78),
            Phase::Persistence => (78, 95),
            Phase::Bootloader => (95, 100),
            Phase::MountSources => (0, 2),
            Phase::CopyMedium => (2, 10),
            Phase::Compress => (10, 80),
            Phase::Manifest => (80, 85),
            Phase::MasterIso => (85, 100),
        }
    }

    /// Map a 0-100 value within this phase onto the whole device run.
    pub fn scale(&self, phase_percent: u8) -> u8 {
        let (start, end) = self.span();
        let width = (end - start) as u32;
        start + ((width * phase_percent.min(100) as u32) / 100) as u8
    }
}

/// Overall batch percentage from the devices already finished and the
/// progress of the current one.
pub fn overall_percent(finished: usize, device_percent: u8, device_count: usize) -> u8 {
    if device_count == 0 {
        return 100;
    }
    let total = finished.min(device_count) * 100 + device_percent.min(100) as usize;
    (total / device_count).min(100) as u8
}

/// Progress update message
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressUpdate {
    /// Work on a device (or the ISO target) started
    DeviceStarted {
        device: PathBuf,
        index: usize,
        count: usize,
    },
    /// Started a new phase
    PhaseStarted(Phase),
    /// Completed a phase
    PhaseCompleted(Phase),
    /// Parsed tool progress within the current phase
    Telemetry(ProgressEvent),
    /// Whole-run percentage
    Overall(u8),
    /// Status message
    Status(String),
    DeviceFinished { device: PathBuf, succeeded: bool },
    /// Run completed successfully
    Complete,
    /// Run failed with error
    Error(String),
}

/// Sending half of the progress channel, positioned on one device of a batch.
///
/// A reporter without a channel drops every update.
#[derive(Debug, Clone, Default)]
pub struct ProgressReporter {
    tx: Option<Sender<ProgressUpdate>>,
    finished: usize,
    count: usize,
}

impl ProgressReporter {
    pub fn new(tx: Sender<ProgressUpdate>) -> Self {
        Self {
            tx: Some(tx),
            finished: 0,
            count: 1,
        }
    }

    pub fn silent() -> Self {
        Self::default()
    }

    /// Reporter for device `index` (0-based) of `count`.
    pub fn for_device(&self, index: usize, count: usize) -> Self {
        Self {
            tx: self.tx.clone(),
            finished: index,
            count,
        }
    }

    pub fn send(&self, update: ProgressUpdate) {
        if let Some(tx) = &self.tx {
            // A closed receiver only means nobody is watching.
            let _ = tx.send(update);
        }
    }

    pub fn phase_started(&self, phase: Phase) {
        log::info!("▶ {}", phase.name());
        self.send(ProgressUpdate::PhaseStarted(phase));
        self.send(ProgressUpdate::Overall(self.overall(phase.scale(0))));
    }

    pub fn phase_completed(&self, phase: Phase) {
        self.send(ProgressUpdate::PhaseCompleted(phase));
        self.send(ProgressUpdate::Overall(self.overall(phase.scale(100))));
    }

    pub fn telemetry(&self, phase: Phase, event: ProgressEvent) {
        let device_percent = phase.scale(event.percent);
        self.send(ProgressUpdate::Telemetry(event));
        self.send(ProgressUpdate::Overall(self.overall(device_percent)));
    }

    pub fn status(&self, message: impl Into<String>) {
        self.send(ProgressUpdate::Status(message.into()));
    }

    fn overall(&self, device_percent: u8) -> u8 {
        overall_percent(self.finished, device_percent, self.count.max(1))
    }
}

/// State of run progress, folded from [`ProgressUpdate`]s by the consumer.
#[derive(Debug, Clone)]
pub struct ProgressState {
    pub current_device: Option<PathBuf>,
    /// Current phase
    pub current_phase: Option<Phase>,
    /// Completed phases of the current device
    pub completed_phases: Vec<Phase>,
    /// Overall progress percentage (0-100)
    pub overall_percent: u8,
    /// Current phase progress percentage (0-100)
    pub phase_percent: u8,
    pub devices_done: Vec<(PathBuf, bool)>,
    /// Status message
    pub status: String,
    /// Start time
    pub start_time: Option<Instant>,
    pub is_complete: bool,
    /// Error message if failed
    pub error: Option<String>,
}

impl Default for ProgressState {
    fn default() -> Self {
        Self {
            current_device: None,
            current_phase: None,
            completed_phases: Vec::new(),
            overall_percent: 0,
            phase_percent: 0,
            devices_done: Vec::new(),
            status: "Starting...".to_string(),
            start_time: None,
            is_complete: false,
            error: None,
        }
    }
}

impl ProgressState {
    /// Apply a progress update
    pub fn apply_update(&mut self, update: ProgressUpdate) {
        match update {
            ProgressUpdate::DeviceStarted {
                device,
                index,
                count,
            } => {
                self.status = format!("Device {}/{}: {}", index + 1, count, device.display());
                self.current_device = Some(device);
                self.completed_phases.clear();
                if self.start_time.is_none() {
                    self.start_time = Some(Instant::now());
                }
            }
            ProgressUpdate::PhaseStarted(phase) => {
                self.current_phase = Some(phase);
                self.phase_percent = 0;
                self.status = format!("{}...", phase.name());
            }
            ProgressUpdate::PhaseCompleted(phase) => {
                if !self.completed_phases.contains(&phase) {
                    self.completed_phases.push(phase);
                }
                self.phase_percent = 100;
            }
            ProgressUpdate::Telemetry(event) => {
                self.phase_percent = event.percent;
                if let Some(status) = event.status {
                    self.status = status;
                }
            }
            ProgressUpdate::Overall(percent) => {
                // Never move the bar backwards.
                self.overall_percent = self.overall_percent.max(percent.min(100));
            }
            ProgressUpdate::Status(msg) => {
                self.status = msg;
            }
            ProgressUpdate::DeviceFinished { device, succeeded } => {
                self.devices_done.push((device, succeeded));
                self.current_phase = None;
            }
            ProgressUpdate::Complete => {
                self.is_complete = true;
                self.overall_percent = 100;
                self.status = "Done".to_string();
            }
            ProgressUpdate::Error(msg) => {
                self.is_complete = true;
                self.status = format!("Error: {}", msg);
                self.error = Some(msg);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::ProgressStream;
    use std::sync::mpsc;

    #[test]
    fn overall_percent_combines_finished_devices() {
        assert_eq!(overall_percent(0, 0, 2), 0);
        assert_eq!(overall_percent(0, 50, 2), 25);
        assert_eq!(overall_percent(1, 50, 2), 75);
        assert_eq!(overall_percent(2, 0, 2), 100);
        assert_eq!(overall_percent(0, 0, 0), 100);
    }

    #[test]
    fn phase_scale_stays_within_span() {
        assert_eq!(Phase::Copy.scale(0), 10);
        assert_eq!(Phase::Copy.scale(100), 75);
        assert_eq!(Phase::Bootloader.scale(100), 100);
        assert_eq!(Phase::Partition.scale(250), 5);
    }

    #[test]
    fn reporter_positions_telemetry_in_batch() {
        let (tx, rx) = mpsc::channel();
        let reporter = ProgressReporter::new(tx).for_device(1, 2);
        reporter.telemetry(Phase::Copy, ProgressEvent::new(ProgressStream::Copy, 100));
        drop(reporter);

        let updates: Vec<ProgressUpdate> = rx.iter().collect();
        assert_eq!(updates.len(), 2);
        // Device 2 of 2, copy finished: (100 + 75) / 2.
        assert_eq!(updates[1], ProgressUpdate::Overall(87));
    }

    #[test]
    fn state_folds_updates() {
        let mut state = ProgressState::default();
        state.apply_update(ProgressUpdate::PhaseStarted(Phase::Format));
        state.apply_update(ProgressUpdate::Overall(40));
        state.apply_update(ProgressUpdate::Overall(30));
        state.apply_update(ProgressUpdate::PhaseCompleted(Phase::Format));
        assert_eq!(state.overall_percent, 40);
        assert_eq!(state.completed_phases, vec![Phase::Format]);

        state.apply_update(ProgressUpdate::Error("sfdisk failed".to_string()));
        assert!(state.is_complete);
        assert_eq!(state.error.as_deref(), Some("sfdisk failed"));
    }

    #[test]
    fn silent_reporter_drops_updates() {
        ProgressReporter::silent().status("nobody listens");
    }
}
