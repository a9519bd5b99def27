//! Fake HAL implementation for testing.
//!
//! This implementation records all operations without executing them,
//! allowing for CI-safe testing without root privileges or real hardware.
//! Copies are the exception: when the source trees exist they are copied for
//! real, so tests can inspect what landed in a (temporary) mount point.

use super::{
    BootRecordOps, BootRecordOptions, CommandOutput, CopyJob, CopyOps, CopyOptions, CopyProgress,
    FormatOps, FormatOptions, HostInfoOps, LoopOps, MountOps, MountOptions, PartitionOps,
    PartitionOptions, ProbeOps, ProcessOps, RsyncOps, RsyncOptions, SwapOps, SystemOps,
};
use crate::{HalError, HalResult, StorageDevice};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Operation records for testing and verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Mount {
        device: PathBuf,
        target: PathBuf,
        fstype: Option<String>,
        options: Option<String>,
        read_only: bool,
    },
    Unmount {
        target: PathBuf,
    },
    FormatExt4 {
        device: PathBuf,
        args: Vec<String>,
    },
    FormatVfat {
        device: PathBuf,
        label: String,
    },
    TuneExt {
        device: PathBuf,
        args: Vec<String>,
    },
    PartitionTable {
        disk: PathBuf,
        script: String,
    },
    BootRecord {
        template: PathBuf,
        disk: PathBuf,
    },
    SwapOff {
        swap: PathBuf,
    },
    Sync,
    UdevSettle,
    LosetupAttach {
        image: PathBuf,
        read_only: bool,
        loop_device: String,
    },
    LosetupDetach {
        loop_device: String,
    },
    CopyTree {
        src: PathBuf,
        dst: PathBuf,
    },
    Rsync {
        src: PathBuf,
        dst: PathBuf,
    },
    Command {
        program: String,
        args: Vec<String>,
        timeout_secs: u64,
    },
}

#[derive(Debug, Clone)]
struct FakeMount {
    source: PathBuf,
    target: PathBuf,
    fstype: String,
}

/// Shared state for FakeHal operations.
#[derive(Debug, Clone, Default)]
struct FakeHalState {
    /// All operations that were recorded
    operations: Vec<Operation>,
    /// Current mount table, oldest first
    mounts: Vec<FakeMount>,
    devices: Vec<StorageDevice>,
    labels: HashMap<String, PathBuf>,
    used_bytes: HashMap<PathBuf, u64>,
    tree_sizes: HashMap<PathBuf, u64>,
    meminfo: String,
    swaps: String,
    os_release: String,
    /// Remaining partition-table writes that fail with EBUSY-style output
    partition_failures: u32,
    failing_formats: HashSet<PathBuf>,
    failing_mounts: HashSet<PathBuf>,
    failing_programs: HashSet<String>,
    stream_lines: HashMap<String, Vec<String>>,
    rsync_lines: Vec<String>,
    next_loop: u32,
}

/// Fake HAL implementation that records operations without executing them.
///
/// Cloning shares the underlying state, so a test can hand one clone to the
/// workflow and inspect the other afterwards.
#[derive(Debug, Clone, Default)]
pub struct FakeHal {
    state: Arc<Mutex<FakeHalState>>,
}

impl FakeHal {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeHalState::default())),
        }
    }

    /// Get all recorded operations.
    pub fn operations(&self) -> Vec<Operation> {
        self.state.lock().unwrap().operations.clone()
    }

    /// Get the number of operations recorded.
    pub fn operation_count(&self) -> usize {
        self.state.lock().unwrap().operations.len()
    }

    /// Check if a specific operation was recorded.
    pub fn has_operation(&self, check: impl Fn(&Operation) -> bool) -> bool {
        self.state.lock().unwrap().operations.iter().any(check)
    }

    /// Clear all recorded operations.
    pub fn clear(&self) {
        self.state.lock().unwrap().operations.clear();
    }

    pub fn with_device(self, device: StorageDevice) -> Self {
        self.state.lock().unwrap().devices.push(device);
        self
    }

    /// Pretend `source` is already mounted at `target`.
    pub fn with_mount(self, source: impl Into<PathBuf>, target: impl Into<PathBuf>, fstype: &str) -> Self {
        self.state.lock().unwrap().mounts.push(FakeMount {
            source: source.into(),
            target: target.into(),
            fstype: fstype.to_string(),
        });
        self
    }

    pub fn with_label(self, label: &str, device: impl Into<PathBuf>) -> Self {
        self.state
            .lock()
            .unwrap()
            .labels
            .insert(label.to_string(), device.into());
        self
    }

    pub fn with_used_bytes(self, mount_point: impl Into<PathBuf>, bytes: u64) -> Self {
        self.state
            .lock()
            .unwrap()
            .used_bytes
            .insert(mount_point.into(), bytes);
        self
    }

    pub fn with_tree_size(self, dir: impl Into<PathBuf>, bytes: u64) -> Self {
        self.state
            .lock()
            .unwrap()
            .tree_sizes
            .insert(dir.into(), bytes);
        self
    }

    pub fn with_meminfo(self, content: &str) -> Self {
        self.state.lock().unwrap().meminfo = content.to_string();
        self
    }

    pub fn with_swaps(self, content: &str) -> Self {
        self.state.lock().unwrap().swaps = content.to_string();
        self
    }

    pub fn with_os_release(self, content: &str) -> Self {
        self.state.lock().unwrap().os_release = content.to_string();
        self
    }

    /// Make the next `times` partition-table writes fail.
    pub fn fail_partition_table(self, times: u32) -> Self {
        self.state.lock().unwrap().partition_failures = times;
        self
    }

    pub fn fail_format_of(self, device: impl Into<PathBuf>) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing_formats
            .insert(device.into());
        self
    }

    /// Fail every mount of `device`.
    pub fn fail_mount_of(self, device: impl Into<PathBuf>) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing_mounts
            .insert(device.into());
        self
    }

    /// Make every invocation of `program` exit with status 1.
    pub fn fail_command(self, program: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing_programs
            .insert(program.to_string());
        self
    }

    /// Lines fed to the `command_stream` callback when `program` runs.
    pub fn with_stream_lines(self, program: &str, lines: &[&str]) -> Self {
        self.state.lock().unwrap().stream_lines.insert(
            program.to_string(),
            lines.iter().map(|l| l.to_string()).collect(),
        );
        self
    }

    pub fn with_rsync_lines(self, lines: &[&str]) -> Self {
        self.state.lock().unwrap().rsync_lines = lines.iter().map(|l| l.to_string()).collect();
        self
    }

    /// Commands recorded for `program`, as argument vectors.
    pub fn commands(&self, program: &str) -> Vec<Vec<String>> {
        self.operations()
            .into_iter()
            .filter_map(|op| match op {
                Operation::Command { program: p, args, .. } if p == program => Some(args),
                _ => None,
            })
            .collect()
    }

    fn record_operation(&self, op: Operation) {
        self.state.lock().unwrap().operations.push(op);
    }

    fn command_fails(&self, program: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .failing_programs
            .contains(program)
    }

    fn run_command(&self, program: &str, args: &[&str], timeout: Duration) -> CommandOutput {
        self.record_operation(Operation::Command {
            program: program.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            timeout_secs: timeout.as_secs(),
        });
        if self.command_fails(program) {
            log::info!("FAKE HAL: {} fails (scripted)", program);
            return CommandOutput {
                code: Some(1),
                output: format!("{}: scripted failure", program),
            };
        }
        CommandOutput {
            code: Some(0),
            output: String::new(),
        }
    }
}

impl HostInfoOps for FakeHal {
    fn proc_meminfo(&self) -> HalResult<String> {
        Ok(self.state.lock().unwrap().meminfo.clone())
    }

    fn proc_swaps(&self) -> HalResult<String> {
        Ok(self.state.lock().unwrap().swaps.clone())
    }

    /// The mount table rendered in `/proc/self/mountinfo` layout.
    fn proc_mountinfo(&self) -> HalResult<String> {
        let state = self.state.lock().unwrap();
        let lines: Vec<String> = state
            .mounts
            .iter()
            .enumerate()
            .map(|(idx, m)| {
                format!(
                    "{} 1 0:{} / {} rw,relatime - {} {} rw",
                    idx + 20,
                    idx + 20,
                    escape_mount_path(&m.target),
                    m.fstype,
                    escape_mount_path(&m.source)
                )
            })
            .collect();
        Ok(lines.join("\n"))
    }

    fn os_release(&self) -> HalResult<String> {
        Ok(self.state.lock().unwrap().os_release.clone())
    }
}

fn escape_mount_path(path: &Path) -> String {
    path.display().to_string().replace(' ', "\\040")
}

impl ProcessOps for FakeHal {
    fn command_output(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> HalResult<CommandOutput> {
        log::info!("FAKE HAL: exec {} {}", program, args.join(" "));
        Ok(self.run_command(program, args, timeout))
    }

    fn command_stream(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
        on_line: &mut dyn FnMut(&str),
    ) -> HalResult<CommandOutput> {
        log::info!("FAKE HAL: exec (streaming) {} {}", program, args.join(" "));
        let lines = self
            .state
            .lock()
            .unwrap()
            .stream_lines
            .get(program)
            .cloned()
            .unwrap_or_default();
        for line in &lines {
            on_line(line);
        }
        Ok(self.run_command(program, args, timeout))
    }
}

impl MountOps for FakeHal {
    fn mount_device(
        &self,
        device: &Path,
        target: &Path,
        fstype: Option<&str>,
        options: MountOptions,
        dry_run: bool,
    ) -> HalResult<()> {
        if dry_run {
            log::info!(
                "FAKE HAL DRY RUN: mount {} -> {}",
                device.display(),
                target.display()
            );
            return Ok(());
        }

        log::info!(
            "FAKE HAL: mount {} -> {} (type: {:?})",
            device.display(),
            target.display(),
            fstype
        );

        self.record_operation(Operation::Mount {
            device: device.to_path_buf(),
            target: target.to_path_buf(),
            fstype: fstype.map(String::from),
            options: options.options.clone(),
            read_only: options.read_only,
        });

        let mut state = self.state.lock().unwrap();
        if state.failing_mounts.contains(device) {
            return Err(HalError::Nix(nix::errno::Errno::EINVAL));
        }
        state.mounts.push(FakeMount {
            source: device.to_path_buf(),
            target: target.to_path_buf(),
            fstype: fstype.unwrap_or("auto").to_string(),
        });

        Ok(())
    }

    fn unmount(&self, target: &Path, dry_run: bool) -> HalResult<()> {
        if dry_run {
            log::info!("FAKE HAL DRY RUN: unmount {}", target.display());
            return Ok(());
        }

        log::info!("FAKE HAL: unmount {}", target.display());

        self.record_operation(Operation::Unmount {
            target: target.to_path_buf(),
        });
        let mut state = self.state.lock().unwrap();
        if let Some(pos) = state.mounts.iter().rposition(|m| m.target == target) {
            state.mounts.remove(pos);
        }

        Ok(())
    }

    /// Recorded as a single unmount of `target`; drops everything mounted below it.
    fn unmount_recursive(&self, target: &Path, dry_run: bool) -> HalResult<()> {
        if dry_run {
            log::info!("FAKE HAL DRY RUN: unmount -R {}", target.display());
            return Ok(());
        }

        log::info!("FAKE HAL: unmount -R {}", target.display());

        self.record_operation(Operation::Unmount {
            target: target.to_path_buf(),
        });
        self.state
            .lock()
            .unwrap()
            .mounts
            .retain(|m| !m.target.starts_with(target));

        Ok(())
    }

    fn is_mounted(&self, path: &Path) -> HalResult<bool> {
        let is_mounted = self
            .state
            .lock()
            .unwrap()
            .mounts
            .iter()
            .any(|m| m.target == path);
        log::info!("FAKE HAL: is_mounted({}) = {}", path.display(), is_mounted);
        Ok(is_mounted)
    }
}

impl FakeHal {
    fn check_format(&self, device: &Path, program: &str) -> HalResult<()> {
        if self.state.lock().unwrap().failing_formats.contains(device) {
            return Err(HalError::CommandFailed {
                program: program.to_string(),
                code: Some(1),
                output: format!("{}: cannot open {}", program, device.display()),
            });
        }
        Ok(())
    }
}

impl FormatOps for FakeHal {
    fn format_ext4(&self, device: &Path, opts: &FormatOptions) -> HalResult<()> {
        if !opts.dry_run && !opts.confirmed {
            return Err(HalError::SafetyLock);
        }

        if opts.dry_run {
            log::info!("FAKE HAL DRY RUN: mkfs.ext4 {}", device.display());
            return Ok(());
        }

        log::info!("FAKE HAL: mkfs.ext4 {}", device.display());

        self.record_operation(Operation::FormatExt4 {
            device: device.to_path_buf(),
            args: opts.extra_args.clone(),
        });

        self.check_format(device, "mkfs.ext4")
    }

    fn format_vfat(&self, device: &Path, label: &str, opts: &FormatOptions) -> HalResult<()> {
        if !opts.dry_run && !opts.confirmed {
            return Err(HalError::SafetyLock);
        }

        if opts.dry_run {
            log::info!(
                "FAKE HAL DRY RUN: mkfs.vfat {} ({})",
                device.display(),
                label
            );
            return Ok(());
        }

        log::info!("FAKE HAL: mkfs.vfat {} ({})", device.display(), label);

        self.record_operation(Operation::FormatVfat {
            device: device.to_path_buf(),
            label: label.to_string(),
        });

        self.check_format(device, "mkfs.vfat")
    }

    fn tune_ext(&self, device: &Path, opts: &FormatOptions) -> HalResult<()> {
        if !opts.dry_run && !opts.confirmed {
            return Err(HalError::SafetyLock);
        }

        if opts.dry_run {
            log::info!("FAKE HAL DRY RUN: tune2fs {}", device.display());
            return Ok(());
        }

        self.record_operation(Operation::TuneExt {
            device: device.to_path_buf(),
            args: opts.extra_args.clone(),
        });

        Ok(())
    }
}

impl BootRecordOps for FakeHal {
    fn write_boot_record(
        &self,
        template: &Path,
        target_disk: &Path,
        opts: &BootRecordOptions,
    ) -> HalResult<()> {
        if !opts.dry_run && !opts.confirmed {
            return Err(HalError::SafetyLock);
        }

        if opts.dry_run {
            log::info!(
                "FAKE HAL DRY RUN: boot record {} -> {}",
                template.display(),
                target_disk.display()
            );
            return Ok(());
        }

        self.record_operation(Operation::BootRecord {
            template: template.to_path_buf(),
            disk: target_disk.to_path_buf(),
        });

        Ok(())
    }
}

impl PartitionOps for FakeHal {
    fn write_partition_table(
        &self,
        disk: &Path,
        script: &str,
        opts: &PartitionOptions,
    ) -> HalResult<String> {
        if !opts.dry_run && !opts.confirmed {
            return Err(HalError::SafetyLock);
        }

        if opts.dry_run {
            log::info!("FAKE HAL DRY RUN: sfdisk {}", disk.display());
            return Ok(String::new());
        }

        self.record_operation(Operation::PartitionTable {
            disk: disk.to_path_buf(),
            script: script.to_string(),
        });

        let mut state = self.state.lock().unwrap();
        if state.partition_failures > 0 {
            state.partition_failures -= 1;
            return Err(HalError::CommandFailed {
                program: "sfdisk".to_string(),
                code: Some(1),
                output: format!(
                    "sfdisk: {}: Device or resource busy",
                    disk.display()
                ),
            });
        }

        Ok(String::new())
    }
}

impl SystemOps for FakeHal {
    fn sync(&self) -> HalResult<()> {
        self.record_operation(Operation::Sync);
        Ok(())
    }

    fn udev_settle(&self) -> HalResult<()> {
        self.record_operation(Operation::UdevSettle);
        Ok(())
    }
}

impl ProbeOps for FakeHal {
    fn list_devices(&self, include_non_removable: bool) -> HalResult<Vec<StorageDevice>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .devices
            .iter()
            .filter(|d| include_non_removable || d.is_removable())
            .cloned()
            .collect())
    }

    fn mounted_partitions(&self, device: &StorageDevice) -> HalResult<Vec<PathBuf>> {
        let entries = crate::procfs::mountinfo::parse_mountinfo(&self.proc_mountinfo()?);
        Ok(crate::procfs::mountinfo::mounted_from(&entries, |src| {
            device.owns(src)
        }))
    }

    fn device_by_label(&self, label: &str) -> HalResult<Option<PathBuf>> {
        Ok(self.state.lock().unwrap().labels.get(label).cloned())
    }

    fn used_bytes(&self, mount_point: &Path) -> HalResult<u64> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .used_bytes
            .get(mount_point)
            .copied()
            .unwrap_or(0))
    }

    fn tree_size_bytes(&self, dir: &Path) -> HalResult<u64> {
        if let Some(size) = self.state.lock().unwrap().tree_sizes.get(dir) {
            return Ok(*size);
        }
        if !dir.exists() {
            return Ok(0);
        }
        let mut total = 0u64;
        for entry in walkdir::WalkDir::new(dir).follow_links(false) {
            let entry = entry.map_err(|e| HalError::Other(e.to_string()))?;
            if entry.file_type().is_file() {
                total += entry.metadata().map(|m| m.len()).unwrap_or(0);
            }
        }
        Ok(total)
    }
}

impl SwapOps for FakeHal {
    fn swap_off(&self, swap: &Path, dry_run: bool) -> HalResult<()> {
        if dry_run {
            log::info!("FAKE HAL DRY RUN: swapoff {}", swap.display());
            return Ok(());
        }
        self.record_operation(Operation::SwapOff {
            swap: swap.to_path_buf(),
        });
        if self.command_fails("swapoff") {
            return Err(HalError::CommandFailed {
                program: "swapoff".to_string(),
                code: Some(255),
                output: "swapoff: Cannot allocate memory".to_string(),
            });
        }
        Ok(())
    }
}

impl LoopOps for FakeHal {
    fn losetup_attach(&self, image: &Path, read_only: bool) -> HalResult<String> {
        let loop_device = {
            let mut state = self.state.lock().unwrap();
            let dev = format!("/dev/loop{}", state.next_loop);
            state.next_loop += 1;
            dev
        };
        self.record_operation(Operation::LosetupAttach {
            image: image.to_path_buf(),
            read_only,
            loop_device: loop_device.clone(),
        });
        Ok(loop_device)
    }

    fn losetup_detach(&self, loop_device: &str) -> HalResult<()> {
        self.record_operation(Operation::LosetupDetach {
            loop_device: loop_device.to_string(),
        });
        Ok(())
    }
}

impl CopyOps for FakeHal {
    fn copy_jobs(
        &self,
        jobs: &[CopyJob],
        opts: &CopyOptions,
        on_progress: &mut dyn FnMut(CopyProgress) -> bool,
    ) -> HalResult<()> {
        for job in jobs {
            self.record_operation(Operation::CopyTree {
                src: job.source.clone(),
                dst: job.destination.clone(),
            });
        }

        if jobs.iter().all(|job| job.source.is_dir()) {
            return super::copy_ops::copy_tree_jobs(jobs, opts, on_progress);
        }

        // Sources that only exist as canned sizes: report start and finish.
        let mut total = 0u64;
        for job in jobs {
            total += self.tree_size_bytes(&job.source)?;
        }
        let mut progress = CopyProgress {
            bytes_copied: 0,
            bytes_total: total,
            files_copied: 0,
            files_total: jobs.len() as u64,
        };
        if !on_progress(progress.clone()) {
            return Err(HalError::Other("copy cancelled".to_string()));
        }
        progress.bytes_copied = total;
        progress.files_copied = jobs.len() as u64;
        if !on_progress(progress) {
            return Err(HalError::Other("copy cancelled".to_string()));
        }
        Ok(())
    }
}

impl RsyncOps for FakeHal {
    fn rsync_stream_stdout(
        &self,
        src: &Path,
        dst: &Path,
        _opts: &RsyncOptions,
        on_stdout_line: &mut dyn FnMut(&str) -> bool,
    ) -> HalResult<()> {
        self.record_operation(Operation::Rsync {
            src: src.to_path_buf(),
            dst: dst.to_path_buf(),
        });
        let lines = self.state.lock().unwrap().rsync_lines.clone();
        for line in &lines {
            if !on_stdout_line(line) {
                return Err(HalError::Other("rsync cancelled".to_string()));
            }
        }
        if self.command_fails("rsync") {
            return Err(HalError::CommandFailed {
                program: "rsync".to_string(),
                code: Some(23),
                output: "rsync error: some files could not be transferred".to_string(),
            });
        }
        Ok(())
    }
}
