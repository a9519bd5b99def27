//! Linux HAL implementation using real system calls.

use super::{
    BootRecordOps, BootRecordOptions, CommandOutput, CopyJob, CopyOps, CopyOptions, CopyProgress,
    FormatOps, FormatOptions, HostInfoOps, LoopOps, MountOps, MountOptions, PartitionOps,
    PartitionOptions, ProbeOps, ProcessOps, RsyncOps, RsyncOptions, SwapOps, SystemOps,
};
use crate::{HalError, HalResult, StorageDevice};
use std::collections::VecDeque;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::time::{Duration, Instant};
use wait_timeout::ChildExt;
use walkdir::WalkDir;

/// Real HAL implementation for Linux systems.
#[derive(Debug, Clone, Default)]
pub struct LinuxHal;

impl LinuxHal {
    pub fn new() -> Self {
        Self
    }
}

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const SYNC_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const FORMAT_TIMEOUT: Duration = Duration::from_secs(10 * 60);
const SFDISK_TIMEOUT: Duration = Duration::from_secs(2 * 60);
const SWAPOFF_TIMEOUT: Duration = Duration::from_secs(10 * 60);
const LOSETUP_TIMEOUT: Duration = Duration::from_secs(30);
const RSYNC_IDLE_TIMEOUT: Duration = Duration::from_secs(10 * 60);
const RSYNC_MAX_TIMEOUT: Duration = Duration::from_secs(12 * 60 * 60);
/// Lines of tool output kept for error reports.
const OUTPUT_TAIL_LINES: usize = 200;

fn map_command_err(program: &str, err: io::Error) -> HalError {
    if err.kind() == io::ErrorKind::NotFound {
        return HalError::CommandNotFound(program.to_string());
    }
    HalError::Io(err)
}

fn map_nix_err(err: nix::errno::Errno) -> HalError {
    use nix::errno::Errno;
    match err {
        Errno::EBUSY => HalError::DiskBusy,
        Errno::EACCES | Errno::EPERM => HalError::PermissionDenied,
        other => HalError::Nix(other),
    }
}

fn output_with_timeout(
    program: &str,
    cmd: &mut Command,
    stdin: Option<&str>,
    timeout: Duration,
) -> HalResult<CommandOutput> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped());
    let mut child = cmd.spawn().map_err(|e| map_command_err(program, e))?;

    if let (Some(script), Some(mut pipe)) = (stdin, child.stdin.take()) {
        // Dropping the pipe at the end of this block sends EOF.
        if let Err(err) = pipe.write_all(script.as_bytes()) {
            drop(pipe);
            let _ = child.kill();
            let _ = child.wait();
            return Err(HalError::Io(err));
        }
    }

    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();

    // Drain pipes concurrently to avoid deadlocks on large output.
    let stdout_handle = std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut out) = stdout.take() {
            let _ = out.read_to_end(&mut buf);
        }
        buf
    });
    let stderr_handle = std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut err) = stderr.take() {
            let _ = err.read_to_end(&mut buf);
        }
        buf
    });

    let status = match child.wait_timeout(timeout).map_err(HalError::Io)? {
        Some(status) => status,
        None => {
            let _ = child.kill();
            let _ = child.wait();
            let _ = stdout_handle.join();
            let _ = stderr_handle.join();
            return Err(HalError::CommandTimeout {
                program: program.to_string(),
                timeout_secs: timeout.as_secs(),
            });
        }
    };

    let mut combined = stdout_handle.join().unwrap_or_default();
    combined.extend(stderr_handle.join().unwrap_or_default());
    Ok(CommandOutput {
        code: status.code(),
        output: String::from_utf8_lossy(&combined).to_string(),
    })
}

fn run_checked(program: &str, cmd: &mut Command, timeout: Duration) -> HalResult<String> {
    output_with_timeout(program, cmd, None, timeout)?.into_result(program)
}

/// Read `reader` to the end, sending every `\n`- or `\r`-terminated line.
fn forward_lines(reader: impl Read, tx: mpsc::Sender<String>) {
    let mut reader = io::BufReader::new(reader);
    let mut chunk = [0u8; 4096];
    let mut line: Vec<u8> = Vec::new();
    loop {
        let n = match reader.read(&mut chunk) {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        for &b in &chunk[..n] {
            if b == b'\n' || b == b'\r' {
                if !line.is_empty() {
                    let text = String::from_utf8_lossy(&line).to_string();
                    line.clear();
                    if tx.send(text).is_err() {
                        return;
                    }
                }
            } else {
                line.push(b);
            }
        }
    }
    if !line.is_empty() {
        let _ = tx.send(String::from_utf8_lossy(&line).to_string());
    }
}

struct StreamLimits {
    max: Duration,
    idle: Option<Duration>,
}

/// Spawn `cmd` and feed its stdout and stderr lines to `on_line` while it runs.
///
/// Output is read on two helper threads and handed over an mpsc channel, so the
/// callback always runs on the calling thread. Returning `false` from the
/// callback kills the process.
fn stream_with_timeout(
    program: &str,
    cmd: &mut Command,
    limits: StreamLimits,
    on_line: &mut dyn FnMut(&str) -> bool,
) -> HalResult<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = cmd.spawn().map_err(|e| map_command_err(program, e))?;

    let (tx, rx) = mpsc::channel::<String>();
    if let Some(stdout) = child.stdout.take() {
        let tx = tx.clone();
        std::thread::spawn(move || forward_lines(stdout, tx));
    }
    if let Some(stderr) = child.stderr.take() {
        let tx = tx.clone();
        std::thread::spawn(move || forward_lines(stderr, tx));
    }
    drop(tx);

    let mut tail: VecDeque<String> = VecDeque::with_capacity(OUTPUT_TAIL_LINES);
    let start = Instant::now();
    let mut last_output = Instant::now();
    loop {
        let idle_expired = limits
            .idle
            .is_some_and(|idle| last_output.elapsed() > idle);
        if start.elapsed() > limits.max || idle_expired {
            let _ = child.kill();
            let _ = child.wait();
            let secs = if idle_expired {
                limits.idle.unwrap_or(limits.max).as_secs()
            } else {
                limits.max.as_secs()
            };
            return Err(HalError::CommandTimeout {
                program: program.to_string(),
                timeout_secs: secs,
            });
        }

        match rx.recv_timeout(Duration::from_millis(250)) {
            Ok(line) => {
                last_output = Instant::now();
                if !on_line(&line) {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(HalError::Other(format!("{} cancelled", program)));
                }
                if tail.len() == OUTPUT_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            // Both pipes closed: the process is done writing.
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    let remaining = limits.max.saturating_sub(start.elapsed());
    let status = match child.wait_timeout(remaining).map_err(HalError::Io)? {
        Some(status) => status,
        None => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(HalError::CommandTimeout {
                program: program.to_string(),
                timeout_secs: limits.max.as_secs(),
            });
        }
    };

    Ok(CommandOutput {
        code: status.code(),
        output: tail.into_iter().collect::<Vec<_>>().join("\n"),
    })
}

impl ProcessOps for LinuxHal {
    fn command_output(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> HalResult<CommandOutput> {
        log::debug!("exec: {} {}", program, args.join(" "));
        let mut cmd = Command::new(program);
        cmd.args(args);
        output_with_timeout(program, &mut cmd, None, timeout)
    }

    fn command_stream(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
        on_line: &mut dyn FnMut(&str),
    ) -> HalResult<CommandOutput> {
        log::debug!("exec (streaming): {} {}", program, args.join(" "));
        let mut cmd = Command::new(program);
        cmd.args(args);
        let limits = StreamLimits {
            max: timeout,
            idle: None,
        };
        stream_with_timeout(program, &mut cmd, limits, &mut |line| {
            on_line(line);
            true
        })
    }
}

impl MountOps for LinuxHal {
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
                "DRY RUN: mount {} -> {}",
                device.display(),
                target.display()
            );
            return Ok(());
        }

        let mut flags = nix::mount::MsFlags::empty();
        if options.read_only {
            flags |= nix::mount::MsFlags::MS_RDONLY;
        }
        let data = options.options.as_deref();

        log::info!(
            "mount {} -> {} ({:?}, {:?})",
            device.display(),
            target.display(),
            fstype,
            data
        );
        nix::mount::mount(Some(device), target, fstype, flags, data).map_err(map_nix_err)?;

        Ok(())
    }

    fn unmount(&self, target: &Path, dry_run: bool) -> HalResult<()> {
        if dry_run {
            log::info!("DRY RUN: unmount {}", target.display());
            return Ok(());
        }

        log::info!("unmount {}", target.display());
        nix::mount::umount2(target, nix::mount::MntFlags::empty()).map_err(map_nix_err)?;

        Ok(())
    }

    fn unmount_recursive(&self, target: &Path, dry_run: bool) -> HalResult<()> {
        if dry_run {
            log::info!("DRY RUN: unmount -R {}", target.display());
            return Ok(());
        }

        // Read current mount table and unmount deepest-first for anything under `target`.
        let content = self.proc_mountinfo()?;
        let entries = crate::procfs::mountinfo::parse_mountinfo(&content);

        let mut under: Vec<PathBuf> = entries
            .iter()
            .map(|e| e.mount_point.clone())
            .filter(|mp| mp.starts_with(target))
            .collect();

        // Unmount deepest paths first.
        under.sort_by_key(|p| std::cmp::Reverse(p.components().count()));

        for mp in under {
            log::info!("unmount {}", mp.display());
            nix::mount::umount2(&mp, nix::mount::MntFlags::empty()).map_err(map_nix_err)?;
        }

        Ok(())
    }

    fn is_mounted(&self, path: &Path) -> HalResult<bool> {
        let content = self.proc_mountinfo()?;
        let entries = crate::procfs::mountinfo::parse_mountinfo(&content);
        Ok(crate::procfs::mountinfo::is_mounted_from_info(
            path, &entries,
        ))
    }
}

impl FormatOps for LinuxHal {
    fn format_ext4(&self, device: &Path, opts: &FormatOptions) -> HalResult<()> {
        if opts.dry_run {
            log::info!("DRY RUN: mkfs.ext4 {:?} {}", opts.extra_args, device.display());
            return Ok(());
        }

        if !opts.confirmed {
            return Err(HalError::SafetyLock);
        }

        let mut args = opts.extra_args.clone();
        args.push(device.display().to_string());

        log::info!("mkfs.ext4 {}", args.join(" "));
        let mut cmd = Command::new("mkfs.ext4");
        cmd.args(&args);
        run_checked("mkfs.ext4", &mut cmd, FORMAT_TIMEOUT).map(|_| ())
    }

    fn format_vfat(&self, device: &Path, label: &str, opts: &FormatOptions) -> HalResult<()> {
        if opts.dry_run {
            log::info!("DRY RUN: mkfs.vfat {} ({})", device.display(), label);
            return Ok(());
        }

        if !opts.confirmed {
            return Err(HalError::SafetyLock);
        }

        let mut args: Vec<String> = vec!["-F".to_string(), "32".to_string()];
        args.push("-n".to_string());
        args.push(label.to_string());
        args.extend(opts.extra_args.iter().cloned());
        args.push(device.display().to_string());

        log::info!("mkfs.vfat {}", args.join(" "));
        let mut cmd = Command::new("mkfs.vfat");
        cmd.args(&args);
        run_checked("mkfs.vfat", &mut cmd, FORMAT_TIMEOUT).map(|_| ())
    }

    fn tune_ext(&self, device: &Path, opts: &FormatOptions) -> HalResult<()> {
        if opts.dry_run {
            log::info!("DRY RUN: tune2fs {:?} {}", opts.extra_args, device.display());
            return Ok(());
        }

        if !opts.confirmed {
            return Err(HalError::SafetyLock);
        }

        let mut args = opts.extra_args.clone();
        args.push(device.display().to_string());

        log::info!("tune2fs {}", args.join(" "));
        let mut cmd = Command::new("tune2fs");
        cmd.args(&args);
        run_checked("tune2fs", &mut cmd, PROBE_TIMEOUT).map(|_| ())
    }
}

impl BootRecordOps for LinuxHal {
    fn write_boot_record(
        &self,
        template: &Path,
        target_disk: &Path,
        opts: &BootRecordOptions,
    ) -> HalResult<()> {
        if opts.dry_run {
            log::info!(
                "DRY RUN: write boot record {} -> {}",
                template.display(),
                target_disk.display()
            );
            return Ok(());
        }

        if !opts.confirmed {
            return Err(HalError::SafetyLock);
        }

        log::info!(
            "Writing boot record {} -> {}",
            template.display(),
            target_disk.display()
        );

        let code = fs::read(template)?;
        let mut out = fs::OpenOptions::new()
            .write(true)
            .truncate(false)
            .open(target_disk)?;
        out.write_all(&code)?;
        out.sync_all()?;

        Ok(())
    }
}

impl SystemOps for LinuxHal {
    fn sync(&self) -> HalResult<()> {
        let mut cmd = Command::new("sync");
        run_checked("sync", &mut cmd, SYNC_TIMEOUT).map(|_| ())
    }

    fn udev_settle(&self) -> HalResult<()> {
        let mut cmd = Command::new("udevadm");
        cmd.arg("settle");
        run_checked("udevadm", &mut cmd, PROBE_TIMEOUT).map(|_| ())
    }
}

impl HostInfoOps for LinuxHal {
    fn proc_meminfo(&self) -> HalResult<String> {
        Ok(fs::read_to_string("/proc/meminfo")?)
    }

    fn proc_swaps(&self) -> HalResult<String> {
        Ok(fs::read_to_string("/proc/swaps")?)
    }

    fn proc_mountinfo(&self) -> HalResult<String> {
        Ok(fs::read_to_string("/proc/self/mountinfo")?)
    }

    fn os_release(&self) -> HalResult<String> {
        Ok(fs::read_to_string("/etc/os-release")?)
    }
}

impl ProbeOps for LinuxHal {
    fn list_devices(&self, include_non_removable: bool) -> HalResult<Vec<StorageDevice>> {
        crate::sysfs::block::scan_block_devices(include_non_removable)
            .map_err(|e| HalError::Other(format!("device discovery failed: {e:#}")))
    }

    fn mounted_partitions(&self, device: &StorageDevice) -> HalResult<Vec<PathBuf>> {
        let entries = crate::procfs::mountinfo::parse_mountinfo(&self.proc_mountinfo()?);
        Ok(crate::procfs::mountinfo::mounted_from(&entries, |src| {
            device.owns(src)
        }))
    }

    fn device_by_label(&self, label: &str) -> HalResult<Option<PathBuf>> {
        let by_label = Path::new("/dev/disk/by-label").join(label);
        if let Ok(dev) = fs::canonicalize(&by_label) {
            return Ok(Some(dev));
        }

        let mut cmd = Command::new("blkid");
        cmd.args(["-L", label]);
        let out = output_with_timeout("blkid", &mut cmd, None, PROBE_TIMEOUT)?;
        // blkid exits 2 when nothing carries the label.
        if !out.success() {
            return Ok(None);
        }
        let dev = out.output.trim();
        Ok((!dev.is_empty()).then(|| PathBuf::from(dev)))
    }

    fn used_bytes(&self, mount_point: &Path) -> HalResult<u64> {
        let st = nix::sys::statvfs::statvfs(mount_point).map_err(map_nix_err)?;
        let used_blocks = (st.blocks() as u64).saturating_sub(st.blocks_free() as u64);
        Ok(used_blocks.saturating_mul(st.fragment_size() as u64))
    }

    fn tree_size_bytes(&self, dir: &Path) -> HalResult<u64> {
        let mut total = 0u64;
        for entry in WalkDir::new(dir).follow_links(false) {
            let entry = entry.map_err(|e| HalError::Other(e.to_string()))?;
            if entry.file_type().is_file() {
                total = total.saturating_add(entry.metadata().map(|m| m.len()).unwrap_or(0));
            }
        }
        Ok(total)
    }
}

impl PartitionOps for LinuxHal {
    fn write_partition_table(
        &self,
        disk: &Path,
        script: &str,
        opts: &PartitionOptions,
    ) -> HalResult<String> {
        if opts.dry_run {
            log::info!("DRY RUN: sfdisk {} <<\n{}", disk.display(), script);
            return Ok(String::new());
        }
        if !opts.confirmed {
            return Err(HalError::SafetyLock);
        }

        log::info!("sfdisk {} <<\n{}", disk.display(), script);
        let mut cmd = Command::new("sfdisk");
        cmd.args(["--force", "--wipe", "always"]).arg(disk);
        output_with_timeout("sfdisk", &mut cmd, Some(script), SFDISK_TIMEOUT)?.into_result("sfdisk")
    }
}

impl SwapOps for LinuxHal {
    fn swap_off(&self, swap: &Path, dry_run: bool) -> HalResult<()> {
        if dry_run {
            log::info!("DRY RUN: swapoff {}", swap.display());
            return Ok(());
        }
        log::info!("swapoff {}", swap.display());
        let mut cmd = Command::new("swapoff");
        cmd.arg(swap);
        run_checked("swapoff", &mut cmd, SWAPOFF_TIMEOUT).map(|_| ())
    }
}

impl LoopOps for LinuxHal {
    fn losetup_attach(&self, image: &Path, read_only: bool) -> HalResult<String> {
        let mut args = vec!["--show".to_string(), "-f".to_string()];
        if read_only {
            args.push("-r".to_string());
        }
        args.push(image.display().to_string());

        let mut cmd = Command::new("losetup");
        cmd.args(&args);
        let out = run_checked("losetup", &mut cmd, LOSETUP_TIMEOUT)?;
        Ok(out.trim().to_string())
    }

    fn losetup_detach(&self, loop_device: &str) -> HalResult<()> {
        let mut cmd = Command::new("losetup");
        cmd.args(["-d", loop_device]);
        run_checked("losetup", &mut cmd, LOSETUP_TIMEOUT).map(|_| ())
    }
}

impl RsyncOps for LinuxHal {
    fn rsync_stream_stdout(
        &self,
        src: &Path,
        dst: &Path,
        opts: &RsyncOptions,
        on_stdout_line: &mut dyn FnMut(&str) -> bool,
    ) -> HalResult<()> {
        let mut args: Vec<String> = Vec::new();
        if opts.archive {
            args.push("-a".to_string());
        }
        if opts.progress {
            args.push("--progress".to_string());
        }
        args.extend(opts.extra_args.iter().cloned());

        // Ensure trailing slash on src to copy contents.
        args.push(format!("{}/", src.display()));
        args.push(dst.display().to_string());

        log::info!("rsync {}", args.join(" "));
        let mut cmd = Command::new("rsync");
        cmd.args(&args);
        // Idle detection only when progress output was requested; otherwise rsync may be
        // intentionally quiet.
        let limits = StreamLimits {
            max: RSYNC_MAX_TIMEOUT,
            idle: opts.progress.then_some(RSYNC_IDLE_TIMEOUT),
        };
        stream_with_timeout("rsync", &mut cmd, limits, on_stdout_line)?
            .into_result("rsync")
            .map(|_| ())
    }
}

impl CopyOps for LinuxHal {
    fn copy_jobs(
        &self,
        jobs: &[CopyJob],
        opts: &CopyOptions,
        on_progress: &mut dyn FnMut(CopyProgress) -> bool,
    ) -> HalResult<()> {
        super::copy_ops::copy_tree_jobs(jobs, opts, on_progress)
    }
}
