//! Repackaging the running system, persistence included, as a bootable ISO.

use crate::boot_config::{set_boot_flags, syslinux_to_isolinux, LoaderKind};
use crate::config::ProvisioningOptions;
use crate::manifest::write_manifest;
use crate::mounts::{mount_guarded, MountPoints};
use crate::progress::{Phase, ProgressReporter};
use crate::telemetry::{ProgressParser, ProgressStream};
use crate::validation::validate_iso_target;
use livecopy_error::{DestructiveStep, ProvisionError, ProvisionResult};
use livecopy_hal::{
    CopyJob, CopyOptions, HalResult, LoopGuard, MountGuard, MountOptions, SystemHal,
};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const COMPRESS_TIMEOUT: Duration = Duration::from_secs(6 * 60 * 60);
const MASTER_TIMEOUT: Duration = Duration::from_secs(2 * 60 * 60);

/// Where the ISO goes and what it is called.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsoTarget {
    pub output: PathBuf,
    /// ISO 9660 volume id, also used as application id.
    pub label: String,
}

impl IsoTarget {
    pub fn new(output: impl Into<PathBuf>, label: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            label: label.into(),
        }
    }
}

/// `genisoimage` arguments for an isolinux-bootable image of `tree`.
pub fn genisoimage_args(target: &IsoTarget, tree: &Path) -> Vec<String> {
    let mut args: Vec<String> = [
        "-J",
        "-l",
        "-R",
        "-cache-inodes",
        "-allow-multidot",
        "-A",
        target.label.as_str(),
        "-V",
        target.label.as_str(),
        "-b",
        "isolinux/isolinux.bin",
        "-c",
        "isolinux/boot.cat",
        "-no-emul-boot",
        "-boot-load-size",
        "4",
        "-boot-info-table",
        "-o",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    args.push(target.output.to_string_lossy().into_owned());
    args.push(tree.to_string_lossy().into_owned());
    args
}

/// Squashfs path relative to the medium root, when it lives inside it.
fn squashfs_rel(options: &ProvisioningOptions) -> PathBuf {
    let sources = &options.sources;
    match sources.squashfs.strip_prefix(&sources.image_dir) {
        Ok(rel) => rel.to_path_buf(),
        Err(_) if sources.squashfs.is_relative() => sources.squashfs.clone(),
        Err(_) => PathBuf::from("live/filesystem.squashfs"),
    }
}

/// Read-only union of the persistence store over the base image.
struct SourceMounts<'a, H: SystemHal + ?Sized> {
    union: MountGuard<'a, H>,
    persistence: Option<MountGuard<'a, H>>,
    base: MountGuard<'a, H>,
    squashfs: LoopGuard<'a, H>,
}

impl<'a, H: SystemHal + ?Sized> SourceMounts<'a, H> {
    /// Release in reverse mount order.
    fn release(self) -> HalResult<()> {
        self.union.unmount()?;
        if let Some(persistence) = self.persistence {
            persistence.unmount()?;
        }
        self.base.unmount()?;
        self.squashfs.detach()
    }
}

fn mount_sources<'a, H: SystemHal + ?Sized>(
    hal: &'a H,
    mounts: &MountPoints,
    options: &ProvisioningOptions,
) -> HalResult<SourceMounts<'a, H>> {
    let squashfs_path = options.sources.squashfs_path();
    let loop_device = hal.losetup_attach(&squashfs_path, true)?;
    let squashfs = LoopGuard::new(hal, loop_device);
    log::info!("{} attached to {}", squashfs_path.display(), squashfs.device());

    let base = mount_guarded(
        hal,
        Path::new(squashfs.device()),
        &mounts.base,
        Some("squashfs"),
        MountOptions::read_only(),
        false,
    )?;

    let label = &options.sources.persistence_label;
    let persistence = match hal.device_by_label(label)? {
        Some(source) => Some(mount_guarded(
            hal,
            &source,
            &mounts.persistence_src,
            Some("ext4"),
            MountOptions::read_only(),
            false,
        )?),
        None => {
            log::warn!("No partition labelled {label}, image contains the base system only");
            None
        }
    };

    let lower = match &persistence {
        Some(_) => format!(
            "lowerdir={}:{}",
            mounts.persistence_src.display(),
            mounts.base.display()
        ),
        None => format!("lowerdir={}", mounts.base.display()),
    };
    let union = mount_guarded(
        hal,
        Path::new("overlay"),
        &mounts.union,
        Some("overlay"),
        MountOptions::with_options(lower).and_read_only(),
        false,
    )?;

    Ok(SourceMounts {
        union,
        persistence,
        base,
        squashfs,
    })
}

/// Build an ISO image of the running system with its persistence merged
/// into the squashfs.
///
/// All mounts and the loop device are released again, and the work
/// directory removed, whether or not the build succeeds.
pub fn build_iso<H: SystemHal + ?Sized>(
    hal: &H,
    target: &IsoTarget,
    options: &ProvisioningOptions,
    progress: &ProgressReporter,
) -> ProvisionResult<()> {
    validate_iso_target(&target.output, &target.label)?;
    let output = target.output.as_path();
    let fail = |step, e: &dyn std::fmt::Display| ProvisionError::step(output, step, e);

    if options.dry_run {
        log::info!(
            "DRY RUN: would build {} ({}) from {}",
            output.display(),
            target.label,
            options.sources.image_dir.display()
        );
        return Ok(());
    }

    fs::create_dir_all(&options.scratch_dir).map_err(|e| fail(DestructiveStep::Mount, &e))?;
    let work_dir = tempfile::Builder::new()
        .prefix("iso-")
        .tempdir_in(&options.scratch_dir)
        .map_err(|e| fail(DestructiveStep::Mount, &e))?;
    let mounts = MountPoints::new(work_dir.path());
    mounts
        .ensure_dirs()
        .map_err(|e| fail(DestructiveStep::Mount, &format!("{e:#}")))?;
    let tree = work_dir.path().join("tree");
    fs::create_dir_all(&tree).map_err(|e| fail(DestructiveStep::Mount, &e))?;

    progress.phase_started(Phase::MountSources);
    let sources = mount_sources(hal, &mounts, options).map_err(|e| fail(DestructiveStep::Mount, &e))?;
    progress.phase_completed(Phase::MountSources);

    progress.phase_started(Phase::CopyMedium);
    let squashfs_rel = squashfs_rel(options);
    let exclude = Regex::new(&format!(
        "^{}$",
        regex::escape(&squashfs_rel.to_string_lossy())
    ))
    .map_err(|e| fail(DestructiveStep::Copy, &e))?;
    let job = CopyJob::new(&options.sources.image_dir, &tree).excluding(exclude);
    hal.copy_jobs(&[job], &CopyOptions::archive(), &mut |_| true)
        .map_err(|e| fail(DestructiveStep::Copy, &e))?;
    progress.phase_completed(Phase::CopyMedium);

    progress.phase_started(Phase::Compress);
    let squashfs_out = tree.join(&squashfs_rel);
    if let Some(parent) = squashfs_out.parent() {
        fs::create_dir_all(parent).map_err(|e| fail(DestructiveStep::Compress, &e))?;
    }
    let union = mounts.union.to_string_lossy();
    let squashfs_arg = squashfs_out.to_string_lossy();
    let mut parser = ProgressParser::new(ProgressStream::Compress);
    hal.command_stream(
        "mksquashfs",
        &[&*union, &*squashfs_arg, "-noappend"],
        COMPRESS_TIMEOUT,
        &mut |line| {
            if let Some(event) = parser.parse_line(line) {
                progress.telemetry(Phase::Compress, event);
            }
        },
    )
    .and_then(|out| out.into_result("mksquashfs"))
    .map_err(|e| fail(DestructiveStep::Compress, &e))?;
    sources
        .release()
        .map_err(|e| fail(DestructiveStep::Unmount, &e))?;
    progress.phase_completed(Phase::Compress);

    progress.phase_started(Phase::Manifest);
    syslinux_to_isolinux(&tree)
        .and_then(|_| set_boot_flags(&tree.join(LoaderKind::Isolinux.name()), false))
        .map_err(|e| fail(DestructiveStep::BootConfig, &format!("{e:#}")))?;
    write_manifest(&tree).map_err(|e| fail(DestructiveStep::Manifest, &format!("{e:#}")))?;
    progress.phase_completed(Phase::Manifest);

    progress.phase_started(Phase::MasterIso);
    let args = genisoimage_args(target, &tree);
    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    log::info!("genisoimage {}", args.join(" "));
    let mut parser = ProgressParser::new(ProgressStream::MasterIso);
    hal.command_stream("genisoimage", &arg_refs, MASTER_TIMEOUT, &mut |line| {
        if let Some(event) = parser.parse_line(line) {
            progress.telemetry(Phase::MasterIso, event);
        }
    })
    .and_then(|out| out.into_result("genisoimage"))
    .map_err(|e| fail(DestructiveStep::MasterIso, &e))?;
    progress.phase_completed(Phase::MasterIso);

    log::info!("🎉 ISO image written to {}", output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceDescriptors;
    use crate::progress::ProgressUpdate;
    use livecopy_error::ValidationError;
    use livecopy_hal::{FakeHal, HostInfoOps, MountOps, Operation};
    use std::sync::mpsc;
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        dir: TempDir,
        options: ProvisioningOptions,
    }

    fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let image = dir.path().join("medium");
        fs::create_dir_all(image.join("syslinux")).unwrap();
        fs::create_dir_all(image.join("live")).unwrap();
        fs::write(image.join("syslinux/syslinux.cfg"), "include syslinux/menu.cfg\n").unwrap();
        fs::write(image.join("syslinux/syslinux.bin"), [1u8; 16]).unwrap();
        fs::write(
            image.join("syslinux/xmlboot.config"),
            "<option id=\"persistence\" selected=\"true\"/>\n<option id=\"live-only\" selected=\"false\"/>\n",
        )
        .unwrap();
        fs::write(image.join("live/vmlinuz"), [2u8; 32]).unwrap();
        fs::write(image.join("live/filesystem.squashfs"), [3u8; 64]).unwrap();
        let options = ProvisioningOptions {
            scratch_dir: dir.path().join("scratch"),
            sources: SourceDescriptors {
                image_dir: image,
                ..Default::default()
            },
            ..Default::default()
        };
        Fixture { dir, options }
    }

    #[test]
    fn genisoimage_arguments() {
        let target = IsoTarget::new("/srv/live.iso", "LERNSTICK");
        let args = genisoimage_args(&target, Path::new("/run/livecopy/iso/tree"));
        assert_eq!(&args[..5], ["-J", "-l", "-R", "-cache-inodes", "-allow-multidot"]);
        assert_eq!(&args[5..9], ["-A", "LERNSTICK", "-V", "LERNSTICK"]);
        assert_eq!(
            &args[args.len() - 3..],
            ["-o", "/srv/live.iso", "/run/livecopy/iso/tree"]
        );
    }

    #[test]
    fn squashfs_is_taken_relative_to_medium() {
        let mut options = ProvisioningOptions::default();
        assert_eq!(squashfs_rel(&options), PathBuf::from("live/filesystem.squashfs"));
        options.sources.squashfs = PathBuf::from("/lib/live/mount/medium/live/base.squashfs");
        assert_eq!(squashfs_rel(&options), PathBuf::from("live/base.squashfs"));
    }

    #[test]
    fn builds_iso_from_union_of_persistence_and_base() {
        let fx = fixture();
        let output = fx.dir.path().join("live.iso");
        let hal = FakeHal::new()
            .with_label("live-rw", "/dev/sda3")
            .with_stream_lines("mksquashfs", &["[=====/      ] 43333/230033  18%"])
            .with_stream_lines("genisoimage", &[" 89.33% done, estimate finish Sat"]);
        let (tx, rx) = mpsc::channel();

        build_iso(
            &hal,
            &IsoTarget::new(&output, "DEBIAN_LIVE"),
            &fx.options,
            &ProgressReporter::new(tx),
        )
        .unwrap();

        let ops = hal.operations();
        assert!(ops.iter().any(|op| matches!(
            op,
            Operation::LosetupAttach { image, read_only: true, .. }
                if image.ends_with("live/filesystem.squashfs")
        )));
        let overlay = ops
            .iter()
            .find_map(|op| match op {
                Operation::Mount {
                    fstype: Some(fs),
                    options: Some(opts),
                    read_only,
                    ..
                } if fs == "overlay" => Some((opts.clone(), *read_only)),
                _ => None,
            })
            .unwrap();
        assert!(overlay.0.starts_with("lowerdir="));
        assert!(overlay.0.contains("persistence_src:"));
        assert!(overlay.1);

        let mksquashfs = hal.commands("mksquashfs");
        assert_eq!(mksquashfs.len(), 1);
        assert!(mksquashfs[0][1].ends_with("tree/live/filesystem.squashfs"));
        assert_eq!(mksquashfs[0][2], "-noappend");

        let genisoimage = hal.commands("genisoimage");
        assert!(genisoimage[0].contains(&output.to_string_lossy().into_owned()));

        // Detach comes last, after every unmount.
        let detach = ops
            .iter()
            .position(|op| matches!(op, Operation::LosetupDetach { .. }))
            .unwrap();
        let last_unmount = ops
            .iter()
            .rposition(|op| matches!(op, Operation::Unmount { .. }))
            .unwrap();
        assert!(last_unmount < detach);

        let events: Vec<(ProgressStream, u8)> = rx
            .try_iter()
            .filter_map(|u| match u {
                ProgressUpdate::Telemetry(e) => Some((e.stream, e.percent)),
                _ => None,
            })
            .collect();
        assert_eq!(
            events,
            vec![(ProgressStream::Compress, 18), (ProgressStream::MasterIso, 89)]
        );

        // Work directory is gone.
        assert_eq!(fs::read_dir(&fx.options.scratch_dir).unwrap().count(), 0);
    }

    #[test]
    fn failed_compression_still_releases_sources() {
        let fx = fixture();
        let hal = FakeHal::new().fail_command("mksquashfs");

        let err = build_iso(
            &hal,
            &IsoTarget::new(fx.dir.path().join("live.iso"), "DEBIAN_LIVE"),
            &fx.options,
            &ProgressReporter::silent(),
        )
        .unwrap_err();

        assert_eq!(err.failed_step(), Some(DestructiveStep::Compress));
        assert!(hal.has_operation(|op| matches!(op, Operation::LosetupDetach { .. })));
        let mountinfo = hal.proc_mountinfo().unwrap();
        assert!(mountinfo.trim().is_empty(), "left mounted: {mountinfo}");
        assert!(hal.commands("genisoimage").is_empty());
    }

    #[test]
    fn invalid_target_is_rejected_before_anything_runs() {
        let fx = fixture();
        let hal = FakeHal::new();
        let err = build_iso(
            &hal,
            &IsoTarget::new(fx.dir.path(), "DEBIAN_LIVE"),
            &fx.options,
            &ProgressReporter::silent(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::Validation(ValidationError::InvalidIsoTarget(_))
        ));
        assert_eq!(hal.operation_count(), 0);
    }

    #[test]
    fn base_only_image_without_persistence() {
        let fx = fixture();
        let hal = FakeHal::new();
        build_iso(
            &hal,
            &IsoTarget::new(fx.dir.path().join("live.iso"), "DEBIAN_LIVE"),
            &fx.options,
            &ProgressReporter::silent(),
        )
        .unwrap();
        assert!(!hal.is_mounted(Path::new("/dev/sda3")).unwrap());
        assert!(!hal.has_operation(|op| matches!(
            op,
            Operation::Mount { fstype: Some(fs), .. } if fs == "ext4"
        )));
    }
}
