//! File copy engine: several source trees copied under one aggregate progress stream.

use crate::{HalError, HalResult};
use regex::Regex;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const COPY_BUFFER: usize = 1024 * 1024;

/// One tree to copy. Paths are matched relative to `source` with `/` separators.
#[derive(Debug, Clone)]
pub struct CopyJob {
    pub source: PathBuf,
    pub destination: PathBuf,
    /// Relative paths matching this pattern are skipped.
    pub exclude: Option<Regex>,
}

impl CopyJob {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            exclude: None,
        }
    }

    pub fn excluding(mut self, pattern: Regex) -> Self {
        self.exclude = Some(pattern);
        self
    }

    /// Whether the relative path `rel` takes part in this job.
    pub fn selects(&self, rel: &Path) -> bool {
        let rel = rel.to_string_lossy();
        !self.exclude.as_ref().is_some_and(|re| re.is_match(&rel))
    }
}

/// Options controlling how trees are copied.
#[derive(Debug, Clone)]
pub struct CopyOptions {
    /// Preserve permissions (mode bits).
    pub preserve_perms: bool,
    /// Recreate symlinks instead of skipping them.
    pub preserve_links: bool,
}

impl CopyOptions {
    /// Archive-style copy onto a POSIX filesystem.
    pub fn archive() -> Self {
        Self {
            preserve_perms: true,
            preserve_links: true,
        }
    }

    /// VFAT-safe copy (no perms, symlinks skipped).
    pub fn vfat_safe() -> Self {
        Self {
            preserve_perms: false,
            preserve_links: false,
        }
    }
}

/// Aggregate progress over all jobs of one copy run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyProgress {
    pub bytes_copied: u64,
    pub bytes_total: u64,
    pub files_copied: u64,
    pub files_total: u64,
}

impl CopyProgress {
    pub fn percent(&self) -> u8 {
        if self.bytes_total == 0 {
            return 100;
        }
        ((self.bytes_copied.min(self.bytes_total) as u128 * 100) / self.bytes_total as u128) as u8
    }
}

/// Copy operations abstraction.
pub trait CopyOps {
    /// Copy every job, reporting one combined byte count over all of them.
    ///
    /// The callback returns `true` to continue or `false` to abort the copy.
    fn copy_jobs(
        &self,
        jobs: &[CopyJob],
        opts: &CopyOptions,
        on_progress: &mut dyn FnMut(CopyProgress) -> bool,
    ) -> HalResult<()>;
}

/// One file scheduled by the copy engine.
struct PlannedEntry {
    src: PathBuf,
    dst: PathBuf,
    kind: EntryKind,
    len: u64,
}

enum EntryKind {
    File,
    Symlink,
}

fn plan_job(job: &CopyJob, opts: &CopyOptions) -> HalResult<Vec<PlannedEntry>> {
    let mut planned = Vec::new();
    for entry in WalkDir::new(&job.source)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| HalError::Other(e.to_string()))?;
        let rel = match entry.path().strip_prefix(&job.source) {
            Ok(rel) if !rel.as_os_str().is_empty() => rel.to_path_buf(),
            _ => continue,
        };
        let file_type = entry.file_type();
        if file_type.is_dir() || !job.selects(&rel) {
            continue;
        }
        let kind = if file_type.is_symlink() {
            if !opts.preserve_links {
                log::debug!("skipping symlink {}", entry.path().display());
                continue;
            }
            EntryKind::Symlink
        } else if file_type.is_file() {
            EntryKind::File
        } else {
            continue;
        };
        let len = match kind {
            EntryKind::File => entry.metadata().map(|m| m.len()).unwrap_or(0),
            EntryKind::Symlink => 0,
        };
        planned.push(PlannedEntry {
            src: entry.path().to_path_buf(),
            dst: job.destination.join(&rel),
            kind,
            len,
        });
    }
    Ok(planned)
}

/// Copy `jobs` on the local filesystem with 1 MiB reads.
///
/// Files are planned up front so the reported total covers every job.
pub fn copy_tree_jobs(
    jobs: &[CopyJob],
    opts: &CopyOptions,
    on_progress: &mut dyn FnMut(CopyProgress) -> bool,
) -> HalResult<()> {
    let mut planned = Vec::new();
    for job in jobs {
        log::info!(
            "copy {} -> {}",
            job.source.display(),
            job.destination.display()
        );
        planned.extend(plan_job(job, opts)?);
    }

    let mut progress = CopyProgress {
        bytes_copied: 0,
        bytes_total: planned.iter().map(|p| p.len).sum(),
        files_copied: 0,
        files_total: planned.len() as u64,
    };
    if !on_progress(progress.clone()) {
        return Err(HalError::Other("copy cancelled".to_string()));
    }

    let mut buf = vec![0u8; COPY_BUFFER];
    for entry in &planned {
        if let Some(parent) = entry.dst.parent() {
            fs::create_dir_all(parent)?;
        }
        match entry.kind {
            EntryKind::Symlink => {
                let link = fs::read_link(&entry.src)?;
                if fs::symlink_metadata(&entry.dst).is_ok() {
                    fs::remove_file(&entry.dst)?;
                }
                std::os::unix::fs::symlink(link, &entry.dst)?;
            }
            EntryKind::File => {
                let mut input = fs::File::open(&entry.src)?;
                let mut output = fs::File::create(&entry.dst)?;
                loop {
                    let n = input.read(&mut buf)?;
                    if n == 0 {
                        break;
                    }
                    output.write_all(&buf[..n])?;
                    progress.bytes_copied += n as u64;
                    if !on_progress(progress.clone()) {
                        return Err(HalError::Other("copy cancelled".to_string()));
                    }
                }
                if opts.preserve_perms {
                    let perms = fs::metadata(&entry.src)?.permissions();
                    fs::set_permissions(&entry.dst, perms)?;
                }
            }
        }
        progress.files_copied += 1;
    }
    if !on_progress(progress) {
        return Err(HalError::Other("copy cancelled".to_string()));
    }
    Ok(())
}
