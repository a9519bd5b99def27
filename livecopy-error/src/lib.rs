use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub type HalResult<T> = Result<T, HalError>;
pub type ProvisionResult<T> = Result<T, ProvisionError>;

#[derive(Error, Debug)]
pub enum HalError {
    #[error("Safety lock engaged. Confirm the destructive operation to proceed.")]
    SafetyLock,

    #[error("Disk is busy (mounted or in use)")]
    DiskBusy,

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Command not found: {0}")]
    CommandNotFound(String),

    #[error("Command failed: {program} (exit={code:?}): {output}")]
    CommandFailed {
        program: String,
        code: Option<i32>,
        output: String,
    },

    #[error("Command timed out: {program} after {timeout_secs}s")]
    CommandTimeout { program: String, timeout_secs: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("nix errno: {0}")]
    Nix(#[from] nix::errno::Errno),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("{0}")]
    Other(String),
}

/// Problems detected before anything destructive happens. Recoverable by
/// changing the selection or the options.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("No target device selected")]
    NoDevicesSelected,

    #[error("{}: device is too small for the live system", device.display())]
    TooSmall { device: PathBuf },

    #[error("Exchange copy requested but no source exchange directory is configured")]
    NoExchangeSource,

    #[error("{}: target layout has no exchange partition", device.display())]
    NoExchangeAtTarget { device: PathBuf },

    #[error(
        "{}: exchange partition ({available} bytes) cannot hold the exchange data ({needed} bytes)",
        device.display()
    )]
    ExchangeTooSmall {
        device: PathBuf,
        needed: u64,
        available: u64,
    },

    #[error("{}: target layout has no persistence partition", device.display())]
    NoPersistenceAtTarget { device: PathBuf },

    #[error(
        "{}: persistence partition ({available} bytes) cannot hold the persistence data ({needed} bytes)",
        device.display()
    )]
    PersistenceTooSmall {
        device: PathBuf,
        needed: u64,
        available: u64,
    },

    #[error(
        "{}: {partition} partition ({size} bytes) is below the {floor} byte minimum",
        device.display()
    )]
    PartitionBelowFloor {
        device: PathBuf,
        partition: &'static str,
        size: u64,
        floor: u64,
    },

    #[error("Invalid FAT label {0:?} (1-11 characters, no \\ / : * ? \" < > |)")]
    InvalidLabel(String),

    #[error("Invalid ISO target: {0}")]
    InvalidIsoTarget(String),
}

/// The destructive step that was running when a device failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestructiveStep {
    SwapOff,
    Unmount,
    PartitionTable,
    Format,
    Mount,
    Copy,
    BootConfig,
    PersistenceCopy,
    Bootloader,
    BootRecord,
    Compress,
    Manifest,
    MasterIso,
}

impl fmt::Display for DestructiveStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DestructiveStep::SwapOff => "swap deactivation",
            DestructiveStep::Unmount => "unmount",
            DestructiveStep::PartitionTable => "partition table write",
            DestructiveStep::Format => "format",
            DestructiveStep::Mount => "mount",
            DestructiveStep::Copy => "copy",
            DestructiveStep::BootConfig => "boot configuration rewrite",
            DestructiveStep::PersistenceCopy => "persistence copy",
            DestructiveStep::Bootloader => "boot loader install",
            DestructiveStep::BootRecord => "master boot record write",
            DestructiveStep::Compress => "squashfs compression",
            DestructiveStep::Manifest => "md5sum manifest",
            DestructiveStep::MasterIso => "ISO mastering",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{step} failed on {}: {detail}", device.display())]
    DestructiveStep {
        device: PathBuf,
        step: DestructiveStep,
        detail: String,
    },

    #[error("Aborted by user: {0}")]
    SafetyAbort(String),

    /// Failure while inspecting the host, before any device was touched.
    #[error(transparent)]
    Hal(#[from] HalError),
}

impl ProvisionError {
    /// Wraps a lower-level failure as a destructive-step error for `device`.
    ///
    /// `detail` keeps the tool's captured output (see `HalError::CommandFailed`).
    pub fn step(device: &Path, step: DestructiveStep, err: impl fmt::Display) -> Self {
        ProvisionError::DestructiveStep {
            device: device.to_path_buf(),
            step,
            detail: err.to_string(),
        }
    }

    pub fn is_safety_abort(&self) -> bool {
        matches!(self, ProvisionError::SafetyAbort(_))
    }

    pub fn failed_step(&self) -> Option<DestructiveStep> {
        match self {
            ProvisionError::DestructiveStep { step, .. } => Some(*step),
            _ => None,
        }
    }
}
