//! HAL trait definitions and implementations.
//!
//! This module defines the core traits for system operations and provides
//! both real (LinuxHal) and fake (FakeHal) implementations.

pub mod boot_record_ops;
pub mod copy_ops;
pub mod fake_hal;
pub mod format_ops;
pub mod guards;
pub mod host_info_ops;
pub mod linux_hal;
pub mod loop_ops;
pub mod mount_ops;
pub mod partition_ops;
pub mod probe_ops;
pub mod process_ops;
pub mod rsync_ops;
pub mod swap_ops;
pub mod system_ops;

pub use boot_record_ops::{BootRecordOps, BootRecordOptions};
pub use copy_ops::{CopyJob, CopyOps, CopyOptions, CopyProgress};
pub use fake_hal::{FakeHal, Operation};
pub use format_ops::{FormatOps, FormatOptions};
pub use guards::{LoopGuard, MountGuard};
pub use host_info_ops::HostInfoOps;
pub use linux_hal::LinuxHal;
pub use loop_ops::LoopOps;
pub use mount_ops::{MountOps, MountOptions};
pub use partition_ops::{PartitionOps, PartitionOptions};
pub use probe_ops::ProbeOps;
pub use process_ops::{CommandOutput, ProcessOps};
pub use rsync_ops::{RsyncOps, RsyncOptions};
pub use swap_ops::SwapOps;
pub use system_ops::SystemOps;

/// Complete HAL combining all system operation traits.
pub trait SystemHal:
    BootRecordOps
    + CopyOps
    + FormatOps
    + HostInfoOps
    + LoopOps
    + MountOps
    + PartitionOps
    + ProbeOps
    + ProcessOps
    + RsyncOps
    + SwapOps
    + SystemOps
    + Send
    + Sync
{
}

/// Automatically implement SystemHal for any type implementing all required traits.
impl<T> SystemHal for T where
    T: BootRecordOps
        + CopyOps
        + FormatOps
        + HostInfoOps
        + LoopOps
        + MountOps
        + PartitionOps
        + ProbeOps
        + ProcessOps
        + RsyncOps
        + SwapOps
        + SystemOps
        + Send
        + Sync
{
}
