//! Flushing and device-event barriers between provisioning steps.

use crate::HalResult;

pub trait SystemOps {
    /// Flush dirty pages so a target can be unplugged after the run.
    fn sync(&self) -> HalResult<()>;

    /// Wait until udev has created the nodes of freshly written partitions.
    /// Callers treat failure as non-fatal.
    fn udev_settle(&self) -> HalResult<()>;
}
