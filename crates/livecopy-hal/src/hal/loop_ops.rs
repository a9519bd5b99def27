//! Loop device operations (losetup).

use crate::HalResult;
use std::path::Path;

pub trait LoopOps {
    /// Attach `image` to a free loop device, returning its path (e.g. `/dev/loop7`).
    ///
    /// With `read_only` the loop device refuses writes (`losetup -r`).
    fn losetup_attach(&self, image: &Path, read_only: bool) -> HalResult<String>;

    /// Detach a loop device.
    fn losetup_detach(&self, loop_device: &str) -> HalResult<()>;
}
