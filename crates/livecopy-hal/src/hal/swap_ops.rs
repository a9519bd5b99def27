//! Swap area operations.

use crate::HalResult;
use std::path::Path;

pub trait SwapOps {
    /// Deactivate the swap area at `swap` (partition or file).
    fn swap_off(&self, swap: &Path, dry_run: bool) -> HalResult<()>;
}
