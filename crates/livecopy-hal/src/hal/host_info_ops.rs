//! Host information (read-only).
//!
//! This is "world-touching" (reads `/proc`, `/etc`) and belongs in the HAL.

use crate::HalResult;

pub trait HostInfoOps {
    fn proc_meminfo(&self) -> HalResult<String>;
    fn proc_swaps(&self) -> HalResult<String>;
    fn proc_mountinfo(&self) -> HalResult<String>;
    fn os_release(&self) -> HalResult<String>;
}
