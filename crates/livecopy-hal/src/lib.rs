//! livecopy hardware abstraction layer (HAL).
//!
//! Everything that touches the running system (block devices, mounts, external
//! tools, `/proc`) goes through the traits in [`hal`], so the provisioning
//! workflow can be exercised against [`FakeHal`] without root or real disks.

pub mod device;
pub mod hal;
pub mod os_release;
pub mod procfs;
pub mod sysfs;

pub use device::{DeviceKind, StorageDevice};
pub use hal::*;
pub use livecopy_error::{HalError, HalResult};
