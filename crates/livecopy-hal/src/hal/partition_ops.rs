//! Partition table operations (sfdisk).

use crate::HalResult;
use std::path::Path;

/// Same gate as `FormatOptions`: unconfirmed writes are refused.
#[derive(Debug, Clone, Copy)]
pub struct PartitionOptions {
    pub dry_run: bool,
    pub confirmed: bool,
}

impl PartitionOptions {
    pub fn new(dry_run: bool, confirmed: bool) -> Self {
        Self { dry_run, confirmed }
    }
}

pub trait PartitionOps {
    /// Replace the partition table of `disk` by feeding `script` to `sfdisk`.
    ///
    /// A non-zero exit is reported as `HalError::CommandFailed` carrying the
    /// tool's combined output; retry policy belongs to the caller.
    fn write_partition_table(
        &self,
        disk: &Path,
        script: &str,
        opts: &PartitionOptions,
    ) -> HalResult<String>;
}
