//! Persistence store mirroring via rsync.

use crate::HalResult;
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct RsyncOptions {
    /// `-a`: recurse, keep symlinks, permissions, times, owners.
    pub archive: bool,
    /// `--progress`: per-file lines ending in `to-check=X/Y)`.
    pub progress: bool,
    /// Extra rsync args (verbatim).
    pub extra_args: Vec<String>,
}

impl RsyncOptions {
    /// Archive mirror with per-file progress, used for persistence stores.
    pub fn mirror() -> Self {
        Self {
            archive: true,
            progress: true,
            extra_args: vec!["-H".to_string(), "--numeric-ids".to_string()],
        }
    }
}

pub trait RsyncOps {
    /// Mirror `src` into `dst`, handing each stdout line to
    /// `on_stdout_line` as it arrives.
    ///
    /// Returning false from the callback kills rsync and yields an error,
    /// as does a non-zero exit.
    fn rsync_stream_stdout(
        &self,
        src: &Path,
        dst: &Path,
        opts: &RsyncOptions,
        on_stdout_line: &mut dyn FnMut(&str) -> bool,
    ) -> HalResult<()>;
}
