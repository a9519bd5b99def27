//! Provisioning options, loadable from `/etc/livecopy.toml`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::planner::MIB;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/livecopy.toml";

/// What to do when deactivating a swap area would leave too little memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwapPolicy {
    /// Ask the confirmer.
    #[default]
    Ask,
    /// Deactivate anyway (headless runs).
    Allow,
    /// Abort the device.
    Deny,
}

/// Distribution the live system belongs to; decides the FAT labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flavor {
    Debian,
    Lernstick,
}

impl Flavor {
    pub fn system_label(&self) -> &'static str {
        match self {
            Flavor::Debian => "DEBIAN_LIVE",
            Flavor::Lernstick => "LERNSTICK",
        }
    }

    pub fn exchange_label(&self) -> &'static str {
        match self {
            Flavor::Debian => "EXCHANGE",
            Flavor::Lernstick => "AUSTAUSCH",
        }
    }

    /// Pick the flavor from `/etc/os-release` content. Anything that is not
    /// Lernstick is treated as plain Debian live.
    pub fn detect(os_release: &str) -> Self {
        match livecopy_hal::os_release::parse_os_release(os_release) {
            Ok((id, _)) if id.contains("lernstick") => Flavor::Lernstick,
            _ => Flavor::Debian,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    /// Pause before the single partition-table retry.
    pub repartition_retry_delay_secs: u64,
    /// Pause after `udevadm settle` before formatting.
    pub settle_delay_secs: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            repartition_retry_delay_secs: 5,
            settle_delay_secs: 7,
        }
    }
}

impl Timings {
    /// No waiting at all; for tests.
    pub fn immediate() -> Self {
        Self {
            repartition_retry_delay_secs: 0,
            settle_delay_secs: 0,
        }
    }

    pub fn repartition_retry_delay(&self) -> Duration {
        Duration::from_secs(self.repartition_retry_delay_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }
}

/// Where the running live system keeps the data that gets copied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceDescriptors {
    /// Mounted boot medium of the running system.
    pub image_dir: PathBuf,
    /// Mounted exchange partition of the running system, if any.
    pub exchange_dir: Option<PathBuf>,
    pub persistence_label: String,
    /// Base squashfs, relative to `image_dir` unless absolute.
    pub squashfs: PathBuf,
}

impl Default for SourceDescriptors {
    fn default() -> Self {
        Self {
            image_dir: PathBuf::from("/lib/live/mount/medium"),
            exchange_dir: None,
            persistence_label: "live-rw".to_string(),
            squashfs: PathBuf::from("live/filesystem.squashfs"),
        }
    }
}

impl SourceDescriptors {
    pub fn squashfs_path(&self) -> PathBuf {
        self.image_dir.join(&self.squashfs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisioningOptions {
    /// Bytes needed by the system partition. Measured from the image tree
    /// when unset.
    pub system_size_bytes: Option<u64>,
    pub copy_exchange: bool,
    pub copy_persistence: bool,
    /// FAT label of the exchange partition (flavor default when unset).
    pub exchange_label: Option<String>,
    /// Requested exchange partition size.
    pub exchange_size_mib: u64,
    /// Auto-detected from `/etc/os-release` when unset.
    pub flavor: Option<Flavor>,
    /// Log destructive commands instead of running them.
    pub dry_run: bool,
    pub timings: Timings,
    pub swap_policy: SwapPolicy,
    /// Boot code written to the start of every target device.
    pub mbr_template: PathBuf,
    /// Parent of the temporary mount points.
    pub scratch_dir: PathBuf,
    pub sources: SourceDescriptors,
}

impl Default for ProvisioningOptions {
    fn default() -> Self {
        Self {
            system_size_bytes: None,
            copy_exchange: false,
            copy_persistence: false,
            exchange_label: None,
            exchange_size_mib: 0,
            flavor: None,
            dry_run: false,
            timings: Timings::default(),
            swap_policy: SwapPolicy::default(),
            mbr_template: PathBuf::from("/usr/lib/syslinux/mbr/mbr.bin"),
            scratch_dir: PathBuf::from("/run/livecopy"),
            sources: SourceDescriptors::default(),
        }
    }
}

impl ProvisioningOptions {
    /// Read options from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Like [`load`](Self::load), but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn requested_exchange_bytes(&self) -> u64 {
        self.exchange_size_mib.saturating_mul(MIB)
    }

    pub fn flavor(&self) -> Flavor {
        self.flavor.unwrap_or(Flavor::Debian)
    }

    /// Fill in the flavor from `/etc/os-release` unless one was configured.
    pub fn resolve_flavor(&mut self, os_release: &str) {
        if self.flavor.is_none() {
            let flavor = Flavor::detect(os_release);
            log::info!("Detected distribution flavor: {:?}", flavor);
            self.flavor = Some(flavor);
        }
    }

    pub fn exchange_label(&self) -> &str {
        self.exchange_label
            .as_deref()
            .unwrap_or_else(|| self.flavor().exchange_label())
    }

    pub fn system_label(&self) -> &'static str {
        self.flavor().system_label()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn partial_toml_keeps_defaults() {
        let opts = ProvisioningOptions::from_toml(
            r#"
            copy_persistence = true
            swap_policy = "deny"

            [timings]
            settle_delay_secs = 2

            [sources]
            persistence_label = "persistence"
            "#,
        )
        .unwrap();
        assert!(opts.copy_persistence);
        assert_eq!(opts.swap_policy, SwapPolicy::Deny);
        assert_eq!(opts.timings.settle_delay_secs, 2);
        assert_eq!(opts.timings.repartition_retry_delay_secs, 5);
        assert_eq!(opts.sources.persistence_label, "persistence");
        assert_eq!(
            opts.sources.squashfs_path(),
            PathBuf::from("/lib/live/mount/medium/live/filesystem.squashfs")
        );
    }

    #[test]
    fn load_or_default_tolerates_missing_file() {
        let dir = tempdir().unwrap();
        let opts = ProvisioningOptions::load_or_default(&dir.path().join("none.toml")).unwrap();
        assert_eq!(opts, ProvisioningOptions::default());
    }

    #[test]
    fn load_reports_bad_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("livecopy.toml");
        fs::write(&path, "swap_policy = \"maybe\"\n").unwrap();
        let err = ProvisioningOptions::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("livecopy.toml"));
    }

    #[test]
    fn flavor_detection_and_labels() {
        let mut opts = ProvisioningOptions::default();
        opts.resolve_flavor("NAME=\"Lernstick\"\nID=lernstick\nID_LIKE=debian\n");
        assert_eq!(opts.flavor, Some(Flavor::Lernstick));
        assert_eq!(opts.system_label(), "LERNSTICK");
        assert_eq!(opts.exchange_label(), "AUSTAUSCH");

        let mut debian = ProvisioningOptions::default();
        debian.resolve_flavor("ID=debian\n");
        assert_eq!(debian.system_label(), "DEBIAN_LIVE");
        debian.exchange_label = Some("DATA".to_string());
        assert_eq!(debian.exchange_label(), "DATA");
    }
}
