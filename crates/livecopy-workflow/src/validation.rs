//! Checks that run before anything destructive happens.

use crate::config::ProvisioningOptions;
use crate::planner::{self, LayoutClass, PartitionLayout};
use livecopy_error::ValidationError;
use livecopy_hal::StorageDevice;
use std::path::Path;

const FAT_LABEL_MAX: usize = 11;
const ISO_LABEL_MAX: usize = 32;
const FAT_FORBIDDEN: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

/// Byte counts of the data a run has to fit onto each target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceSizes {
    pub system_bytes: u64,
    pub exchange_used_bytes: u64,
    pub persistence_used_bytes: u64,
}

/// A selected device together with the layout it will receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedDevice {
    pub device: StorageDevice,
    pub layout: PartitionLayout,
}

pub fn validate_fat_label(label: &str) -> Result<(), ValidationError> {
    let len = label.chars().count();
    if len == 0 || len > FAT_LABEL_MAX || label.contains(FAT_FORBIDDEN) {
        return Err(ValidationError::InvalidLabel(label.to_string()));
    }
    Ok(())
}

/// Plan every selected device and reject the selection if any of them
/// cannot take the requested copy.
pub fn validate_selection(
    devices: &[StorageDevice],
    options: &ProvisioningOptions,
    sizes: &SourceSizes,
) -> Result<Vec<PlannedDevice>, ValidationError> {
    if devices.is_empty() {
        return Err(ValidationError::NoDevicesSelected);
    }
    validate_fat_label(options.exchange_label())?;
    if options.copy_exchange && options.sources.exchange_dir.is_none() {
        return Err(ValidationError::NoExchangeSource);
    }

    let mut planned = Vec::with_capacity(devices.len());
    for device in devices {
        let layout = planner::plan(
            device.size_bytes,
            sizes.system_bytes,
            options.requested_exchange_bytes(),
        );
        let path = device.path.clone();
        if layout.class == LayoutClass::TooSmall {
            return Err(ValidationError::TooSmall { device: path });
        }
        if options.copy_exchange {
            if !layout.has_exchange() {
                return Err(ValidationError::NoExchangeAtTarget { device: path });
            }
            if layout.exchange_size_bytes < sizes.exchange_used_bytes {
                return Err(ValidationError::ExchangeTooSmall {
                    device: path,
                    needed: sizes.exchange_used_bytes,
                    available: layout.exchange_size_bytes,
                });
            }
        }
        if options.copy_persistence {
            if !layout.has_persistence() {
                return Err(ValidationError::NoPersistenceAtTarget { device: path });
            }
            if layout.persistence_size_bytes < sizes.persistence_used_bytes {
                return Err(ValidationError::PersistenceTooSmall {
                    device: path,
                    needed: sizes.persistence_used_bytes,
                    available: layout.persistence_size_bytes,
                });
            }
        }
        layout.check_floor(&device.path)?;
        log::debug!("{}: layout {} {:?}", device.path.display(), layout.class, layout);
        planned.push(PlannedDevice {
            device: device.clone(),
            layout,
        });
    }
    Ok(planned)
}

/// The output must be a file in an existing directory; the volume id must
/// fit ISO 9660 limits.
pub fn validate_iso_target(target: &Path, label: &str) -> Result<(), ValidationError> {
    if target.as_os_str().is_empty() {
        return Err(ValidationError::InvalidIsoTarget(
            "no output file given".to_string(),
        ));
    }
    if target.is_dir() {
        return Err(ValidationError::InvalidIsoTarget(format!(
            "{} is a directory",
            target.display()
        )));
    }
    let parent = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    if !parent.is_dir() {
        return Err(ValidationError::InvalidIsoTarget(format!(
            "directory {} does not exist",
            parent.display()
        )));
    }
    let len = label.chars().count();
    if len == 0 || len > ISO_LABEL_MAX {
        return Err(ValidationError::InvalidIsoTarget(format!(
            "volume label {label:?} must be 1-{ISO_LABEL_MAX} characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceDescriptors;
    use crate::planner::MIB;
    use livecopy_hal::DeviceKind;
    use std::path::PathBuf;
    use tempfile::tempdir;

    const GIB: u64 = 1024 * MIB;

    fn usb(path: &str, size: u64) -> StorageDevice {
        StorageDevice::new(
            path,
            size,
            DeviceKind::UsbDrive {
                vendor: "Generic".to_string(),
                model: "Flash Disk".to_string(),
                revision: "8.07".to_string(),
            },
        )
    }

    fn sizes(system: u64) -> SourceSizes {
        SourceSizes {
            system_bytes: system,
            ..Default::default()
        }
    }

    fn copying_exchange() -> ProvisioningOptions {
        ProvisioningOptions {
            copy_exchange: true,
            sources: SourceDescriptors {
                exchange_dir: Some(PathBuf::from("/lib/live/mount/exchange")),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn empty_selection_is_rejected() {
        let err = validate_selection(&[], &ProvisioningOptions::default(), &sizes(GIB)).unwrap_err();
        assert_eq!(err, ValidationError::NoDevicesSelected);
    }

    #[test]
    fn exchange_copy_onto_system_only_layout_fails() {
        let device = usb("/dev/sdb", GIB + 100 * MIB);
        assert_eq!(
            planner::plan(device.size_bytes, GIB, 0).class,
            LayoutClass::SystemOnly
        );

        let err = validate_selection(&[device], &copying_exchange(), &sizes(GIB)).unwrap_err();
        assert_eq!(
            err,
            ValidationError::NoExchangeAtTarget {
                device: PathBuf::from("/dev/sdb")
            }
        );
    }

    #[test]
    fn exchange_copy_without_requested_exchange_size_fails() {
        // Room for both optional partitions, but exchange_size_mib is 0.
        let device = usb("/dev/sdb", GIB + 500 * MIB);
        let layout = planner::plan(device.size_bytes, GIB, 0);
        assert_eq!(layout.class, LayoutClass::SystemPlusExchangePlusPersistence);
        assert!(!layout.has_exchange());

        let err = validate_selection(&[device], &copying_exchange(), &sizes(GIB)).unwrap_err();
        assert_eq!(
            err,
            ValidationError::NoExchangeAtTarget {
                device: PathBuf::from("/dev/sdb")
            }
        );
    }

    #[test]
    fn exchange_copy_needs_a_source_directory() {
        let options = ProvisioningOptions {
            copy_exchange: true,
            exchange_size_mib: 1024,
            ..Default::default()
        };
        let err = validate_selection(&[usb("/dev/sdb", 8 * GIB)], &options, &sizes(GIB))
            .unwrap_err();
        assert_eq!(err, ValidationError::NoExchangeSource);

        assert!(validate_selection(
            &[usb("/dev/sdb", 8 * GIB)],
            &ProvisioningOptions {
                exchange_size_mib: 1024,
                ..copying_exchange()
            },
            &sizes(GIB)
        )
        .is_ok());
    }

    #[test]
    fn too_small_device_names_the_device() {
        let err = validate_selection(
            &[usb("/dev/sdb", 8 * GIB), usb("/dev/sdc", GIB)],
            &ProvisioningOptions::default(),
            &sizes(2 * GIB),
        )
        .unwrap_err();
        assert_eq!(
            err,
            ValidationError::TooSmall {
                device: PathBuf::from("/dev/sdc")
            }
        );
    }

    #[test]
    fn exchange_and_persistence_must_hold_their_data() {
        let options = ProvisioningOptions {
            copy_persistence: true,
            exchange_size_mib: 1024,
            ..copying_exchange()
        };
        let mut need = SourceSizes {
            system_bytes: 2 * GIB,
            exchange_used_bytes: 2 * GIB,
            persistence_used_bytes: 0,
        };
        let device = [usb("/dev/sdb", 8 * GIB)];
        assert!(matches!(
            validate_selection(&device, &options, &need),
            Err(ValidationError::ExchangeTooSmall { .. })
        ));

        need.exchange_used_bytes = 512 * MIB;
        need.persistence_used_bytes = 6 * GIB;
        assert!(matches!(
            validate_selection(&device, &options, &need),
            Err(ValidationError::PersistenceTooSmall { .. })
        ));

        need.persistence_used_bytes = GIB;
        let planned = validate_selection(&device, &options, &need).unwrap();
        assert_eq!(planned[0].layout.exchange_size_bytes, GIB);
        assert_eq!(planned[0].layout.persistence_size_bytes, 5 * GIB - MIB);
    }

    #[test]
    fn persistence_copy_needs_persistence_partition() {
        let options = ProvisioningOptions {
            copy_persistence: true,
            ..Default::default()
        };
        let err = validate_selection(&[usb("/dev/sdb", GIB)], &options, &sizes(900 * MIB))
            .unwrap_err();
        assert!(matches!(err, ValidationError::NoPersistenceAtTarget { .. }));
    }

    #[test]
    fn fat_labels() {
        assert!(validate_fat_label("EXCHANGE").is_ok());
        assert!(validate_fat_label("AUSTAUSCH").is_ok());
        assert!(validate_fat_label("").is_err());
        assert!(validate_fat_label("TWELVE_CHARS").is_err());
        assert!(validate_fat_label("A:B").is_err());

        let options = ProvisioningOptions {
            exchange_label: Some("BAD/LABEL".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            validate_selection(&[usb("/dev/sdb", 8 * GIB)], &options, &sizes(GIB)),
            Err(ValidationError::InvalidLabel(_))
        ));
    }

    #[test]
    fn iso_target_checks() {
        let dir = tempdir().unwrap();
        assert!(validate_iso_target(&dir.path().join("live.iso"), "DEBIAN_LIVE").is_ok());
        assert!(validate_iso_target(dir.path(), "DEBIAN_LIVE").is_err());
        assert!(validate_iso_target(&dir.path().join("missing/live.iso"), "X").is_err());
        assert!(validate_iso_target(&dir.path().join("live.iso"), "").is_err());
        assert!(validate_iso_target(&dir.path().join("live.iso"), &"L".repeat(33)).is_err());
    }
}
