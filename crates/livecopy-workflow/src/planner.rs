//! Partition planning: capacity classification and exact partition sizes.
//!
//! Pure functions, no I/O. The system partition is always last and takes
//! whatever the optional partitions leave over, so its size is implicit.

use livecopy_error::ValidationError;
use std::fmt;
use std::path::Path;

pub const MIB: u64 = 1024 * 1024;

/// Smallest exchange or persistence partition worth creating.
pub const MIN_PARTITION_BYTES: u64 = 200 * MIB;

/// Space in front of the first partition: MBR plus alignment, as sfdisk
/// starts a DOS label at sector 2048.
pub const PARTITION_TABLE_RESERVE: u64 = MIB;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LayoutClass {
    TooSmall,
    SystemOnly,
    SystemPlusPersistence,
    SystemPlusExchangePlusPersistence,
}

impl LayoutClass {
    pub fn tag(&self) -> &'static str {
        match self {
            LayoutClass::TooSmall => "TOO_SMALL",
            LayoutClass::SystemOnly => "ONLY_SYSTEM",
            LayoutClass::SystemPlusPersistence => "PERSISTENT",
            LayoutClass::SystemPlusExchangePlusPersistence => "EXCHANGE",
        }
    }
}

impl fmt::Display for LayoutClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionLayout {
    pub class: LayoutClass,
    pub exchange_size_bytes: u64,
    pub persistence_size_bytes: u64,
}

impl PartitionLayout {
    pub fn has_exchange(&self) -> bool {
        self.exchange_size_bytes > 0
    }

    pub fn has_persistence(&self) -> bool {
        self.persistence_size_bytes > 0
    }

    /// Reject present optional partitions below [`MIN_PARTITION_BYTES`].
    pub fn check_floor(&self, device: &Path) -> Result<(), ValidationError> {
        let parts = [
            ("exchange", self.exchange_size_bytes),
            ("persistence", self.persistence_size_bytes),
        ];
        for (partition, size) in parts {
            if size > 0 && size < MIN_PARTITION_BYTES {
                return Err(ValidationError::PartitionBelowFloor {
                    device: device.to_path_buf(),
                    partition,
                    size,
                    floor: MIN_PARTITION_BYTES,
                });
            }
        }
        Ok(())
    }
}

/// Classify a device by how much room it leaves next to the system.
///
/// Comparisons are strict, so a capacity exactly on a boundary gets the
/// smaller class.
pub fn classify(device_size: u64, system_size: u64) -> LayoutClass {
    if device_size > system_size.saturating_add(MIN_PARTITION_BYTES.saturating_mul(2)) {
        LayoutClass::SystemPlusExchangePlusPersistence
    } else if device_size > system_size.saturating_add(MIN_PARTITION_BYTES) {
        LayoutClass::SystemPlusPersistence
    } else if device_size > system_size {
        LayoutClass::SystemOnly
    } else {
        LayoutClass::TooSmall
    }
}

/// Split `overhead` (device size minus system size) between exchange and
/// persistence. Exchange and persistence always add up to the overhead for
/// the exchange class.
pub fn derive(class: LayoutClass, overhead: u64, requested_exchange: u64) -> PartitionLayout {
    let (exchange, persistence) = match class {
        LayoutClass::SystemPlusExchangePlusPersistence => {
            let exchange = requested_exchange.min(overhead);
            (exchange, overhead - exchange)
        }
        LayoutClass::SystemPlusPersistence => (0, overhead),
        LayoutClass::SystemOnly | LayoutClass::TooSmall => (0, 0),
    };
    PartitionLayout {
        class,
        exchange_size_bytes: exchange,
        persistence_size_bytes: persistence,
    }
}

/// Plan a device of `device_size` bytes.
///
/// The partition table reserve comes off the device first, and the optional
/// partitions are cut down to whole MiB, so the system partition always gets
/// at least `system_size`.
pub fn plan(device_size: u64, system_size: u64, requested_exchange: u64) -> PartitionLayout {
    let usable = device_size.saturating_sub(PARTITION_TABLE_RESERVE);
    let class = classify(usable, system_size);
    let mut layout = derive(class, usable.saturating_sub(system_size), requested_exchange);
    layout.exchange_size_bytes -= layout.exchange_size_bytes % MIB;
    layout.persistence_size_bytes -= layout.persistence_size_bytes % MIB;
    layout
}

#[cfg(test)]
mod tests {
    use super::*;

    const GIB: u64 = 1024 * MIB;

    #[test]
    fn classify_boundaries_resolve_to_smaller_class() {
        let system = GIB;
        assert_eq!(classify(system, system), LayoutClass::TooSmall);
        assert_eq!(classify(system + 1, system), LayoutClass::SystemOnly);
        assert_eq!(
            classify(system + MIN_PARTITION_BYTES, system),
            LayoutClass::SystemOnly
        );
        assert_eq!(
            classify(system + MIN_PARTITION_BYTES + 1, system),
            LayoutClass::SystemPlusPersistence
        );
        assert_eq!(
            classify(system + 2 * MIN_PARTITION_BYTES, system),
            LayoutClass::SystemPlusPersistence
        );
        assert_eq!(
            classify(system + 2 * MIN_PARTITION_BYTES + 1, system),
            LayoutClass::SystemPlusExchangePlusPersistence
        );
    }

    #[test]
    fn classify_does_not_overflow() {
        assert_eq!(classify(u64::MAX, u64::MAX - 1), LayoutClass::SystemOnly);
        assert_eq!(classify(u64::MAX, u64::MAX), LayoutClass::TooSmall);
        assert_eq!(classify(0, 0), LayoutClass::TooSmall);
    }

    #[test]
    fn classify_is_monotonic_in_device_size() {
        let system = 3 * GIB;
        let mut last = LayoutClass::TooSmall;
        for step in 0..64u64 {
            let class = classify(step * 64 * MIB, system);
            assert!(class >= last);
            last = class;
        }
        assert_eq!(last, LayoutClass::SystemPlusExchangePlusPersistence);
    }

    #[test]
    fn derive_exchange_split_sums_to_overhead() {
        let overhead = 5 * GIB;
        for requested in [0, 1, MIN_PARTITION_BYTES, 2 * GIB, overhead, overhead + 1, u64::MAX] {
            let layout = derive(
                LayoutClass::SystemPlusExchangePlusPersistence,
                overhead,
                requested,
            );
            assert_eq!(
                layout.exchange_size_bytes + layout.persistence_size_bytes,
                overhead
            );
        }
    }

    #[test]
    fn derive_edge_requests_drop_one_partition() {
        let overhead = 2 * GIB;
        let all_exchange = derive(
            LayoutClass::SystemPlusExchangePlusPersistence,
            overhead,
            overhead,
        );
        assert!(all_exchange.has_exchange());
        assert!(!all_exchange.has_persistence());

        let no_exchange = derive(LayoutClass::SystemPlusExchangePlusPersistence, overhead, 0);
        assert!(!no_exchange.has_exchange());
        assert_eq!(no_exchange.persistence_size_bytes, overhead);
    }

    #[test]
    fn derive_persistent_and_small_classes() {
        let persistent = derive(LayoutClass::SystemPlusPersistence, 300 * MIB, GIB);
        assert_eq!(persistent.exchange_size_bytes, 0);
        assert_eq!(persistent.persistence_size_bytes, 300 * MIB);

        let only = derive(LayoutClass::SystemOnly, 100 * MIB, GIB);
        assert!(!only.has_exchange() && !only.has_persistence());
    }

    #[test]
    fn system_plus_500_mib_without_exchange_request_has_no_exchange() {
        let layout = plan(GIB + 500 * MIB, GIB, 0);
        // 499 MiB left after the reserve is above two floors.
        assert_eq!(layout.class, LayoutClass::SystemPlusExchangePlusPersistence);
        assert!(!layout.has_exchange());
        assert_eq!(layout.persistence_size_bytes, 499 * MIB);
    }

    #[test]
    fn system_partition_keeps_full_size_after_reserve() {
        let cases = [
            (4 * GIB, GIB, 0),
            (4 * GIB, GIB, GIB),
            (GIB + 500 * MIB, GIB, 0),
            (8 * GIB + 12345, 2 * GIB + 777, 1000 * MIB + 3),
            (GIB + 150 * MIB, GIB, 0),
        ];
        for (device, system, requested) in cases {
            let layout = plan(device, system, requested);
            let optional = layout.exchange_size_bytes + layout.persistence_size_bytes;
            assert_eq!(layout.exchange_size_bytes % MIB, 0);
            assert_eq!(layout.persistence_size_bytes % MIB, 0);
            assert!(
                optional + PARTITION_TABLE_RESERVE + system <= device,
                "{device} {system} {requested}: {layout:?}"
            );
        }
    }

    #[test]
    fn reserve_can_make_a_device_too_small() {
        assert_eq!(plan(GIB + MIB, GIB, 0).class, LayoutClass::TooSmall);
        assert_eq!(plan(GIB + MIB + 1, GIB, 0).class, LayoutClass::SystemOnly);
    }

    #[test]
    fn check_floor_rejects_tiny_persistence() {
        let layout = derive(
            LayoutClass::SystemPlusExchangePlusPersistence,
            GIB,
            GIB - 10 * MIB,
        );
        let err = layout.check_floor(Path::new("/dev/sdb")).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::PartitionBelowFloor {
                partition: "persistence",
                ..
            }
        ));
        assert!(plan(8 * GIB, 2 * GIB, GIB)
            .check_floor(Path::new("/dev/sdb"))
            .is_ok());
    }
}
