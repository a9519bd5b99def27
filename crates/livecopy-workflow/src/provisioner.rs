//! Device preparation: swap, unmount, partition table, format.

use crate::config::{ProvisioningOptions, SwapPolicy};
use crate::planner::{PartitionLayout, MIB};
use crate::progress::{Phase, ProgressReporter};
use crate::safety::{ArmToken, ConfirmRequest, Confirmer};
use livecopy_error::{DestructiveStep, HalResult, ProvisionError, ProvisionResult};
use livecopy_hal::procfs::meminfo::{parse_mem_available_kb, parse_swap_free_kb};
use livecopy_hal::procfs::mountinfo::{parse_mountinfo, source_for_path};
use livecopy_hal::procfs::swaps::{parse_swaps, SwapEntry};
use livecopy_hal::{StorageDevice, SystemHal};
use std::path::{Path, PathBuf};
use std::thread;

/// Deactivating swap must leave at least this much memory without asking.
pub const LOW_MEMORY_BYTES: u64 = 300 * MIB;

/// Partition device paths for one layout: exchange first, then
/// persistence, system last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionPaths {
    pub exchange: Option<PathBuf>,
    pub persistence: Option<PathBuf>,
    pub system: PathBuf,
}

impl PartitionPaths {
    pub fn for_layout(device: &StorageDevice, layout: &PartitionLayout) -> Self {
        let mut next = 1;
        let mut take = |present: bool| {
            present.then(|| {
                let path = device.partition_path(next);
                next += 1;
                path
            })
        };
        let exchange = take(layout.has_exchange());
        let persistence = take(layout.has_persistence());
        Self {
            exchange,
            persistence,
            system: device.partition_path(next),
        }
    }
}

/// `sfdisk` input for `layout`.
pub fn partition_script(layout: &PartitionLayout) -> String {
    let mut script = String::from("label: dos\n\n");
    if layout.has_exchange() {
        // W95 FAT32 (LBA)
        script.push_str(&format!(
            "size={}MiB, type=c\n",
            layout.exchange_size_bytes / MIB
        ));
    }
    if layout.has_persistence() {
        script.push_str(&format!(
            "size={}MiB, type=83\n",
            layout.persistence_size_bytes / MIB
        ));
    }
    script.push_str("type=c, bootable\n");
    script
}

/// Memory left once `swap` is off: its used pages move into RAM and its
/// free pages stop counting.
pub fn free_after_swapoff(meminfo: &str, swap: &SwapEntry) -> u64 {
    let available_kb = parse_mem_available_kb(meminfo).unwrap_or(0);
    available_kb
        .saturating_add(parse_swap_free_kb(meminfo))
        .saturating_sub(swap.size_kb)
        .saturating_mul(1024)
}

/// Active swap areas living on `device`, including swap files on its
/// mounted partitions.
pub fn swaps_on_device<H: SystemHal + ?Sized>(
    hal: &H,
    device: &StorageDevice,
) -> HalResult<Vec<SwapEntry>> {
    let swaps = parse_swaps(&hal.proc_swaps()?);
    if swaps.is_empty() {
        return Ok(swaps);
    }
    let mounts = parse_mountinfo(&hal.proc_mountinfo()?);
    Ok(swaps
        .into_iter()
        .filter(|swap| {
            if swap.is_file() {
                source_for_path(&mounts, &swap.path)
                    .is_some_and(|src| device.owns(Path::new(src)))
            } else {
                device.owns(&swap.path)
            }
        })
        .collect())
}

fn deactivate_swaps<H: SystemHal + ?Sized>(
    hal: &H,
    device: &StorageDevice,
    options: &ProvisioningOptions,
    confirmer: &dyn Confirmer,
) -> ProvisionResult<()> {
    let step = |e| ProvisionError::step(&device.path, DestructiveStep::SwapOff, e);
    for swap in swaps_on_device(hal, device).map_err(step)? {
        let meminfo = hal.proc_meminfo().map_err(step)?;
        let free_after = free_after_swapoff(&meminfo, &swap);
        if free_after < LOW_MEMORY_BYTES {
            log::warn!(
                "Deactivating {} leaves {} MiB of memory",
                swap.path.display(),
                free_after / MIB
            );
            let allowed = match options.swap_policy {
                SwapPolicy::Allow => true,
                SwapPolicy::Deny => false,
                SwapPolicy::Ask => {
                    let request = ConfirmRequest::LowMemorySwap {
                        swap: swap.path.clone(),
                        free_after_bytes: free_after,
                    };
                    confirmer.confirm(&request).approves(&request)
                }
            };
            if !allowed {
                return Err(ProvisionError::SafetyAbort(format!(
                    "not enough memory to deactivate swap {}",
                    swap.path.display()
                )));
            }
        }
        log::info!("swapoff {} ({})", swap.path.display(), device.path.display());
        hal.swap_off(&swap.path, options.dry_run).map_err(step)?;
    }
    Ok(())
}

fn unmount_partitions<H: SystemHal + ?Sized>(
    hal: &H,
    device: &StorageDevice,
    options: &ProvisioningOptions,
) -> ProvisionResult<()> {
    let step = |e| ProvisionError::step(&device.path, DestructiveStep::Unmount, e);
    for mount_point in hal.mounted_partitions(device).map_err(step)? {
        log::info!(
            "Unmounting {} ({})",
            mount_point.display(),
            device.path.display()
        );
        hal.unmount(&mount_point, options.dry_run).map_err(step)?;
    }
    Ok(())
}

/// Write the partition table, retrying exactly once after the configured
/// delay.
fn write_partition_table<H: SystemHal + ?Sized>(
    hal: &H,
    device: &StorageDevice,
    script: &str,
    options: &ProvisioningOptions,
    token: &ArmToken,
) -> ProvisionResult<()> {
    let opts = token.partition_options(options.dry_run);
    if let Err(err) = hal.write_partition_table(&device.path, script, &opts) {
        let delay = options.timings.repartition_retry_delay();
        log::warn!(
            "Partition table write on {} failed ({}), retrying in {:?}",
            device.path.display(),
            err,
            delay
        );
        thread::sleep(delay);
        hal.write_partition_table(&device.path, script, &opts)
            .map_err(|e| ProvisionError::step(&device.path, DestructiveStep::PartitionTable, e))?;
    }
    Ok(())
}

fn settle<H: SystemHal + ?Sized>(hal: &H, options: &ProvisioningOptions) {
    if let Err(err) = hal.udev_settle() {
        log::warn!("udevadm settle failed: {}", err);
    }
    let delay = options.timings.settle_delay();
    if !options.dry_run && !delay.is_zero() {
        thread::sleep(delay);
    }
}

fn format_partitions<H: SystemHal + ?Sized>(
    hal: &H,
    device: &StorageDevice,
    paths: &PartitionPaths,
    options: &ProvisioningOptions,
    token: &ArmToken,
) -> ProvisionResult<()> {
    let step = |e| ProvisionError::step(&device.path, DestructiveStep::Format, e);
    let opts = token.format_options(options.dry_run);

    if let Some(exchange) = &paths.exchange {
        log::info!("💾 Formatting exchange partition {}", exchange.display());
        hal.format_vfat(exchange, options.exchange_label(), &opts)
            .map_err(step)?;
    }

    if let Some(persistence) = &paths.persistence {
        log::info!("💾 Formatting persistence partition {}", persistence.display());
        let label = options.sources.persistence_label.clone();
        let mkfs = opts.clone().with_args(vec![
            "-F".to_string(),
            "-L".to_string(),
            label,
            "-m".to_string(),
            "0".to_string(),
        ]);
        hal.format_ext4(persistence, &mkfs).map_err(step)?;
        // No periodic fsck and no reserved blocks on removable media.
        let tune = opts.clone().with_args(
            ["-c", "0", "-i", "0", "-m", "0"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        );
        hal.tune_ext(persistence, &tune).map_err(step)?;
    }

    log::info!("💾 Formatting system partition {}", paths.system.display());
    hal.format_vfat(&paths.system, options.system_label(), &opts)
        .map_err(step)?;
    Ok(())
}

/// Prepare `device` for `layout`: deactivate its swap, unmount it, write the
/// partition table and format every partition.
///
/// Every step is a hard gate; only the partition-table write is retried.
pub fn provision<H: SystemHal + ?Sized>(
    hal: &H,
    device: &StorageDevice,
    layout: &PartitionLayout,
    options: &ProvisioningOptions,
    confirmer: &dyn Confirmer,
    progress: &ProgressReporter,
    token: &ArmToken,
) -> ProvisionResult<PartitionPaths> {
    progress.phase_started(Phase::SwapOff);
    deactivate_swaps(hal, device, options, confirmer)?;
    progress.phase_completed(Phase::SwapOff);

    progress.phase_started(Phase::Unmount);
    unmount_partitions(hal, device, options)?;
    progress.phase_completed(Phase::Unmount);

    progress.phase_started(Phase::Partition);
    let script = partition_script(layout);
    log::info!(
        "Partitioning {} as {}:\n{}",
        device.path.display(),
        layout.class,
        script
    );
    write_partition_table(hal, device, &script, options, token)?;
    settle(hal, options);
    progress.phase_completed(Phase::Partition);

    progress.phase_started(Phase::Format);
    let paths = PartitionPaths::for_layout(device, layout);
    format_partitions(hal, device, &paths, options, token)?;
    progress.phase_completed(Phase::Format);

    Ok(paths)
}
