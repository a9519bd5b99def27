//! CLI argument parsing for livecopy

use clap::{Parser, Subcommand};
use livecopy_workflow::config::DEFAULT_CONFIG_PATH;
use livecopy_workflow::ProvisioningOptions;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "livecopy")]
#[command(about = "💾 livecopy - copy the running live system to other media")]
#[command(long_about = "💾 livecopy - copy the running live system to other media\n\n\
    Writes the running live system onto USB sticks, SD cards or disks \
    (optionally with exchange and persistence partitions), or repackages it \
    as a bootable ISO image.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH, global = true)]
    pub config: PathBuf,

    /// Run in dry-run mode (destructive commands are only logged)
    #[arg(long, global = true)]
    pub dry_run: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// 🔍 List candidate target devices and the layout each would get
    List {
        /// Include hard disks
        #[arg(long)]
        all: bool,
    },

    /// 💾 Copy the live system onto one or more devices
    Install {
        /// Target device (repeatable, e.g. --device /dev/sdb --device /dev/sdc)
        #[arg(long = "device", required = true)]
        devices: Vec<PathBuf>,

        /// Copy the contents of the running exchange partition
        #[arg(long)]
        copy_exchange: bool,

        /// Copy the running persistence store
        #[arg(long)]
        copy_persistence: bool,

        /// Exchange partition size in MiB (0 = none)
        #[arg(long, value_name = "MiB")]
        exchange_size: Option<u64>,

        /// FAT label of the exchange partition
        #[arg(long)]
        exchange_label: Option<String>,

        /// I understand the selected devices will be erased
        #[arg(long)]
        yes_i_know: bool,
    },

    /// 📀 Repackage the live system as an ISO image
    Iso {
        /// Output image file
        #[arg(long)]
        output: PathBuf,

        /// Volume id (defaults to the system partition label)
        #[arg(long)]
        label: Option<String>,
    },
}

/// Fold command-line flags over the file configuration. Flags only ever
/// switch things on, so an absent flag keeps the file value.
pub fn apply_overrides(options: &mut ProvisioningOptions, cli: &Cli) {
    if cli.dry_run {
        options.dry_run = true;
    }
    if let Command::Install {
        copy_exchange,
        copy_persistence,
        exchange_size,
        exchange_label,
        ..
    } = &cli.command
    {
        options.copy_exchange |= *copy_exchange;
        options.copy_persistence |= *copy_persistence;
        if let Some(mib) = exchange_size {
            options.exchange_size_mib = *mib;
        }
        if let Some(label) = exchange_label {
            options.exchange_label = Some(label.clone());
        }
    }
}
