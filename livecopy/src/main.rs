use anyhow::Context;
use clap::Parser;
use livecopy_hal::LinuxHal;
use livecopy_workflow::ProvisioningOptions;

mod cli;
mod commands;
mod confirm;
mod logging;
mod progress;

fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();
    logging::init();

    let mut options = ProvisioningOptions::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    cli::apply_overrides(&mut options, &cli);
    if options.dry_run {
        log::info!("🧪 Dry run: destructive commands are only logged");
    }

    let hal = LinuxHal::new();
    match &cli.command {
        cli::Command::List { all } => commands::list(&hal, options, *all)?,
        cli::Command::Install {
            devices,
            yes_i_know,
            ..
        } => commands::install(&hal, options, devices, *yes_i_know)?,
        cli::Command::Iso { output, label } => {
            commands::iso(&hal, options, output, label.as_deref())?
        }
    }
    Ok(())
}
