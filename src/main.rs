//! Tactus CLI - Dual-Layer Timing Engine
//!
//! Command-line interface for the Tactus timing engine.

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tactus::cli::{Cli, Commands, GenerateOptions};
use tactus::TactusError;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logger
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("Tactus v{}", env!("CARGO_PKG_VERSION"));

    let result = match cli.command {
        Some(cmd) => handle_command(cmd),
        None => {
            println!("Tactus v{}", env!("CARGO_PKG_VERSION"));
            println!("Use --help for available commands");
            Ok(())
        }
    };

    if let Err(e) = &result {
        if let Some(err) = e.downcast_ref::<TactusError>() {
            for line in tactus::cli::commands::failure_report(err) {
                error!("{}", line);
            }
        }
    }
    result
}

fn handle_command(cmd: Commands) -> anyhow::Result<()> {
    match cmd {
        Commands::Generate {
            out,
            config,
            seed,
            bpm,
            ppq,
            sections,
            log,
        } => {
            let options = GenerateOptions {
                config,
                seed,
                bpm,
                ppq,
                sections,
                log,
            };
            let report = tactus::cli::commands::generate(&out, &options)
                .with_context(|| format!("generating into {}", out.display()))?;
            if !report.is_clean() {
                anyhow::bail!("generated run failed its audit with {} error(s)", report.error_count());
            }
            Ok(())
        }
        Commands::Audit {
            dir,
            phrase_tolerance,
            track_tolerance,
        } => {
            let report = tactus::cli::commands::audit(&dir, phrase_tolerance, track_tolerance)
                .with_context(|| format!("auditing {}", dir.display()))?;
            if !report.is_clean() {
                anyhow::bail!("audit found {} error(s)", report.error_count());
            }
            Ok(())
        }
        Commands::Timing { bpm, ppq, meter } => {
            tactus::cli::commands::timing(bpm, ppq, &meter).context("computing timing rates")
        }
    }
}
