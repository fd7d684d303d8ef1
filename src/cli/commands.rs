//! CLI Command Implementations
//!
//! Implements the actual logic for each CLI command.

use std::path::Path;

use tracing::{info, warn};

use super::GenerateOptions;
use crate::config::{AuditTolerances, CountRange, EngineConfig};
use crate::engine::Engine;
use crate::error::{Result, TactusError};
use crate::hierarchy::{audit_dir, AuditReport};
use crate::timing::{Meter, TimingCalculator};

/// Merge the config file (if any) with command-line overrides
pub fn resolve_config(options: &GenerateOptions) -> Result<EngineConfig> {
    let mut config = match &options.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            EngineConfig::load(path)?
        }
        None => EngineConfig::default(),
    };

    if let Some(seed) = options.seed {
        config.seed = seed;
    }
    if let Some(bpm) = options.bpm {
        config.bpm = bpm;
    }
    if let Some(ppq) = options.ppq {
        config.ppq = ppq;
    }
    if let Some(sections) = options.sections {
        config.sections = CountRange::new(sections, sections);
    }
    if let Some(log) = &options.log {
        config.log = log.clone();
    }
    config.validate()?;
    Ok(config)
}

/// Compose, export, and self-audit a run.
pub fn generate(out: &Path, options: &GenerateOptions) -> Result<AuditReport> {
    let config = resolve_config(options)?;
    info!(
        "Generating at {} BPM, {} PPQ, seed {}",
        config.bpm, config.ppq, config.seed
    );

    let mut engine = Engine::new(config)?;
    let summary = engine.run()?;
    let export = engine.export(out)?;

    println!("Run {} written to {}", export.run_id, out.display());
    println!(
        "Sections: {}  Phrases: {}  Units: {}  Alignment fallbacks: {}",
        summary.sections, summary.phrases, summary.units, summary.fallbacks
    );
    for track in &summary.tracks {
        println!(
            "  {:<8} {:>10} ticks  {:>10.4}s  {} events",
            track.layer, track.end_tick, track.end_time, track.event_count
        );
    }

    let report = engine.audit();
    if !report.is_clean() {
        warn!("Self-audit found {} error(s)", report.error_count());
    }
    Ok(report)
}

/// Audit an exported run and print the report as JSON.
pub fn audit(
    dir: &Path,
    phrase_tolerance: Option<f64>,
    track_tolerance: Option<f64>,
) -> Result<AuditReport> {
    info!("Auditing {}", dir.display());

    let mut tolerances = AuditTolerances::default();
    if let Some(secs) = phrase_tolerance {
        tolerances.phrase_secs = secs;
    }
    if let Some(secs) = track_tolerance {
        tolerances.track_secs = secs;
    }
    tolerances.validate()?;

    let report = audit_dir(dir, &tolerances)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(report)
}

/// Print the spoofed-meter rates for one meter as JSON.
pub fn timing(bpm: f64, ppq: u32, meter: &str) -> Result<()> {
    let meter: Meter = meter.parse()?;
    let rates = TimingCalculator::compute(bpm, ppq, meter)?;
    println!("{}", serde_json::to_string_pretty(&rates)?);
    Ok(())
}

/// Error code, retry hint and recovery suggestions for a failed command
pub fn failure_report(err: &TactusError) -> Vec<String> {
    let mut lines = vec![format!("[{}] {}", err.error_code(), err)];
    if err.is_recoverable() {
        lines.push("Fix the input and run the command again".to_string());
    }
    lines.extend(err.recovery_suggestions().into_iter().map(|s| format!("  - {}", s)));
    lines
}
