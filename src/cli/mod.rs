//! CLI Module
//!
//! Command-line interface for the Tactus timing engine.

pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Tactus - dual-layer polymetric timing engine
#[derive(Parser, Debug)]
#[command(name = "tactus")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compose a piece and export its event streams and manifest
    #[command(name = "generate")]
    Generate {
        /// Output directory
        #[arg(short, long)]
        out: PathBuf,

        /// JSON configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Random seed
        #[arg(long)]
        seed: Option<u64>,

        /// Base tempo in beats per minute
        #[arg(long)]
        bpm: Option<f64>,

        /// Ticks per quarter note
        #[arg(long)]
        ppq: Option<u32>,

        /// Exact number of sections
        #[arg(long)]
        sections: Option<u32>,

        /// Marker filter: none, all, or e.g. "section,phrase,measure"
        #[arg(long)]
        log: Option<String>,
    },

    /// Audit an exported run
    #[command(name = "audit")]
    Audit {
        /// Directory written by `generate`
        dir: PathBuf,

        /// Cross-layer phrase/section tolerance in seconds
        #[arg(long)]
        phrase_tolerance: Option<f64>,

        /// Cross-layer track length tolerance in seconds
        #[arg(long)]
        track_tolerance: Option<f64>,
    },

    /// Print spoofed-meter rates for one meter
    #[command(name = "timing")]
    Timing {
        #[arg(long, default_value_t = crate::config::DEFAULT_BPM)]
        bpm: f64,

        #[arg(long, default_value_t = crate::timing::DEFAULT_PPQ)]
        ppq: u32,

        /// Meter as n/d, e.g. 7/5
        #[arg(long, default_value = "4/4")]
        meter: String,
    },
}

/// Overrides for `generate` taken from the command line
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub config: Option<PathBuf>,
    pub seed: Option<u64>,
    pub bpm: Option<f64>,
    pub ppq: Option<u32>,
    pub sections: Option<u32>,
    pub log: Option<String>,
}
