//! Timing Module
//!
//! Meter spoofing, per-layer timing cursors and cross-layer alignment:
//! - `TimingCalculator`: pure rate math for one measure
//! - `TimingContext` / `AmbientTiming`: saved and active cursors
//! - `resolve_alignment`: measure counts that keep both layers' phrases equal in seconds

pub mod alignment;
pub mod calculator;
pub mod context;
mod format;

pub use alignment::{find_measure_counts, resolve_alignment, AlignmentConfig, PhraseAlignment};
pub use calculator::{Meter, TimingCalculator, TimingRates};
pub use context::{AmbientTiming, InitialTiming, TimingContext, DEFAULT_PPQ};
pub use format::format_time;
