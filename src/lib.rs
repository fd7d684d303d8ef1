//! Tactus - Dual-Layer Polymetric Timing Engine
//!
//! Tactus keeps two independently metered layers of a generated piece in
//! exact wall-clock step while each layer exports a MIDI-legal (spoofed)
//! time signature, and proves afterwards that its nested timing units have
//! no gaps, overlaps or orphaned events.
//!
//! # Architecture
//!
//! - `timing`: meter spoofing, per-layer cursors, cross-layer alignment
//! - `layers`: event buffers and the layer manager owning ambient timing
//! - `hierarchy`: unit timing over seven levels, provenance tree, manifest, audit
//! - `composer`: meter provider and performer seams
//! - `engine`: the section/phrase driver and export

pub mod cli;
pub mod composer;
pub mod config;
pub mod engine;
pub mod error;
pub mod hierarchy;
pub mod layers;
pub mod timing;

pub use error::{Result, TactusError};
