//! Hierarchy Module
//!
//! Section → phrase → measure → beat → division → subdivision →
//! subsubdivision units, their provenance, and the post-run audit.

pub mod audit;
mod level;
pub mod manifest;
mod tree;
mod unit_timing;

pub use audit::{audit, audit_dir, AuditReport, Finding, FindingKind, Severity, EVENTS_SUFFIX};
pub use level::{LogFilter, UnitLevel};
pub use manifest::{Manifest, TrackSummary, UnitRecord, MANIFEST_FILE};
pub use tree::{handoff_tick, round_tick, unit_hash, NewUnit, NodeId, ProvenanceTree, UnitNode, UnitState};
pub use unit_timing::{marker_text, UnitTimer};
