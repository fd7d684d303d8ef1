//! Post-run audit
//!
//! Works only from the exported manifest and event streams. Every problem
//! is reported as a [`Finding`]; nothing here returns an error for bad data.

use std::collections::HashMap;
use std::path::Path;

use serde::Serialize;
use walkdir::WalkDir;

use super::level::UnitLevel;
use super::manifest::{Manifest, UnitRecord, MANIFEST_FILE};
use super::tree::handoff_tick;
use crate::config::AuditTolerances;
use crate::error::Result;
use crate::layers::{EventKind, EventStream};

/// Suffix of exported event stream files
pub const EVENTS_SUFFIX: &str = ".events.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    SiblingGap,
    SiblingOverlap,
    SiblingOrder,
    OutsideParent,
    EventOutsideUnit,
    UnknownUnit,
    DuplicateUnit,
    MissingHandoff,
    HandoffMismatch,
    PhraseDrift,
    SectionDrift,
    TrackLengthDrift,
    TimeDomainDrift,
    LayerMismatch,
}

impl FindingKind {
    pub fn severity(self) -> Severity {
        match self {
            FindingKind::TimeDomainDrift => Severity::Warning,
            _ => Severity::Error,
        }
    }
}

/// One audit problem
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
    pub kind: FindingKind,
    pub severity: Severity,
    pub layer: Option<String>,
    pub unit_hash: Option<String>,
    pub message: String,
}

/// Result of an audit pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AuditReport {
    pub units_checked: usize,
    pub events_checked: usize,
    pub handoffs_checked: usize,
    pub findings: Vec<Finding>,
}

impl AuditReport {
    pub fn error_count(&self) -> usize {
        self.findings
            .iter()
            .filter(|f| f.severity == Severity::Error)
            .count()
    }

    pub fn warning_count(&self) -> usize {
        self.findings.len() - self.error_count()
    }

    /// No errors (warnings allowed)
    pub fn is_clean(&self) -> bool {
        self.error_count() == 0
    }

    pub fn count(&self, kind: FindingKind) -> usize {
        self.findings.iter().filter(|f| f.kind == kind).count()
    }

    fn push(&mut self, kind: FindingKind, layer: Option<&str>, unit: Option<&str>, message: String) {
        self.findings.push(Finding {
            kind,
            severity: kind.severity(),
            layer: layer.map(str::to_string),
            unit_hash: unit.map(str::to_string),
            message,
        });
    }
}

/// Read `units.json` and every `*.events.json` under `dir`, then audit them
pub fn audit_dir(dir: &Path, tolerances: &AuditTolerances) -> Result<AuditReport> {
    let manifest = Manifest::load(&dir.join(MANIFEST_FILE))?;

    let mut streams = Vec::new();
    for entry in WalkDir::new(dir).max_depth(1).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::from)?;
        let is_stream = entry
            .file_name()
            .to_str()
            .map(|name| name.ends_with(EVENTS_SUFFIX))
            .unwrap_or(false);
        if entry.file_type().is_file() && is_stream {
            tracing::debug!("Reading {}", entry.path().display());
            streams.push(EventStream::load(entry.path())?);
        }
    }
    if streams.is_empty() {
        tracing::warn!("No event streams found in {}", dir.display());
    }

    Ok(audit(&manifest, &streams, tolerances))
}

/// Run every check against an in-memory manifest and its streams
pub fn audit(manifest: &Manifest, streams: &[EventStream], tolerances: &AuditTolerances) -> AuditReport {
    let mut report = AuditReport {
        units_checked: manifest.units.len(),
        ..Default::default()
    };
    let by_hash = manifest.by_hash();

    check_duplicates(&by_hash, &mut report);
    check_siblings(manifest, &mut report);
    check_events(&by_hash, streams, &mut report);
    check_handoffs(manifest, &by_hash, streams, &mut report);
    check_cross_layer(manifest, tolerances, &mut report);
    check_time_domain(manifest, tolerances, &mut report);

    tracing::info!(
        "Audited {} units, {} events: {} error(s), {} warning(s)",
        report.units_checked,
        report.events_checked,
        report.error_count(),
        report.warning_count()
    );
    report
}

fn check_duplicates(by_hash: &HashMap<&str, Vec<&UnitRecord>>, report: &mut AuditReport) {
    for (hash, records) in by_hash {
        if records.len() > 1 {
            report.push(
                FindingKind::DuplicateUnit,
                Some(records[0].layer.as_str()),
                Some(*hash),
                format!("unit hash appears {} times in the manifest", records.len()),
            );
        }
    }
}

/// Siblings share a layer and parent; they must be indexed 0.. and abut
fn check_siblings(manifest: &Manifest, report: &mut AuditReport) {
    let mut groups: HashMap<(&str, Option<&str>), Vec<&UnitRecord>> = HashMap::new();
    for unit in &manifest.units {
        groups
            .entry((unit.layer.as_str(), unit.parent_hash.as_deref()))
            .or_default()
            .push(unit);
    }
    let parents = manifest.by_hash();

    for ((layer, parent_hash), mut siblings) in groups {
        siblings.sort_by_key(|u| u.index);
        for (position, unit) in siblings.iter().enumerate() {
            if unit.index as usize != position {
                report.push(
                    FindingKind::SiblingOrder,
                    Some(layer),
                    Some(unit.unit_hash.as_str()),
                    format!("{} has index {} at position {}", unit.path, unit.index, position),
                );
            }
        }
        for pair in siblings.windows(2) {
            let (prev, next) = (pair[0], pair[1]);
            if prev.end_tick < next.start_tick {
                report.push(
                    FindingKind::SiblingGap,
                    Some(layer),
                    Some(next.unit_hash.as_str()),
                    format!(
                        "gap of {} ticks before {}",
                        next.start_tick - prev.end_tick,
                        next.path
                    ),
                );
            } else if prev.end_tick > next.start_tick {
                report.push(
                    FindingKind::SiblingOverlap,
                    Some(layer),
                    Some(next.unit_hash.as_str()),
                    format!(
                        "{} overlaps {} by {} ticks",
                        next.path,
                        prev.path,
                        prev.end_tick - next.start_tick
                    ),
                );
            }
        }

        let Some(parent) = parent_hash
            .and_then(|h| parents.get(h))
            .and_then(|records| records.first())
        else {
            continue;
        };
        for unit in &siblings {
            if unit.start_tick < parent.start_tick || unit.end_tick > parent.end_tick {
                report.push(
                    FindingKind::OutsideParent,
                    Some(layer),
                    Some(unit.unit_hash.as_str()),
                    format!(
                        "{} [{}, {}) escapes {} [{}, {})",
                        unit.path,
                        unit.start_tick,
                        unit.end_tick,
                        parent.path,
                        parent.start_tick,
                        parent.end_tick
                    ),
                );
            }
        }
    }
}

/// Every bound, non-exempt event lies inside its unit's `[start, end)`
fn check_events(
    by_hash: &HashMap<&str, Vec<&UnitRecord>>,
    streams: &[EventStream],
    report: &mut AuditReport,
) {
    for stream in streams {
        for event in &stream.events {
            report.events_checked += 1;
            let Some(hash) = event.unit_hash.as_deref() else {
                continue;
            };
            let Some(unit) = by_hash.get(hash).and_then(|r| r.first()) else {
                report.push(
                    FindingKind::UnknownUnit,
                    Some(stream.layer.as_str()),
                    Some(hash),
                    format!("event at tick {} names an unknown unit", event.tick),
                );
                continue;
            };
            if unit.layer != stream.layer {
                report.push(
                    FindingKind::LayerMismatch,
                    Some(stream.layer.as_str()),
                    Some(hash),
                    format!("event belongs to a unit of layer '{}'", unit.layer),
                );
                continue;
            }
            if event.kind.is_off() {
                if event.tick < unit.start_tick {
                    report.push(
                        FindingKind::EventOutsideUnit,
                        Some(stream.layer.as_str()),
                        Some(hash),
                        format!("off event at tick {} precedes {}", event.tick, unit.path),
                    );
                }
                continue;
            }
            if event.kind.is_containment_exempt() {
                continue;
            }
            if !unit.contains(event.tick) {
                report.push(
                    FindingKind::EventOutsideUnit,
                    Some(stream.layer.as_str()),
                    Some(hash),
                    format!(
                        "event at tick {} outside {} [{}, {})",
                        event.tick, unit.path, unit.start_tick, unit.end_tick
                    ),
                );
            }
        }
    }
}

/// Handoffs and manifest records correspond one to one
fn check_handoffs(
    manifest: &Manifest,
    by_hash: &HashMap<&str, Vec<&UnitRecord>>,
    streams: &[EventStream],
    report: &mut AuditReport,
) {
    let mut seen: HashMap<(&str, &str), usize> = HashMap::new();
    for stream in streams {
        for event in stream.events.iter().filter(|e| e.kind == EventKind::UnitHandoff) {
            report.handoffs_checked += 1;
            let Some(hash) = event.unit_hash.as_deref() else {
                report.push(
                    FindingKind::HandoffMismatch,
                    Some(stream.layer.as_str()),
                    None,
                    format!("handoff at tick {} carries no unit hash", event.tick),
                );
                continue;
            };
            *seen.entry((stream.layer.as_str(), hash)).or_default() += 1;

            // unknown hashes are already reported by the event check
            let Some(unit) = by_hash.get(hash).and_then(|r| r.first()) else {
                continue;
            };
            let expected = handoff_tick(unit.start_tick as f64, unit.end_tick as f64);
            if event.tick != unit.handoff_tick || event.tick != expected {
                report.push(
                    FindingKind::HandoffMismatch,
                    Some(stream.layer.as_str()),
                    Some(hash),
                    format!(
                        "handoff for {} at tick {}, manifest says {} and range implies {}",
                        unit.path, event.tick, unit.handoff_tick, expected
                    ),
                );
            }
        }
    }

    let layers_with_streams: Vec<&str> = streams.iter().map(|s| s.layer.as_str()).collect();
    for unit in &manifest.units {
        if !layers_with_streams.contains(&unit.layer.as_str()) {
            continue;
        }
        match seen.get(&(unit.layer.as_str(), unit.unit_hash.as_str())) {
            None => report.push(
                FindingKind::MissingHandoff,
                Some(unit.layer.as_str()),
                Some(unit.unit_hash.as_str()),
                format!("{} has no handoff event", unit.path),
            ),
            Some(&n) if n > 1 => report.push(
                FindingKind::HandoffMismatch,
                Some(unit.layer.as_str()),
                Some(unit.unit_hash.as_str()),
                format!("{} has {} handoff events", unit.path, n),
            ),
            Some(_) => {}
        }
    }
}

/// Phrase and section boundaries and track lengths agree across layers
fn check_cross_layer(manifest: &Manifest, tolerances: &AuditTolerances, report: &mut AuditReport) {
    let Some(reference) = manifest.tracks.first() else {
        return;
    };

    for other in manifest.tracks.iter().skip(1) {
        for (level, kind) in [
            (UnitLevel::Section, FindingKind::SectionDrift),
            (UnitLevel::Phrase, FindingKind::PhraseDrift),
        ] {
            let mut ours: Vec<&UnitRecord> = manifest.units_at(&reference.layer, level).collect();
            let mut theirs: Vec<&UnitRecord> = manifest.units_at(&other.layer, level).collect();
            ours.sort_by_key(|u| (u.section_index, u.index));
            theirs.sort_by_key(|u| (u.section_index, u.index));

            if ours.len() != theirs.len() {
                report.push(
                    kind,
                    Some(other.layer.as_str()),
                    None,
                    format!(
                        "{} has {} {} units, {} has {}",
                        reference.layer,
                        ours.len(),
                        level,
                        other.layer,
                        theirs.len()
                    ),
                );
            }
            for (a, b) in ours.iter().zip(&theirs) {
                let drift = (a.start_time - b.start_time)
                    .abs()
                    .max((a.end_time - b.end_time).abs());
                if drift > tolerances.phrase_secs {
                    report.push(
                        kind,
                        Some(other.layer.as_str()),
                        Some(b.unit_hash.as_str()),
                        format!(
                            "{} drifts {:.6}s from {} {}",
                            b.path, drift, reference.layer, a.path
                        ),
                    );
                }
            }
        }

        let drift = (reference.end_time - other.end_time).abs();
        if drift > tolerances.track_secs {
            report.push(
                FindingKind::TrackLengthDrift,
                Some(other.layer.as_str()),
                None,
                format!(
                    "track '{}' ends at {:.6}s, '{}' at {:.6}s",
                    other.layer, other.end_time, reference.layer, reference.end_time
                ),
            );
        }
    }
}

/// Child durations recomputed from the parent's seconds and child count.
///
/// Sections are skipped: their phrases are sized by independent meters.
fn check_time_domain(manifest: &Manifest, tolerances: &AuditTolerances, report: &mut AuditReport) {
    let by_hash = manifest.by_hash();
    let mut children: HashMap<&str, Vec<&UnitRecord>> = HashMap::new();
    for unit in &manifest.units {
        if let Some(parent) = unit.parent_hash.as_deref() {
            children.entry(parent).or_default().push(unit);
        }
    }

    for (parent_hash, kids) in children {
        let Some(parent) = by_hash.get(parent_hash).and_then(|r| r.first()) else {
            continue;
        };
        if parent.unit_type == UnitLevel::Section || parent.child_count == 0 {
            continue;
        }
        let expected = parent.duration_secs() / parent.child_count as f64;
        for kid in kids {
            let drift = (kid.duration_secs() - expected).abs();
            if drift > tolerances.time_domain_secs {
                report.push(
                    FindingKind::TimeDomainDrift,
                    Some(kid.layer.as_str()),
                    Some(kid.unit_hash.as_str()),
                    format!(
                        "{} lasts {:.9}s, parent share is {:.9}s",
                        kid.path,
                        kid.duration_secs(),
                        expected
                    ),
                );
            }
        }
    }
}
