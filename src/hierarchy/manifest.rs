//! Provenance manifest
//!
//! The exported view of the provenance tree: one record per closed unit,
//! keyed by unit hash, plus one summary per track. Audit tooling reads this
//! alongside the exported event streams and never sees the tree itself.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::level::UnitLevel;
use super::tree::ProvenanceTree;
use crate::error::Result;

/// File name of the manifest inside an export directory
pub const MANIFEST_FILE: &str = "units.json";

/// One closed unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitRecord {
    pub unit_hash: String,
    pub layer: String,
    pub unit_type: UnitLevel,
    pub section_index: u32,
    pub path: String,
    pub index: u32,
    #[serde(default)]
    pub parent_hash: Option<String>,
    pub child_count: u32,
    pub start_tick: u64,
    pub end_tick: u64,
    pub start_time: f64,
    pub end_time: f64,
    pub handoff_tick: u64,
}

impl UnitRecord {
    pub fn duration_secs(&self) -> f64 {
        self.end_time - self.start_time
    }

    /// Whether a non-off event at `tick` belongs inside this unit
    pub fn contains(&self, tick: u64) -> bool {
        if self.end_tick > self.start_tick {
            tick >= self.start_tick && tick < self.end_tick
        } else {
            tick == self.start_tick
        }
    }
}

/// Final extent of one layer's track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackSummary {
    pub layer: String,
    pub end_tick: u64,
    pub end_time: f64,
    pub event_count: usize,
}

/// Everything audit tooling needs besides the event streams
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub ppq: u32,
    pub seed: u64,
    pub tracks: Vec<TrackSummary>,
    pub units: Vec<UnitRecord>,
}

impl Manifest {
    /// Collect every closed unit of `tree`, in creation order
    pub fn from_tree(tree: &ProvenanceTree, tracks: Vec<TrackSummary>, ppq: u32, seed: u64) -> Self {
        let units = tree
            .iter()
            .filter(|node| node.is_closed())
            .filter_map(|node| {
                let unit_hash = node.unit_hash.clone()?;
                let handoff_tick = node.handoff_tick?;
                let parent_hash = node
                    .parent
                    .and_then(|p| tree.get(p))
                    .and_then(|p| p.unit_hash.clone());
                Some(UnitRecord {
                    unit_hash,
                    layer: node.layer.clone(),
                    unit_type: node.level,
                    section_index: node.section_index,
                    path: node.path.clone(),
                    index: node.index,
                    parent_hash,
                    child_count: node.child_count,
                    start_tick: node.start_tick_rounded(),
                    end_tick: node.end_tick_rounded(),
                    start_time: node.start_time,
                    end_time: node.end_time,
                    handoff_tick,
                })
            })
            .collect();

        Self {
            run_id: Uuid::new_v4().to_string(),
            generated_at: Utc::now(),
            ppq,
            seed,
            tracks,
            units,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Records grouped by hash; more than one entry per hash is a defect
    pub fn by_hash(&self) -> HashMap<&str, Vec<&UnitRecord>> {
        let mut map: HashMap<&str, Vec<&UnitRecord>> = HashMap::new();
        for unit in &self.units {
            map.entry(unit.unit_hash.as_str()).or_default().push(unit);
        }
        map
    }

    pub fn track(&self, layer: &str) -> Option<&TrackSummary> {
        self.tracks.iter().find(|t| t.layer == layer)
    }

    /// Units of one layer at one level, in manifest order
    pub fn units_at<'a>(&'a self, layer: &'a str, level: UnitLevel) -> impl Iterator<Item = &'a UnitRecord> {
        self.units
            .iter()
            .filter(move |u| u.layer == layer && u.unit_type == level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::tree::NewUnit;
    use pretty_assertions::assert_eq;
    use serde_json::Value;
    use tempfile::tempdir;

    fn tree() -> ProvenanceTree {
        let mut tree = ProvenanceTree::new();
        let section = tree.open(
            "primary",
            None,
            NewUnit {
                level: UnitLevel::Section,
                index: 0,
                child_count: 1,
                start_tick: 0.0,
                end_tick: 0.0,
                start_time: 0.0,
                end_time: 0.0,
            },
        );
        let phrase = tree.open(
            "primary",
            Some(section),
            NewUnit {
                level: UnitLevel::Phrase,
                index: 0,
                child_count: 1,
                start_tick: 0.0,
                end_tick: 1920.0,
                start_time: 0.0,
                end_time: 2.0,
            },
        );
        tree.close(phrase);
        tree
    }

    #[test]
    fn test_only_closed_units_are_listed() {
        let manifest = Manifest::from_tree(&tree(), vec![], 480, 7);
        assert_eq!(manifest.units.len(), 1);
        let unit = &manifest.units[0];
        assert_eq!(unit.unit_type, UnitLevel::Phrase);
        assert_eq!(unit.end_tick, 1920);
        assert_eq!(unit.handoff_tick, 1919);
        // parent section is still open, so it has no hash yet
        assert_eq!(unit.parent_hash, None);
    }

    #[test]
    fn test_json_field_names() {
        let manifest = Manifest::from_tree(&tree(), vec![], 480, 7);
        let value = serde_json::to_value(&manifest).unwrap();
        let unit = &value["units"][0];
        for key in ["unitHash", "layer", "unitType", "sectionIndex", "startTick", "endTick"] {
            assert!(unit.get(key).is_some(), "missing {}", key);
        }
        assert_eq!(unit["unitType"], Value::from("phrase"));
        assert!(value.get("runId").is_some());
    }

    #[test]
    fn test_save_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(MANIFEST_FILE);
        let manifest = Manifest::from_tree(
            &tree(),
            vec![TrackSummary {
                layer: "primary".into(),
                end_tick: 1920,
                end_time: 2.0,
                event_count: 3,
            }],
            480,
            7,
        );
        manifest.save(&path).unwrap();
        assert_eq!(Manifest::load(&path).unwrap(), manifest);
    }

    #[test]
    fn test_contains() {
        let mut unit = Manifest::from_tree(&tree(), vec![], 480, 0).units.remove(0);
        assert!(unit.contains(0));
        assert!(unit.contains(1919));
        assert!(!unit.contains(1920));
        unit.end_tick = unit.start_tick;
        assert!(unit.contains(0));
        assert!(!unit.contains(1));
    }
}
