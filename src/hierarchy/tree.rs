//! Provenance tree
//!
//! An arena of [`UnitNode`]s. Nodes refer to their parent and children by
//! [`NodeId`]; each layer keeps its own list of section roots and a cursor
//! to the most recently opened unit at every level.

use std::collections::HashMap;
use std::ops::Index;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::level::UnitLevel;

/// Stable index of a node in the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

/// Lifecycle of a unit; `Closed` is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitState {
    /// Created, handoff not yet recorded
    Open,
    /// Handoff recorded
    Closed,
}

/// Identity of a unit: first 16 hex digits of SHA-256 over its layer,
/// path and tick range.
pub fn unit_hash(layer: &str, path: &str, start_tick: f64, end_tick: f64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}|{}|{:.6}|{:.6}", layer, path, start_tick, end_tick).as_bytes());
    let digest = hasher.finalize();
    let mut hex = format!("{:x}", digest);
    hex.truncate(16);
    hex
}

/// Tick that carries a unit's handoff: the last tick inside the unit, or
/// its start when the unit is less than two ticks long.
pub fn handoff_tick(start_tick: f64, end_tick: f64) -> u64 {
    let start = round_tick(start_tick);
    let end = round_tick(end_tick);
    end.saturating_sub(1).max(start)
}

/// Fractional tick cursor to an event tick
pub fn round_tick(tick: f64) -> u64 {
    if tick.is_finite() && tick > 0.0 {
        tick.round() as u64
    } else {
        0
    }
}

/// One concrete occurrence of a hierarchy level
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitNode {
    pub id: NodeId,
    pub layer: String,
    pub level: UnitLevel,
    pub parent: Option<NodeId>,
    /// Position among siblings
    pub index: u32,
    /// Number of children this unit will be divided into (0 for leaves)
    pub child_count: u32,
    /// Index of the enclosing section
    pub section_index: u32,
    /// `section/0/phrase/1/...`, excluding the layer
    pub path: String,
    pub start_tick: f64,
    pub end_tick: f64,
    pub start_time: f64,
    pub end_time: f64,
    pub state: UnitState,
    pub unit_hash: Option<String>,
    pub handoff_tick: Option<u64>,
    pub children: Vec<NodeId>,
}

impl UnitNode {
    pub fn start_tick_rounded(&self) -> u64 {
        round_tick(self.start_tick)
    }

    pub fn end_tick_rounded(&self) -> u64 {
        round_tick(self.end_tick)
    }

    pub fn duration_ticks(&self) -> f64 {
        self.end_tick - self.start_tick
    }

    pub fn duration_secs(&self) -> f64 {
        self.end_time - self.start_time
    }

    pub fn is_closed(&self) -> bool {
        self.state == UnitState::Closed
    }

    /// `layer/section/0/...`
    pub fn full_path(&self) -> String {
        format!("{}/{}", self.layer, self.path)
    }
}

/// Range and shape of a unit about to be opened
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NewUnit {
    pub level: UnitLevel,
    pub index: u32,
    pub child_count: u32,
    pub start_tick: f64,
    pub end_tick: f64,
    pub start_time: f64,
    pub end_time: f64,
}

/// Arena of every unit on every layer
#[derive(Debug, Default)]
pub struct ProvenanceTree {
    nodes: Vec<UnitNode>,
    sections: HashMap<String, Vec<NodeId>>,
    cursors: HashMap<String, [Option<NodeId>; 7]>,
}

impl ProvenanceTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an `Open` node under `parent` (or as a section root) and move
    /// the layer's cursor to it. Cursors below its level are cleared.
    ///
    /// Ordering rules are enforced by the caller; this only records.
    pub fn open(&mut self, layer: &str, parent: Option<NodeId>, unit: NewUnit) -> NodeId {
        let id = NodeId(self.nodes.len());
        let (path, section_index) = match parent {
            Some(p) => {
                let parent = &self.nodes[p.0];
                (
                    format!("{}/{}/{}", parent.path, unit.level, unit.index),
                    parent.section_index,
                )
            }
            None => (format!("{}/{}", unit.level, unit.index), unit.index),
        };

        self.nodes.push(UnitNode {
            id,
            layer: layer.to_string(),
            level: unit.level,
            parent,
            index: unit.index,
            child_count: unit.child_count,
            section_index,
            path,
            start_tick: unit.start_tick,
            end_tick: unit.end_tick,
            start_time: unit.start_time,
            end_time: unit.end_time,
            state: UnitState::Open,
            unit_hash: None,
            handoff_tick: None,
            children: Vec::new(),
        });

        match parent {
            Some(p) => self.nodes[p.0].children.push(id),
            None => self.sections.entry(layer.to_string()).or_default().push(id),
        }

        let cursors = self.cursors.entry(layer.to_string()).or_default();
        cursors[unit.level.depth()] = Some(id);
        for slot in cursors.iter_mut().skip(unit.level.depth() + 1) {
            *slot = None;
        }
        id
    }

    /// Finalise the range of an open node (sections learn their end late)
    pub fn set_end(&mut self, id: NodeId, end_tick: f64, end_time: f64) {
        let node = &mut self.nodes[id.0];
        if node.state == UnitState::Open {
            node.end_tick = end_tick;
            node.end_time = end_time;
        }
    }

    /// Hash the node's final range and mark it `Closed`.
    ///
    /// Returns the hash and handoff tick. Closing twice returns the values
    /// recorded the first time.
    pub fn close(&mut self, id: NodeId) -> (String, u64) {
        let node = &mut self.nodes[id.0];
        if let (Some(hash), Some(tick)) = (&node.unit_hash, node.handoff_tick) {
            return (hash.clone(), tick);
        }
        let hash = unit_hash(&node.layer, &node.path, node.start_tick, node.end_tick);
        let tick = handoff_tick(node.start_tick, node.end_tick);
        node.unit_hash = Some(hash.clone());
        node.handoff_tick = Some(tick);
        node.state = UnitState::Closed;
        (hash, tick)
    }

    pub fn get(&self, id: NodeId) -> Option<&UnitNode> {
        self.nodes.get(id.0)
    }

    /// Latest unit opened at `level` on `layer`
    pub fn cursor(&self, layer: &str, level: UnitLevel) -> Option<NodeId> {
        self.cursors.get(layer).and_then(|c| c[level.depth()])
    }

    /// Siblings a new unit at `level` would join
    pub fn siblings(&self, layer: &str, parent: Option<NodeId>) -> &[NodeId] {
        match parent {
            Some(p) => &self.nodes[p.0].children,
            None => self.sections.get(layer).map(Vec::as_slice).unwrap_or(&[]),
        }
    }

    pub fn children(&self, id: NodeId) -> impl Iterator<Item = &UnitNode> {
        self.nodes[id.0].children.iter().map(move |c| &self.nodes[c.0])
    }

    /// Every node in creation order
    pub fn iter(&self) -> impl Iterator<Item = &UnitNode> {
        self.nodes.iter()
    }

    /// Nodes of one layer at one level, in creation order
    pub fn at_level<'a>(&'a self, layer: &'a str, level: UnitLevel) -> impl Iterator<Item = &'a UnitNode> {
        self.nodes
            .iter()
            .filter(move |n| n.layer == layer && n.level == level)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl Index<NodeId> for ProvenanceTree {
    type Output = UnitNode;

    fn index(&self, id: NodeId) -> &UnitNode {
        &self.nodes[id.0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn unit(level: UnitLevel, index: u32, start: f64, end: f64) -> NewUnit {
        NewUnit {
            level,
            index,
            child_count: 2,
            start_tick: start,
            end_tick: end,
            start_time: start / 960.0,
            end_time: end / 960.0,
        }
    }

    #[test]
    fn test_hash_is_stable_and_range_sensitive() {
        let a = unit_hash("primary", "section/0", 0.0, 1920.0);
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(a, unit_hash("primary", "section/0", 0.0, 1920.0));
        assert_ne!(a, unit_hash("primary", "section/0", 0.0, 1921.0));
        assert_ne!(a, unit_hash("poly", "section/0", 0.0, 1920.0));
    }

    #[test]
    fn test_handoff_tick() {
        assert_eq!(handoff_tick(0.0, 1920.0), 1919);
        assert_eq!(handoff_tick(10.0, 11.0), 10);
        assert_eq!(handoff_tick(10.0, 10.2), 10);
        assert_eq!(handoff_tick(0.0, 0.0), 0);
    }

    #[test]
    fn test_paths_and_cursors() {
        let mut tree = ProvenanceTree::new();
        let section = tree.open("primary", None, unit(UnitLevel::Section, 0, 0.0, 0.0));
        let phrase = tree.open("primary", Some(section), unit(UnitLevel::Phrase, 0, 0.0, 3840.0));
        let measure = tree.open("primary", Some(phrase), unit(UnitLevel::Measure, 1, 1920.0, 3840.0));

        let node = tree.get(measure).unwrap();
        assert_eq!(node.path, "section/0/phrase/0/measure/1");
        assert_eq!(node.full_path(), "primary/section/0/phrase/0/measure/1");
        assert_eq!(node.section_index, 0);
        assert_eq!(tree.cursor("primary", UnitLevel::Measure), Some(measure));

        // a new phrase clears the measure cursor
        let next = tree.open("primary", Some(section), unit(UnitLevel::Phrase, 1, 3840.0, 7680.0));
        assert_eq!(tree.cursor("primary", UnitLevel::Phrase), Some(next));
        assert_eq!(tree.cursor("primary", UnitLevel::Measure), None);
        assert_eq!(tree.siblings("primary", Some(section)), &[phrase, next]);
        assert_eq!(tree.cursor("poly", UnitLevel::Section), None);
    }

    #[test]
    fn test_close_is_terminal() {
        let mut tree = ProvenanceTree::new();
        let section = tree.open("poly", None, unit(UnitLevel::Section, 0, 0.0, 0.0));
        tree.set_end(section, 7680.0, 8.0);
        let (hash, tick) = tree.close(section);
        assert_eq!(tick, 7679);
        assert!(tree.get(section).unwrap().is_closed());

        tree.set_end(section, 9999.0, 9.0);
        assert_eq!(tree.get(section).unwrap().end_tick, 7680.0);
        assert_eq!(tree.close(section), (hash, tick));
    }
}
