//! Ordered event sink for one layer
//!
//! Events are appended in generation order (not tick order); the exported
//! stream is stably sorted by tick. Handoff events are additionally indexed
//! by unit hash so predecessor checks do not scan the whole buffer.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Payload of one event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// Tempo written to the exported file (MIDI BPM)
    Bpm { bpm: f64 },
    /// Time signature written to the exported file (MIDI meter)
    Meter { numerator: u32, denominator: u32 },
    /// Human-readable unit marker
    Marker { text: String },
    /// Proof that the unit named by `unitHash` has closed
    UnitHandoff,
    NoteOn { channel: u8, note: u8, velocity: u8 },
    NoteOff { channel: u8, note: u8 },
    EndTrack,
}

impl EventKind {
    /// Off-type events may trail past the end of their unit
    pub fn is_off(&self) -> bool {
        matches!(self, EventKind::NoteOff { .. })
    }

    /// Events whose tick is not bound to `[start, end)` of their unit
    pub fn is_containment_exempt(&self) -> bool {
        matches!(
            self,
            EventKind::NoteOff { .. } | EventKind::Marker { .. } | EventKind::UnitHandoff
        )
    }
}

/// A timed event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub tick: u64,
    #[serde(flatten)]
    pub kind: EventKind,
    /// Unit this event belongs to
    #[serde(rename = "unitHash", default, skip_serializing_if = "Option::is_none")]
    pub unit_hash: Option<String>,
}

impl Event {
    pub fn new(tick: u64, kind: EventKind) -> Self {
        Self {
            tick,
            kind,
            unit_hash: None,
        }
    }

    pub fn for_unit(tick: u64, kind: EventKind, unit_hash: &str) -> Self {
        Self {
            tick,
            kind,
            unit_hash: Some(unit_hash.to_string()),
        }
    }

    pub fn handoff(tick: u64, unit_hash: &str) -> Self {
        Self::for_unit(tick, EventKind::UnitHandoff, unit_hash)
    }

    pub fn is_handoff(&self) -> bool {
        self.kind == EventKind::UnitHandoff
    }
}

/// On-disk form of one layer's event stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventStream {
    pub layer: String,
    pub events: Vec<Event>,
}

impl EventStream {
    pub fn load(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }
}

/// Append-only (save for explicit removal) event list of one layer
#[derive(Debug, Clone, Default)]
pub struct EventBuffer {
    name: String,
    events: Vec<Event>,
    handoffs: HashSet<String>,
}

impl EventBuffer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            events: Vec::new(),
            handoffs: HashSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn push(&mut self, event: Event) {
        if event.is_handoff() {
            if let Some(hash) = &event.unit_hash {
                self.handoffs.insert(hash.clone());
            }
        }
        self.events.push(event);
    }

    /// Record a handoff for `unit_hash` at `tick`
    pub fn push_handoff(&mut self, tick: u64, unit_hash: &str) {
        self.push(Event::handoff(tick, unit_hash));
    }

    pub fn has_handoff(&self, unit_hash: &str) -> bool {
        self.handoffs.contains(unit_hash)
    }

    /// Remove every handoff event for `unit_hash`. Returns whether any existed.
    pub fn remove_handoff(&mut self, unit_hash: &str) -> bool {
        if !self.handoffs.remove(unit_hash) {
            return false;
        }
        self.events
            .retain(|e| !(e.is_handoff() && e.unit_hash.as_deref() == Some(unit_hash)));
        true
    }

    /// Keep only events matching `keep`
    pub fn retain<F: FnMut(&Event) -> bool>(&mut self, keep: F) {
        self.events.retain(keep);
        self.handoffs = self
            .events
            .iter()
            .filter(|e| e.is_handoff())
            .filter_map(|e| e.unit_hash.clone())
            .collect();
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn handoff_count(&self) -> usize {
        self.handoffs.len()
    }

    /// Events stably sorted by tick
    pub fn sorted(&self) -> Vec<Event> {
        let mut events = self.events.clone();
        events.sort_by_key(|e| e.tick);
        events
    }

    pub fn last_tick(&self) -> Option<u64> {
        self.events.iter().map(|e| e.tick).max()
    }

    /// Snapshot as an exportable stream
    pub fn to_stream(&self) -> EventStream {
        EventStream {
            layer: self.name.clone(),
            events: self.sorted(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_handoff_index() {
        let mut buffer = EventBuffer::new("primary");
        buffer.push_handoff(959, "abcd");
        buffer.push(Event::new(0, EventKind::Bpm { bpm: 90.0 }));
        assert!(buffer.has_handoff("abcd"));
        assert!(!buffer.has_handoff("ef01"));
        assert_eq!(buffer.handoff_count(), 1);

        assert!(buffer.remove_handoff("abcd"));
        assert!(!buffer.has_handoff("abcd"));
        assert!(!buffer.remove_handoff("abcd"));
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_retain_rebuilds_index() {
        let mut buffer = EventBuffer::new("poly");
        buffer.push_handoff(10, "a");
        buffer.push_handoff(20, "b");
        buffer.retain(|e| e.tick > 15);
        assert!(!buffer.has_handoff("a"));
        assert!(buffer.has_handoff("b"));
    }

    #[test]
    fn test_sorted_is_stable() {
        let mut buffer = EventBuffer::new("primary");
        buffer.push(Event::new(100, EventKind::Marker { text: "late".into() }));
        buffer.push(Event::new(0, EventKind::Marker { text: "first".into() }));
        buffer.push(Event::new(100, EventKind::EndTrack));
        let sorted = buffer.sorted();
        assert_eq!(sorted[0].tick, 0);
        assert_eq!(sorted[1].kind, EventKind::Marker { text: "late".into() });
        assert_eq!(sorted[2].kind, EventKind::EndTrack);
        assert_eq!(buffer.last_tick(), Some(100));
    }

    #[test]
    fn test_event_json_shape() {
        let event = Event::handoff(3359, "0123456789abcdef");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({ "tick": 3359, "type": "unit_handoff", "unitHash": "0123456789abcdef" })
        );

        let note = Event::new(
            5,
            EventKind::NoteOn {
                channel: 9,
                note: 37,
                velocity: 80,
            },
        );
        let value = serde_json::to_value(&note).unwrap();
        assert_eq!(
            value,
            json!({ "tick": 5, "type": "note_on", "channel": 9, "note": 37, "velocity": 80 })
        );
        let back: Event = serde_json::from_value(value).unwrap();
        assert_eq!(back, note);
    }
}
