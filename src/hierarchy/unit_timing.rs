//! Hierarchical unit timing
//!
//! Computes the absolute range of one unit at one of the seven levels,
//! always against the active layer, and records it in the provenance tree.
//!
//! Ticks are authoritative. A unit below the phrase level splits its
//! parent's tick range evenly; the last child ends exactly where the parent
//! ends, so siblings are contiguous by construction. Seconds are derived
//! from ticks through the layer's `tp_sec`, anchored on the parent's start
//! time (and pinned to the parent's end time for the last child).
//!
//! Every unit except a section is final as soon as it is opened, so it is
//! closed immediately and its handoff is written. Sections stay open until
//! [`UnitTimer::close_section`] learns their length from the layer's
//! section accumulators.

use super::level::{LogFilter, UnitLevel};
use super::tree::{round_tick, NewUnit, NodeId, ProvenanceTree, UnitNode};
use crate::composer::MeterProvider;
use crate::error::{Result, TactusError};
use crate::layers::{Event, EventKind, LayerManager};
use crate::timing::{format_time, AmbientTiming};

/// Builds the provenance tree one unit at a time
#[derive(Debug, Default)]
pub struct UnitTimer {
    tree: ProvenanceTree,
    filter: LogFilter,
}

impl UnitTimer {
    pub fn new(filter: LogFilter) -> Self {
        Self {
            tree: ProvenanceTree::new(),
            filter,
        }
    }

    pub fn tree(&self) -> &ProvenanceTree {
        &self.tree
    }

    /// Open unit `index` at `level` on the active layer
    ///
    /// The parent is the layer's latest unit at the level above. Child
    /// counts for the new unit are resolved once here and stored on the
    /// node; a count of zero is coerced to 1.
    ///
    /// # Errors
    /// - `NoActiveLayer` before any activation
    /// - `OrphanUnit` when there is no open parent
    /// - `ContiguityViolation` when `index` is not the next sibling, exceeds
    ///   the parent's child count, or the previous sibling's handoff is
    ///   missing from the layer buffer
    /// - `InvalidParameter` when the layer has no usable tick rate
    pub fn set_unit_timing(
        &mut self,
        layers: &mut LayerManager,
        provider: &mut dyn MeterProvider,
        level: UnitLevel,
        index: u32,
    ) -> Result<NodeId> {
        let (ambient, layer) = layers.active_parts()?;
        let layer_name = layer.name.clone();

        let parent = self.resolve_parent(&layer_name, level)?;
        let limit = match parent {
            Some(p) => self.node(p).child_count,
            None => ambient.total_sections.max(1),
        };
        let path = self.prospective_path(&layer_name, parent, level, index);

        let siblings = self.tree.siblings(&layer_name, parent);
        let expected = siblings.len() as u32;
        if index < expected {
            return Err(violation(&path, format!("{} {} was already opened", level, index)));
        }
        if index > expected {
            return Err(violation(
                &path,
                format!("{} {} requested before {} {}", level, index, level, expected),
            ));
        }
        if index >= limit {
            return Err(violation(
                &path,
                format!("{} {} exceeds the parent's {} children", level, index, limit),
            ));
        }
        let previous = siblings.last().copied();

        let geometry = self.geometry(ambient, parent, level, index)?;

        if let Some(prev) = previous {
            let prev = self.node(prev);
            let recorded = prev
                .unit_hash
                .as_deref()
                .map(|hash| layer.buffer.has_handoff(hash))
                .unwrap_or(false);
            if !prev.is_closed() || !recorded {
                return Err(violation(
                    &path,
                    format!("{} {} has no recorded handoff", level, prev.index),
                ));
            }
            let (prev_end, start) = (prev.end_tick_rounded(), round_tick(geometry.start_tick));
            if prev_end != start {
                let kind = if prev_end < start { "gap" } else { "overlap" };
                return Err(violation(
                    &path,
                    format!("{} between tick {} and tick {}", kind, prev_end, start),
                ));
            }
        }

        let child_count = resolve_child_count(ambient, provider, level, &path);
        let id = self.tree.open(
            &layer_name,
            parent,
            NewUnit {
                level,
                index,
                child_count,
                ..geometry
            },
        );

        if level == UnitLevel::Measure {
            ambient.measure_start = geometry.start_tick;
            ambient.measure_start_time = geometry.start_time;
        }

        if level != UnitLevel::Section {
            let (hash, tick) = self.tree.close(id);
            let node = self.node(id);
            if level == UnitLevel::Measure {
                let start = node.start_tick_rounded();
                layer.buffer.push(Event::for_unit(
                    start,
                    EventKind::Bpm {
                        bpm: ambient.midi_bpm,
                    },
                    &hash,
                ));
                layer.buffer.push(Event::for_unit(
                    start,
                    EventKind::Meter {
                        numerator: ambient.midi_meter.numerator,
                        denominator: ambient.midi_meter.denominator,
                    },
                    &hash,
                ));
            }
            if self.filter.matches(level) {
                let text = marker_text(node, limit, Some(ambient));
                layer
                    .buffer
                    .push(Event::for_unit(node.start_tick_rounded(), EventKind::Marker { text }, &hash));
            }
            layer.buffer.push_handoff(tick, &hash);
        }

        tracing::trace!("Opened {} [{}, {})", path, geometry.start_tick, geometry.end_tick);
        Ok(id)
    }

    /// Close the active layer's open section
    ///
    /// Its end is `section_start + tp_section` in ticks and
    /// `section_start_time + sp_section` in seconds, so this must run after
    /// the section's last phrase advance and before the section advance.
    pub fn close_section(&mut self, layers: &mut LayerManager) -> Result<NodeId> {
        let (ambient, layer) = layers.active_parts()?;
        let layer_name = layer.name.clone();

        let id = self
            .tree
            .cursor(&layer_name, UnitLevel::Section)
            .ok_or_else(|| TactusError::OrphanUnit {
                layer: layer_name.clone(),
                level: UnitLevel::Section,
            })?;
        let section = self.node(id);
        let path = section.full_path();
        if section.is_closed() {
            return Err(violation(&path, "section is already closed".to_string()));
        }
        if section.start_tick != ambient.section_start {
            return Err(violation(
                &path,
                format!(
                    "section opened at tick {} but the layer cursor is at {}",
                    section.start_tick, ambient.section_start
                ),
            ));
        }

        let end_tick = ambient.section_start + ambient.tp_section;
        let end_time = ambient.section_start_time + ambient.sp_section;
        if let Some(last) = section.children.last().map(|&c| self.node(c)) {
            if last.end_tick_rounded() != round_tick(end_tick) {
                return Err(violation(
                    &path,
                    format!(
                        "last phrase ends at tick {} but the section ends at {}",
                        last.end_tick_rounded(),
                        round_tick(end_tick)
                    ),
                ));
            }
        }
        if section.children.len() as u32 != section.child_count {
            tracing::warn!(
                "{} closed with {} of {} phrases",
                path,
                section.children.len(),
                section.child_count
            );
        }

        self.tree.set_end(id, end_tick, end_time);
        let (hash, tick) = self.tree.close(id);
        let node = self.node(id);
        if self.filter.matches(UnitLevel::Section) {
            let text = marker_text(node, ambient.total_sections.max(1), None);
            layer
                .buffer
                .push(Event::for_unit(node.start_tick_rounded(), EventKind::Marker { text }, &hash));
        }
        layer.buffer.push_handoff(tick, &hash);
        tracing::debug!("Closed {} at tick {}", path, end_tick);
        Ok(id)
    }

    /// Node lookup for ids this timer handed out
    pub fn node(&self, id: NodeId) -> &UnitNode {
        &self.tree[id]
    }

    fn resolve_parent(&self, layer: &str, level: UnitLevel) -> Result<Option<NodeId>> {
        let Some(parent_level) = level.parent() else {
            return Ok(None);
        };
        let orphan = || TactusError::OrphanUnit {
            layer: layer.to_string(),
            level,
        };
        let parent = self.tree.cursor(layer, parent_level).ok_or_else(orphan)?;
        // a closed section takes no more phrases
        if parent_level == UnitLevel::Section && self.node(parent).is_closed() {
            return Err(orphan());
        }
        Ok(Some(parent))
    }

    fn prospective_path(
        &self,
        layer: &str,
        parent: Option<NodeId>,
        level: UnitLevel,
        index: u32,
    ) -> String {
        match parent {
            Some(p) => format!("{}/{}/{}", self.node(p).full_path(), level, index),
            None => format!("{}/{}/{}", layer, level, index),
        }
    }

    fn geometry(
        &self,
        ambient: &AmbientTiming,
        parent: Option<NodeId>,
        level: UnitLevel,
        index: u32,
    ) -> Result<NewUnit> {
        let mut unit = NewUnit {
            level,
            index,
            child_count: 0,
            start_tick: 0.0,
            end_tick: 0.0,
            start_time: 0.0,
            end_time: 0.0,
        };
        match (level, parent) {
            (UnitLevel::Section, _) => {
                unit.start_tick = ambient.section_start;
                unit.end_tick = ambient.section_start;
                unit.start_time = ambient.section_start_time;
                unit.end_time = ambient.section_start_time;
            }
            (UnitLevel::Phrase, _) => {
                if !(ambient.tp_phrase.is_finite() && ambient.tp_phrase > 0.0) {
                    return Err(TactusError::invalid("tp_phrase", ambient.tp_phrase));
                }
                unit.start_tick = ambient.phrase_start;
                unit.end_tick = ambient.phrase_start + ambient.tp_phrase;
                unit.start_time = ambient.phrase_start_time;
                unit.end_time = ambient.phrase_start_time + ambient.sp_phrase;
            }
            (_, Some(p)) => {
                if !(ambient.tp_sec.is_finite() && ambient.tp_sec > 0.0) {
                    return Err(TactusError::invalid("tp_sec", ambient.tp_sec));
                }
                let parent = self.node(p);
                let count = parent.child_count.max(1);
                let step = parent.duration_ticks() / count as f64;
                let offset = index as f64 * step;
                unit.start_tick = parent.start_tick + offset;
                unit.start_time = parent.start_time + offset / ambient.tp_sec;
                if index + 1 >= count {
                    unit.end_tick = parent.end_tick;
                    unit.end_time = parent.end_time;
                } else {
                    let end_offset = (index + 1) as f64 * step;
                    unit.end_tick = parent.start_tick + end_offset;
                    unit.end_time = parent.start_time + end_offset / ambient.tp_sec;
                }
            }
            (_, None) => {
                return Err(TactusError::OrphanUnit {
                    layer: String::new(),
                    level,
                })
            }
        }
        Ok(unit)
    }
}

/// Number of children the new unit will be split into
fn resolve_child_count(
    ambient: &AmbientTiming,
    provider: &mut dyn MeterProvider,
    level: UnitLevel,
    path: &str,
) -> u32 {
    let count = match level {
        UnitLevel::Section => ambient.phrases_per_section,
        UnitLevel::Phrase => ambient.measures_per_phrase,
        UnitLevel::Measure => ambient.numerator,
        UnitLevel::Beat => provider.divisions(),
        UnitLevel::Division => provider.subdivisions(),
        UnitLevel::Subdivision => provider.subsubdivisions(),
        UnitLevel::Subsubdivision => return 0,
    };
    if count == 0 {
        tracing::warn!(
            "{} resolved 0 {} children from '{}'; using 1",
            path,
            level.child().map(UnitLevel::name).unwrap_or("leaf"),
            provider.name()
        );
        return 1;
    }
    count
}

/// `"<Level> i/n Length: m:ss.ffff (start - end) endTick: N"` plus meter
/// details for phrases and measures
pub fn marker_text(node: &UnitNode, sibling_count: u32, ambient: Option<&AmbientTiming>) -> String {
    let mut text = format!(
        "{} {}/{} Length: {} ({} - {}) endTick: {}",
        node.level.title(),
        node.index + 1,
        sibling_count,
        format_time(node.duration_secs()),
        format_time(node.start_time),
        format_time(node.end_time),
        node.end_tick_rounded()
    );
    if let Some(ambient) = ambient {
        if matches!(node.level, UnitLevel::Phrase | UnitLevel::Measure) {
            let meter = ambient.meter();
            if ambient.midi_meter == meter {
                text.push_str(&format!(" Meter: {}", meter));
            } else {
                text.push_str(&format!(
                    " Actual Meter: {} MIDI Meter: {}",
                    meter, ambient.midi_meter
                ));
            }
            text.push_str(&format!(" tpSec: {}", ambient.tp_sec));
        }
    }
    text
}

fn violation(path: &str, reason: String) -> TactusError {
    TactusError::ContiguityViolation {
        path: path.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composer::FixedMeterProvider;
    use crate::layers::{EventBuffer, POLY_LAYER, PRIMARY_LAYER};
    use crate::timing::{InitialTiming, Meter, TimingCalculator};
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;

    struct Rig {
        layers: LayerManager,
        provider: FixedMeterProvider,
        timer: UnitTimer,
    }

    impl Rig {
        fn new(meter: Meter, measures: u32) -> Self {
            let mut layers = LayerManager::new(480);
            for name in [PRIMARY_LAYER, POLY_LAYER] {
                layers
                    .register(name, EventBuffer::new(name), &InitialTiming::default(), None)
                    .unwrap();
            }
            let rates = TimingCalculator::compute(120.0, 480, meter).unwrap();
            let ambient = layers.ambient_mut();
            ambient.apply_rates(&rates);
            ambient.set_measures_per_phrase(measures, measures);
            ambient.phrases_per_section = 2;
            ambient.total_sections = 1;
            layers.activate(PRIMARY_LAYER, false).unwrap();

            let provider = FixedMeterProvider::new(meter).unwrap().with_counts(2, 2, 2);
            Self {
                layers,
                provider,
                timer: UnitTimer::new(LogFilter::all()),
            }
        }

        fn open(&mut self, level: UnitLevel, index: u32) -> Result<NodeId> {
            self.timer
                .set_unit_timing(&mut self.layers, &mut self.provider, level, index)
        }

        fn buffer(&self) -> &EventBuffer {
            &self.layers.layer(PRIMARY_LAYER).unwrap().buffer
        }
    }

    #[test]
    fn test_requires_active_layer() {
        let mut layers = LayerManager::new(480);
        let mut provider = FixedMeterProvider::new(Meter::new(4, 4)).unwrap();
        let mut timer = UnitTimer::new(LogFilter::none());
        let err = timer
            .set_unit_timing(&mut layers, &mut provider, UnitLevel::Section, 0)
            .unwrap_err();
        assert!(matches!(err, TactusError::NoActiveLayer));
    }

    #[test]
    fn test_orphan_beat() {
        let mut rig = Rig::new(Meter::new(4, 4), 1);
        rig.open(UnitLevel::Section, 0).unwrap();
        let err = rig.open(UnitLevel::Beat, 0).unwrap_err();
        assert!(matches!(
            err,
            TactusError::OrphanUnit {
                level: UnitLevel::Beat,
                ..
            }
        ));
    }

    #[test]
    fn test_measures_split_phrase_contiguously() {
        let mut rig = Rig::new(Meter::new(7, 5), 3);
        rig.open(UnitLevel::Section, 0).unwrap();
        let phrase = rig.open(UnitLevel::Phrase, 0).unwrap();

        let mut ends = Vec::new();
        for m in 0..3 {
            let id = rig.open(UnitLevel::Measure, m).unwrap();
            let node = rig.timer.node(id);
            assert_relative_eq!(node.duration_ticks(), 3360.0, max_relative = 1e-12);
            assert_relative_eq!(node.duration_secs(), 2.8, max_relative = 1e-9);
            ends.push((node.start_tick, node.end_tick));
        }
        for pair in ends.windows(2) {
            assert_eq!(pair[0].1, pair[1].0);
        }
        assert_eq!(ends[2].1, rig.timer.node(phrase).end_tick);
    }

    #[test]
    fn test_uneven_split_ends_on_parent() {
        let mut rig = Rig::new(Meter::new(3, 4), 1);
        rig.provider = FixedMeterProvider::new(Meter::new(3, 4))
            .unwrap()
            .with_counts(7, 1, 1);
        rig.open(UnitLevel::Section, 0).unwrap();
        rig.open(UnitLevel::Phrase, 0).unwrap();
        rig.open(UnitLevel::Measure, 0).unwrap();
        let beat = rig.open(UnitLevel::Beat, 0).unwrap();
        assert_eq!(rig.timer.node(beat).child_count, 7);

        let mut last = None;
        for d in 0..7 {
            let id = rig.open(UnitLevel::Division, d).unwrap();
            let node = rig.timer.node(id);
            if let Some(prev) = last {
                assert_eq!(rig.timer.node(prev).end_tick, node.start_tick);
            }
            last = Some(id);
        }
        let last = rig.timer.node(last.unwrap());
        assert_eq!(last.end_tick, rig.timer.node(beat).end_tick);
        assert_eq!(last.end_time, rig.timer.node(beat).end_time);
    }

    #[test]
    fn test_zero_child_count_coerced() {
        let mut rig = Rig::new(Meter::new(4, 4), 1);
        rig.provider = FixedMeterProvider::new(Meter::new(4, 4))
            .unwrap()
            .with_counts(0, 0, 0);
        rig.open(UnitLevel::Section, 0).unwrap();
        rig.open(UnitLevel::Phrase, 0).unwrap();
        rig.open(UnitLevel::Measure, 0).unwrap();
        let beat = rig.open(UnitLevel::Beat, 0).unwrap();
        assert_eq!(rig.timer.node(beat).child_count, 1);
        let division = rig.open(UnitLevel::Division, 0).unwrap();
        assert_eq!(rig.timer.node(division).start_tick, rig.timer.node(beat).start_tick);
        assert_eq!(rig.timer.node(division).end_tick, rig.timer.node(beat).end_tick);
        assert!(rig.open(UnitLevel::Division, 1).is_err());
    }

    #[test]
    fn test_missing_handoff_blocks_next_sibling() {
        let mut rig = Rig::new(Meter::new(4, 4), 2);
        rig.open(UnitLevel::Section, 0).unwrap();
        rig.open(UnitLevel::Phrase, 0).unwrap();
        let first = rig.open(UnitLevel::Measure, 0).unwrap();
        let hash = rig.timer.node(first).unit_hash.clone().unwrap();
        assert!(rig.buffer().has_handoff(&hash));

        rig.layers
            .layer_mut(PRIMARY_LAYER)
            .unwrap()
            .buffer
            .remove_handoff(&hash);
        let err = rig.open(UnitLevel::Measure, 1).unwrap_err();
        match err {
            TactusError::ContiguityViolation { path, reason } => {
                assert_eq!(path, "primary/section/0/phrase/0/measure/1");
                assert!(reason.contains("handoff"));
            }
            other => panic!("Expected ContiguityViolation, got {:?}", other),
        }
    }

    #[test]
    fn test_skipped_and_repeated_indices_rejected() {
        let mut rig = Rig::new(Meter::new(4, 4), 3);
        rig.open(UnitLevel::Section, 0).unwrap();
        rig.open(UnitLevel::Phrase, 0).unwrap();
        assert!(matches!(
            rig.open(UnitLevel::Measure, 1),
            Err(TactusError::ContiguityViolation { .. })
        ));
        rig.open(UnitLevel::Measure, 0).unwrap();
        assert!(matches!(
            rig.open(UnitLevel::Measure, 0),
            Err(TactusError::ContiguityViolation { .. })
        ));
        rig.open(UnitLevel::Measure, 1).unwrap();
        rig.open(UnitLevel::Measure, 2).unwrap();
        assert!(matches!(
            rig.open(UnitLevel::Measure, 3),
            Err(TactusError::ContiguityViolation { .. })
        ));
    }

    #[test]
    fn test_handoff_tick_and_markers() {
        let mut rig = Rig::new(Meter::new(7, 5), 1);
        rig.open(UnitLevel::Section, 0).unwrap();
        rig.open(UnitLevel::Phrase, 0).unwrap();
        let measure = rig.open(UnitLevel::Measure, 0).unwrap();
        let hash = rig.timer.node(measure).unit_hash.clone().unwrap();

        let events = rig.buffer().events();
        let handoff = events
            .iter()
            .find(|e| e.is_handoff() && e.unit_hash.as_deref() == Some(hash.as_str()))
            .unwrap();
        assert_eq!(handoff.tick, 3359);

        let markers: Vec<&str> = events
            .iter()
            .filter_map(|e| match &e.kind {
                EventKind::Marker { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(
            markers,
            vec![
                "Phrase 1/2 Length: 0:02.8000 (0:00.0000 - 0:02.8000) endTick: 3360 Actual Meter: 7/5 MIDI Meter: 7/4 tpSec: 1200",
                "Measure 1/1 Length: 0:02.8000 (0:00.0000 - 0:02.8000) endTick: 3360 Actual Meter: 7/5 MIDI Meter: 7/4 tpSec: 1200",
            ]
        );
        assert!(events
            .iter()
            .any(|e| e.kind == EventKind::Bpm { bpm: 150.0 } && e.tick == 0));
    }

    #[test]
    fn test_close_section_uses_accumulators() {
        let mut rig = Rig::new(Meter::new(4, 4), 1);
        rig.open(UnitLevel::Section, 0).unwrap();
        rig.open(UnitLevel::Phrase, 0).unwrap();
        rig.layers.advance(PRIMARY_LAYER, crate::layers::AdvanceKind::Phrase);
        rig.open(UnitLevel::Phrase, 1).unwrap();
        rig.layers.advance(PRIMARY_LAYER, crate::layers::AdvanceKind::Phrase);

        let section = rig.timer.close_section(&mut rig.layers).unwrap();
        let node = rig.timer.node(section);
        assert_eq!(node.end_tick, 3840.0);
        assert_relative_eq!(node.end_time, 4.0, max_relative = 1e-12);
        assert!(node.is_closed());
        assert!(rig.buffer().has_handoff(node.unit_hash.as_deref().unwrap()));

        assert!(rig.timer.close_section(&mut rig.layers).is_err());
        assert!(matches!(
            rig.open(UnitLevel::Phrase, 2),
            Err(TactusError::OrphanUnit { .. })
        ));
    }
}
