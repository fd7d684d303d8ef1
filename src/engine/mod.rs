//! Composition Engine Module
//!
//! Drives both layers through the section → phrase → unit loops:
//! - `Engine`: the run itself
//! - `io`: export of event streams and the manifest

pub mod io;

use rand::distributions::WeightedIndex;
use rand::prelude::Distribution;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;

use crate::composer::{ClickPerformer, MeterProvider, MeterRole, Performer, RandomMeterProvider};
use crate::config::EngineConfig;
use crate::error::{Result, TactusError};
use crate::hierarchy::{audit, AuditReport, Manifest, NodeId, ProvenanceTree, TrackSummary, UnitLevel, UnitTimer};
use crate::layers::{AdvanceKind, EventBuffer, EventKind, Event, LayerManager, POLY_LAYER, PRIMARY_LAYER};
use crate::timing::{resolve_alignment, InitialTiming, PhraseAlignment};

pub use io::{export_run, ExportSummary};

/// Offsets the section-plan RNG from the meter provider's
const PLAN_SEED_SALT: u64 = 0x5EC7_1015;

/// Tempo and length chosen for one section
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectionPlan {
    pub index: u32,
    pub kind: String,
    pub bpm: f64,
    pub phrases: u32,
}

/// Alignment used for one phrase on both layers
#[derive(Debug, Clone, PartialEq)]
pub struct PhraseRecord {
    pub section: u32,
    pub phrase: u32,
    pub alignment: PhraseAlignment,
}

/// Totals of a finished run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub sections: usize,
    pub phrases: usize,
    pub units: usize,
    pub fallbacks: usize,
    pub tracks: Vec<TrackSummary>,
}

/// Offline composition run over a primary and a poly layer
pub struct Engine {
    config: EngineConfig,
    layers: LayerManager,
    timer: UnitTimer,
    provider: Box<dyn MeterProvider>,
    performer: Box<dyn Performer>,
    plan: Vec<SectionPlan>,
    phrases: Vec<PhraseRecord>,
    tracks: Vec<TrackSummary>,
    finished: bool,
}

impl Engine {
    /// Engine with a seeded random meter provider and a click performer
    pub fn new(config: EngineConfig) -> Result<Self> {
        let provider = RandomMeterProvider::new(config.meters.clone(), config.seed)?;
        Self::with_parts(config, Box::new(provider), Box::new(ClickPerformer::default()))
    }

    /// Engine with caller-supplied composer seams
    pub fn with_parts(
        config: EngineConfig,
        provider: Box<dyn MeterProvider>,
        performer: Box<dyn Performer>,
    ) -> Result<Self> {
        config.validate()?;

        let mut layers = LayerManager::new(config.ppq);
        for name in [PRIMARY_LAYER, POLY_LAYER] {
            layers.register(name, EventBuffer::new(name), &InitialTiming::default(), None)?;
        }
        let timer = UnitTimer::new(config.log_filter()?);
        let plan = plan_sections(&config);

        Ok(Self {
            config,
            layers,
            timer,
            provider,
            performer,
            plan,
            phrases: Vec::new(),
            tracks: Vec::new(),
            finished: false,
        })
    }

    /// Run every section on both layers, then append the silent outro
    ///
    /// # Errors
    /// Any timing error aborts the run; an engine runs at most once.
    pub fn run(&mut self) -> Result<RunSummary> {
        if self.finished {
            return Err(TactusError::invalid("engine", "already run"));
        }
        self.finished = true;

        let plan = self.plan.clone();
        self.layers.ambient_mut().total_sections = plan.len() as u32;
        tracing::info!(
            "Composing {} section(s) with the '{}' meter provider (seed {})",
            plan.len(),
            self.provider.name(),
            self.config.seed
        );

        for section in &plan {
            tracing::info!(
                "Section {}/{} '{}' at {} BPM, {} phrase(s)",
                section.index + 1,
                plan.len(),
                section.kind,
                section.bpm,
                section.phrases
            );
            self.layers.ambient_mut().phrases_per_section = section.phrases;

            for phrase in 0..section.phrases {
                let primary = self.provider.meter(MeterRole::Primary);
                let alignment = resolve_alignment(
                    section.bpm,
                    self.config.ppq,
                    primary,
                    self.provider.as_mut(),
                    &self.config.alignment,
                )?;
                tracing::info!(
                    "Phrase {}/{}: {} x{} against {} x{} ({:.4}s)",
                    phrase + 1,
                    section.phrases,
                    alignment.primary_meter(),
                    alignment.primary_measures,
                    alignment.poly_meter(),
                    alignment.poly_measures,
                    alignment.primary_phrase_secs()
                );

                let ambient = self.layers.ambient_mut();
                ambient.apply_rates(&alignment.primary_rates);
                ambient.set_poly_meter(alignment.poly_meter());
                ambient.set_measures_per_phrase(alignment.primary_measures, alignment.poly_measures);
                self.play_phrase(PRIMARY_LAYER, false, section, phrase)?;

                self.layers.ambient_mut().apply_rates(&alignment.poly_rates);
                self.play_phrase(POLY_LAYER, true, section, phrase)?;

                self.phrases.push(PhraseRecord {
                    section: section.index,
                    phrase,
                    alignment,
                });
            }
        }

        self.append_outro();
        Ok(self.summary())
    }

    /// One phrase on one layer, opening and closing its section as needed
    fn play_phrase(&mut self, layer: &str, is_poly: bool, section: &SectionPlan, phrase: u32) -> Result<()> {
        self.layers.activate(layer, is_poly)?;

        if phrase == 0 {
            self.open(UnitLevel::Section, section.index)?;
        }
        let id = self.open(UnitLevel::Phrase, phrase)?;
        self.play_children(id)?;
        self.layers.advance(layer, AdvanceKind::Phrase);

        if phrase + 1 == section.phrases {
            let id = self.timer.close_section(&mut self.layers)?;
            self.perform(id)?;
            self.layers.advance(layer, AdvanceKind::Section);
        }
        Ok(())
    }

    fn play_children(&mut self, parent: NodeId) -> Result<()> {
        let node = self.timer.node(parent);
        let Some(level) = node.level.child() else {
            return Ok(());
        };
        for index in 0..node.child_count {
            let id = self.open(level, index)?;
            self.play_children(id)?;
        }
        Ok(())
    }

    /// Open a unit on the active layer and hand it to the performer once final
    fn open(&mut self, level: UnitLevel, index: u32) -> Result<NodeId> {
        let id = self
            .timer
            .set_unit_timing(&mut self.layers, self.provider.as_mut(), level, index)?;
        if level != UnitLevel::Section {
            self.perform(id)?;
        }
        Ok(id)
    }

    fn perform(&mut self, id: NodeId) -> Result<()> {
        let node = self.timer.node(id);
        let (_, layer) = self.layers.active_parts()?;
        self.performer.on_unit(node, &mut layer.buffer);
        Ok(())
    }

    /// `end_track` on every layer `silent_outro_seconds` after its last section
    fn append_outro(&mut self) {
        let outro = self.config.silent_outro_seconds;
        self.tracks.clear();
        for name in [PRIMARY_LAYER, POLY_LAYER] {
            let Some(layer) = self.layers.layer_mut(name) else {
                continue;
            };
            let state = &layer.state;
            let end = state.section_start + outro * state.tp_sec;
            let end_tick = crate::hierarchy::round_tick(end);
            let end_time = state.section_start_time + outro;
            layer.buffer.push(Event::new(end_tick, EventKind::EndTrack));
            tracing::info!("Track '{}' ends at tick {} ({:.4}s)", name, end_tick, end_time);
            self.tracks.push(TrackSummary {
                layer: name.to_string(),
                end_tick,
                end_time,
                event_count: layer.buffer.len(),
            });
        }
    }

    fn summary(&self) -> RunSummary {
        RunSummary {
            sections: self.plan.len(),
            phrases: self.phrases.len(),
            units: self.timer.tree().len(),
            fallbacks: self.phrases.iter().filter(|p| p.alignment.fallback).count(),
            tracks: self.tracks.clone(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn layers(&self) -> &LayerManager {
        &self.layers
    }

    pub fn tree(&self) -> &ProvenanceTree {
        self.timer.tree()
    }

    pub fn plan(&self) -> &[SectionPlan] {
        &self.plan
    }

    /// Alignment of every phrase played so far
    pub fn phrases(&self) -> &[PhraseRecord] {
        &self.phrases
    }

    pub fn tracks(&self) -> &[TrackSummary] {
        &self.tracks
    }

    /// Manifest of every closed unit
    pub fn manifest(&self) -> Manifest {
        Manifest::from_tree(self.timer.tree(), self.tracks.clone(), self.config.ppq, self.config.seed)
    }

    /// Audit the in-memory result with the configured tolerances
    pub fn audit(&self) -> AuditReport {
        let streams: Vec<_> = self.layers.layers().iter().map(|l| l.buffer.to_stream()).collect();
        audit(&self.manifest(), &streams, &self.config.audit)
    }

    /// Write event streams and the manifest into `dir`
    pub fn export(&self, dir: &std::path::Path) -> Result<ExportSummary> {
        export_run(self, dir)
    }
}

/// Choose section types, tempos and phrase counts up front
fn plan_sections(config: &EngineConfig) -> Vec<SectionPlan> {
    let mut rng = StdRng::seed_from_u64(config.seed ^ PLAN_SEED_SALT);
    let count = config.sections.sample(&mut rng);
    let weights = WeightedIndex::new(config.section_types.iter().map(|t| t.weight)).ok();

    (0..count)
        .map(|index| {
            let section_type = weights
                .as_ref()
                .map(|w| &config.section_types[w.sample(&mut rng)]);
            let (kind, scale, phrases) = match section_type {
                Some(t) => (
                    t.name.clone(),
                    t.bpm_scale,
                    t.phrases.unwrap_or(config.phrases_per_section),
                ),
                None => ("section".to_string(), 1.0, config.phrases_per_section),
            };
            SectionPlan {
                index,
                kind,
                bpm: (config.bpm * scale).round().max(1.0),
                phrases: phrases.sample(&mut rng).max(1),
            }
        })
        .collect()
}
