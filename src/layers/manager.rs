//! Layer registry and ambient-timing ownership
//!
//! Every layer pairs a [`TimingContext`] with an [`EventBuffer`]. Exactly one
//! layer at a time owns the ambient timing state; ownership only moves
//! through [`LayerManager::activate`].

use serde::Serialize;

use super::buffer::EventBuffer;
use crate::error::{Result, TactusError};
use crate::timing::{AmbientTiming, InitialTiming, Meter, TimingContext};

/// Name of the layer that carries the primary meter
pub const PRIMARY_LAYER: &str = "primary";

/// Name of the layer that carries the poly meter
pub const POLY_LAYER: &str = "poly";

/// Which cursor `advance` moves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceKind {
    Phrase,
    Section,
}

/// One independently metered voice
#[derive(Debug, Clone)]
pub struct Layer {
    pub name: String,
    pub buffer: EventBuffer,
    pub state: TimingContext,
}

/// Ambient values right after an activation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivationSnapshot {
    pub layer: String,
    pub is_poly: bool,
    pub meter: Meter,
    pub measures_per_phrase: u32,
    pub tp_sec: f64,
    pub tp_measure: f64,
    pub sp_measure: f64,
    pub tp_phrase: f64,
    pub sp_phrase: f64,
    pub phrase_start: f64,
    pub phrase_start_time: f64,
}

/// Registry of layers plus the ambient timing they take turns owning
#[derive(Debug)]
pub struct LayerManager {
    ppq: u32,
    layers: Vec<Layer>,
    active: Option<usize>,
    ambient: AmbientTiming,
}

impl LayerManager {
    pub fn new(ppq: u32) -> Self {
        Self {
            ppq,
            layers: Vec::new(),
            active: None,
            ambient: AmbientTiming::new(ppq),
        }
    }

    /// Register a layer with a fresh timing cursor
    ///
    /// `initial` is merged over the context defaults. `setup`, when given,
    /// runs once against the new state and buffer; a failing setup is logged
    /// and the layer is kept. Re-registering a name replaces that layer.
    ///
    /// # Example
    /// ```
    /// use tactus::layers::{EventBuffer, LayerManager};
    /// use tactus::timing::InitialTiming;
    ///
    /// let mut layers = LayerManager::new(480);
    /// let layer = layers
    ///     .register("primary", EventBuffer::new("primary"), &InitialTiming::default(), None)
    ///     .unwrap();
    /// assert_eq!(layer.state.buffer_name, "primary");
    /// assert!(layers.active_name().is_none());
    /// ```
    pub fn register(
        &mut self,
        name: &str,
        buffer: EventBuffer,
        initial: &InitialTiming,
        setup: Option<&mut dyn FnMut(&mut TimingContext, &mut EventBuffer) -> Result<()>>,
    ) -> Result<&mut Layer> {
        if name.is_empty() {
            return Err(TactusError::invalid("layer", "\"\""));
        }

        let mut state = TimingContext::from_initial(initial, self.ppq);
        state.buffer_name = buffer.name().to_string();
        let mut layer = Layer {
            name: name.to_string(),
            buffer,
            state,
        };

        if let Some(setup) = setup {
            if let Err(e) = setup(&mut layer.state, &mut layer.buffer) {
                tracing::warn!("Setup for layer '{}' failed: {}", name, e);
            }
        }

        let index = match self.index_of(name) {
            Some(index) => {
                tracing::warn!("Layer '{}' re-registered; previous state discarded", name);
                self.layers[index] = layer;
                index
            }
            None => {
                self.layers.push(layer);
                self.layers.len() - 1
            }
        };
        tracing::debug!("Registered layer '{}'", name);
        Ok(&mut self.layers[index])
    }

    /// Make `name` the owner of ambient timing
    ///
    /// The meter and rates currently staged in ambient state are pulled into
    /// the layer, the layer's own cursor is restored, and the phrase length
    /// is derived from the measure count for the layer's role.
    ///
    /// # Errors
    /// `UnknownLayer` if `name` was never registered.
    pub fn activate(&mut self, name: &str, is_poly: bool) -> Result<ActivationSnapshot> {
        let index = self.index_of(name).ok_or_else(|| TactusError::UnknownLayer {
            name: name.to_string(),
        })?;

        let ambient = &mut self.ambient;
        let layer = &mut self.layers[index];

        layer.state.numerator = ambient.numerator;
        layer.state.denominator = ambient.denominator;
        layer.state.meter_ratio = ambient.meter_ratio;
        layer.state.tp_sec = ambient.tp_sec;
        layer.state.tp_measure = ambient.tp_measure;
        layer.state.sp_measure = ambient.sp_measure;

        layer.state.restore_to(ambient);

        if is_poly {
            ambient.numerator = ambient.poly_numerator;
            ambient.denominator = ambient.poly_denominator;
            ambient.meter_ratio = ambient.poly_numerator as f64 / ambient.poly_denominator.max(1) as f64;
            ambient.measures_per_phrase = ambient.measures_per_phrase_poly;
        } else {
            ambient.measures_per_phrase = ambient.measures_per_phrase_primary;
        }
        ambient.tp_phrase = ambient.tp_measure * ambient.measures_per_phrase as f64;
        ambient.sp_phrase = ambient.sp_measure * ambient.measures_per_phrase as f64;

        self.active = Some(index);
        tracing::debug!(
            "Activated '{}' at tick {} ({} x{})",
            name,
            ambient.phrase_start,
            ambient.meter(),
            ambient.measures_per_phrase
        );

        Ok(ActivationSnapshot {
            layer: name.to_string(),
            is_poly,
            meter: ambient.meter(),
            measures_per_phrase: ambient.measures_per_phrase,
            tp_sec: ambient.tp_sec,
            tp_measure: ambient.tp_measure,
            sp_measure: ambient.sp_measure,
            tp_phrase: ambient.tp_phrase,
            sp_phrase: ambient.sp_phrase,
            phrase_start: ambient.phrase_start,
            phrase_start_time: ambient.phrase_start_time,
        })
    }

    /// Save ambient state into `name`, move its cursor, and restore it.
    ///
    /// Only the active layer owns ambient state. Advancing any other layer
    /// moves its saved cursor alone and leaves ambient state untouched.
    /// Unknown names are ignored.
    pub fn advance(&mut self, name: &str, kind: AdvanceKind) {
        let Some(index) = self.index_of(name) else {
            tracing::debug!("Ignoring advance of unregistered layer '{}'", name);
            return;
        };
        let is_active = self.active == Some(index);

        let layer = &mut self.layers[index];
        if is_active {
            layer.state.save_from(&self.ambient);
        } else {
            tracing::warn!(
                "Advancing inactive layer '{}' from its saved cursor",
                name
            );
        }
        match kind {
            AdvanceKind::Phrase => {
                let (tp_phrase, sp_phrase) = (layer.state.tp_phrase, layer.state.sp_phrase);
                layer.state.advance_phrase(tp_phrase, sp_phrase);
            }
            AdvanceKind::Section => layer.state.advance_section(),
        }
        if is_active {
            layer.state.restore_to(&mut self.ambient);
        }
    }

    pub fn ambient(&self) -> &AmbientTiming {
        &self.ambient
    }

    /// Ambient state, for staging the next phrase's meter and counts
    pub fn ambient_mut(&mut self) -> &mut AmbientTiming {
        &mut self.ambient
    }

    pub fn active_name(&self) -> Option<&str> {
        self.active.map(|i| self.layers[i].name.as_str())
    }

    /// Ambient state together with the layer that owns it
    pub fn active_parts(&mut self) -> Result<(&mut AmbientTiming, &mut Layer)> {
        let index = self.active.ok_or(TactusError::NoActiveLayer)?;
        Ok((&mut self.ambient, &mut self.layers[index]))
    }

    pub fn layer(&self, name: &str) -> Option<&Layer> {
        self.layers.iter().find(|l| l.name == name)
    }

    pub fn layer_mut(&mut self, name: &str) -> Option<&mut Layer> {
        self.layers.iter_mut().find(|l| l.name == name)
    }

    /// Layers in registration order
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.layers.iter().position(|l| l.name == name)
    }
}
