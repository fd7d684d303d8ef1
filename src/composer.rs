//! Composer seams
//!
//! The timing engine never picks meters or notes itself. It asks a
//! [`MeterProvider`] for a meter per phrase and for the child counts below
//! each beat, and hands every closed unit to a [`Performer`] that may write
//! note events into the layer's buffer.

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::{CountRange, MeterRanges};
use crate::error::{Result, TactusError};
use crate::hierarchy::{UnitLevel, UnitNode};
use crate::layers::{Event, EventBuffer, EventKind};
use crate::timing::Meter;

/// Draws allowed per meter request before giving up and using 4/4
const MAX_METER_DRAWS: usize = 200;

/// What a meter is being requested for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeterRole {
    /// The primary layer's meter for the next phrase
    Primary,
    /// A candidate poly-layer meter; ratio bounds do not apply
    Poly,
    /// Replacement primary meter after alignment gave up; both layers share it
    Fallback,
}

/// Supplies meters and per-level child counts
pub trait MeterProvider {
    /// Provider name, for logs
    fn name(&self) -> &str;

    fn meter(&mut self, role: MeterRole) -> Meter;

    /// Divisions per beat (may return 0; callers coerce to 1)
    fn divisions(&mut self) -> u32;

    /// Subdivisions per division
    fn subdivisions(&mut self) -> u32;

    /// Subsubdivisions per subdivision
    fn subsubdivisions(&mut self) -> u32;
}

/// Deterministic provider, mostly for tests and fixed-meter renders
#[derive(Debug, Clone)]
pub struct FixedMeterProvider {
    primary: Meter,
    poly: Vec<Meter>,
    next_poly: usize,
    divisions: u32,
    subdivisions: u32,
    subsubdivisions: u32,
}

impl FixedMeterProvider {
    /// Always answer `primary`; poly requests get `primary` too until
    /// [`with_poly_meters`](Self::with_poly_meters) is used.
    pub fn new(primary: Meter) -> Result<Self> {
        primary.validate()?;
        Ok(Self {
            primary,
            poly: Vec::new(),
            next_poly: 0,
            divisions: 2,
            subdivisions: 2,
            subsubdivisions: 1,
        })
    }

    /// Cycle through `meters` for poly requests
    pub fn with_poly_meters(mut self, meters: Vec<Meter>) -> Result<Self> {
        if meters.is_empty() {
            return Err(TactusError::invalid("poly_meters", "[]"));
        }
        for meter in &meters {
            meter.validate()?;
        }
        self.poly = meters;
        self.next_poly = 0;
        Ok(self)
    }

    /// Fixed child counts below the beat. Zeros are allowed here.
    pub fn with_counts(mut self, divisions: u32, subdivisions: u32, subsubdivisions: u32) -> Self {
        self.divisions = divisions;
        self.subdivisions = subdivisions;
        self.subsubdivisions = subsubdivisions;
        self
    }
}

impl MeterProvider for FixedMeterProvider {
    fn name(&self) -> &str {
        "fixed"
    }

    fn meter(&mut self, role: MeterRole) -> Meter {
        match role {
            MeterRole::Primary | MeterRole::Fallback => self.primary,
            MeterRole::Poly => {
                if self.poly.is_empty() {
                    return self.primary;
                }
                let meter = self.poly[self.next_poly % self.poly.len()];
                self.next_poly += 1;
                meter
            }
        }
    }

    fn divisions(&mut self) -> u32 {
        self.divisions
    }

    fn subdivisions(&mut self) -> u32 {
        self.subdivisions
    }

    fn subsubdivisions(&mut self) -> u32 {
        self.subsubdivisions
    }
}

/// Seeded random provider.
///
/// Successive meters must move by at least `min_log_steps` octaves of ratio
/// and at most `max_log_steps_*`, measured against the last meter handed
/// out for any role.
#[derive(Debug, Clone)]
pub struct RandomMeterProvider {
    ranges: MeterRanges,
    rng: StdRng,
    last_meter: Option<Meter>,
}

impl RandomMeterProvider {
    pub fn new(ranges: MeterRanges, seed: u64) -> Result<Self> {
        if ranges.numerator.min == 0 || ranges.denominator.min == 0 {
            return Err(TactusError::InvalidConfig {
                reason: "meter ranges must exclude zero".to_string(),
            });
        }
        if !(ranges.min_ratio > 0.0 && ranges.min_ratio <= ranges.max_ratio) {
            return Err(TactusError::InvalidConfig {
                reason: format!(
                    "meter ratio bounds [{}, {}] are empty",
                    ranges.min_ratio, ranges.max_ratio
                ),
            });
        }
        if ranges.min_log_steps > ranges.max_log_steps_primary
            || ranges.min_log_steps > ranges.max_log_steps_poly
        {
            return Err(TactusError::InvalidConfig {
                reason: "min_log_steps exceeds a max_log_steps bound".to_string(),
            });
        }
        Ok(Self {
            ranges,
            rng: StdRng::seed_from_u64(seed),
            last_meter: None,
        })
    }

    fn accepts(&self, candidate: Meter, role: MeterRole) -> bool {
        let ratio = candidate.ratio();
        if role == MeterRole::Primary
            && (ratio < self.ranges.min_ratio || ratio > self.ranges.max_ratio)
        {
            return false;
        }
        let Some(last) = self.last_meter else {
            return true;
        };
        let max_steps = match role {
            MeterRole::Primary => self.ranges.max_log_steps_primary,
            MeterRole::Poly | MeterRole::Fallback => self.ranges.max_log_steps_poly,
        };
        let steps = (ratio / last.ratio()).log2().abs();
        steps >= self.ranges.min_log_steps && steps <= max_steps
    }

    fn count(&mut self, range: CountRange) -> u32 {
        range.sample(&mut self.rng)
    }
}

impl MeterProvider for RandomMeterProvider {
    fn name(&self) -> &str {
        "random"
    }

    fn meter(&mut self, role: MeterRole) -> Meter {
        for _ in 0..MAX_METER_DRAWS {
            let numerator = self.ranges.numerator.sample(&mut self.rng);
            let denominator = self.ranges.denominator.sample(&mut self.rng);
            let candidate = Meter::new(numerator, denominator);
            if self.accepts(candidate, role) {
                self.last_meter = Some(candidate);
                return candidate;
            }
        }
        tracing::warn!(
            "No {:?} meter satisfied the ratio bounds after {} draws; using 4/4",
            role,
            MAX_METER_DRAWS
        );
        let meter = Meter::default();
        self.last_meter = Some(meter);
        meter
    }

    fn divisions(&mut self) -> u32 {
        self.count(self.ranges.divisions)
    }

    fn subdivisions(&mut self) -> u32 {
        self.count(self.ranges.subdivisions)
    }

    fn subsubdivisions(&mut self) -> u32 {
        self.count(self.ranges.subsubdivisions)
    }
}

/// Receives every unit once its range is final
pub trait Performer {
    fn on_unit(&mut self, unit: &UnitNode, buffer: &mut EventBuffer);
}

/// Performer that writes nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentPerformer;

impl Performer for SilentPerformer {
    fn on_unit(&mut self, _unit: &UnitNode, _buffer: &mut EventBuffer) {}
}

/// Metronome: one note per beat, accented on the downbeat
#[derive(Debug, Clone)]
pub struct ClickPerformer {
    pub channel: u8,
    pub note: u8,
    pub accent_note: u8,
    pub velocity: u8,
    pub accent_velocity: u8,
}

impl Default for ClickPerformer {
    fn default() -> Self {
        // GM percussion side stick / hi wood block
        Self {
            channel: 9,
            note: 37,
            accent_note: 76,
            velocity: 80,
            accent_velocity: 110,
        }
    }
}

impl Performer for ClickPerformer {
    fn on_unit(&mut self, unit: &UnitNode, buffer: &mut EventBuffer) {
        if unit.level != UnitLevel::Beat {
            return;
        }
        let Some(hash) = unit.unit_hash.clone() else {
            return;
        };
        let (note, velocity) = if unit.index == 0 {
            (self.accent_note, self.accent_velocity)
        } else {
            (self.note, self.velocity)
        };
        buffer.push(Event::for_unit(
            unit.start_tick_rounded(),
            EventKind::NoteOn {
                channel: self.channel,
                note,
                velocity,
            },
            &hash,
        ));
        buffer.push(Event::for_unit(
            unit.end_tick_rounded(),
            EventKind::NoteOff {
                channel: self.channel,
                note,
            },
            &hash,
        ));
    }
}
