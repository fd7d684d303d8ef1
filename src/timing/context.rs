//! Per-layer timing cursors and the ambient timing state they swap in and out of.
//!
//! `AmbientTiming` is the single "current" view of timing that unit
//! computation reads. Exactly one layer owns it at a time; a layer's
//! `TimingContext` is copied into it on activation and copied back out on
//! advancement.

use serde::{Deserialize, Serialize};

use super::calculator::{Meter, TimingRates};

/// Default ticks per quarter note when nothing else is configured
pub const DEFAULT_PPQ: u32 = 480;

/// The timing state visible to unit computation for the active layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmbientTiming {
    // Meter in effect for the active layer
    pub numerator: u32,
    pub denominator: u32,
    pub meter_ratio: f64,
    pub poly_numerator: u32,
    pub poly_denominator: u32,
    pub midi_meter: Meter,
    pub midi_meter_ratio: f64,
    pub sync_factor: f64,
    pub bpm: f64,
    pub midi_bpm: f64,

    // Rates
    pub tp_sec: f64,
    pub tp_measure: f64,
    pub sp_measure: f64,

    // Phrase shape
    pub measures_per_phrase: u32,
    pub measures_per_phrase_primary: u32,
    pub measures_per_phrase_poly: u32,
    pub tp_phrase: f64,
    pub sp_phrase: f64,
    pub phrases_per_section: u32,
    pub total_sections: u32,

    // Cursors
    pub phrase_start: f64,
    pub phrase_start_time: f64,
    pub section_start: f64,
    pub section_start_time: f64,
    pub section_end: f64,
    pub tp_section: f64,
    pub sp_section: f64,
    pub measure_start: f64,
    pub measure_start_time: f64,
}

impl Default for AmbientTiming {
    fn default() -> Self {
        Self::new(DEFAULT_PPQ)
    }
}

impl AmbientTiming {
    /// Ambient state before any meter has been resolved (4/4, no rate)
    pub fn new(ppq: u32) -> Self {
        Self {
            numerator: 4,
            denominator: 4,
            meter_ratio: 1.0,
            poly_numerator: 4,
            poly_denominator: 4,
            midi_meter: Meter::default(),
            midi_meter_ratio: 1.0,
            sync_factor: 1.0,
            bpm: 0.0,
            midi_bpm: 0.0,
            tp_sec: 0.0,
            tp_measure: ppq as f64 * 4.0,
            sp_measure: 0.0,
            measures_per_phrase: 1,
            measures_per_phrase_primary: 1,
            measures_per_phrase_poly: 1,
            tp_phrase: 0.0,
            sp_phrase: 0.0,
            phrases_per_section: 1,
            total_sections: 1,
            phrase_start: 0.0,
            phrase_start_time: 0.0,
            section_start: 0.0,
            section_start_time: 0.0,
            section_end: 0.0,
            tp_section: 0.0,
            sp_section: 0.0,
            measure_start: 0.0,
            measure_start_time: 0.0,
        }
    }

    /// Install freshly computed rates for the meter about to be used
    pub fn apply_rates(&mut self, rates: &TimingRates) {
        self.numerator = rates.meter.numerator;
        self.denominator = rates.meter.denominator;
        self.meter_ratio = rates.meter_ratio;
        self.midi_meter = rates.midi_meter;
        self.midi_meter_ratio = rates.midi_meter_ratio;
        self.sync_factor = rates.sync_factor;
        self.bpm = rates.bpm;
        self.midi_bpm = rates.midi_bpm;
        self.tp_sec = rates.tp_sec;
        self.tp_measure = rates.tp_measure;
        self.sp_measure = rates.sp_measure;
    }

    /// The true meter in effect
    pub fn meter(&self) -> Meter {
        Meter::new(self.numerator, self.denominator)
    }

    pub fn set_poly_meter(&mut self, meter: Meter) {
        self.poly_numerator = meter.numerator;
        self.poly_denominator = meter.denominator;
    }

    /// Stage the per-layer measure counts chosen by phrase alignment
    pub fn set_measures_per_phrase(&mut self, primary: u32, poly: u32) {
        self.measures_per_phrase_primary = primary;
        self.measures_per_phrase_poly = poly;
    }
}

/// Optional overrides merged over `TimingContext` defaults at registration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InitialTiming {
    pub phrase_start: Option<f64>,
    pub phrase_start_time: Option<f64>,
    pub section_start: Option<f64>,
    pub section_start_time: Option<f64>,
    pub section_end: Option<f64>,
    pub tp_sec: Option<f64>,
    pub numerator: Option<u32>,
    pub denominator: Option<u32>,
    pub measures_per_phrase: Option<u32>,
    pub tp_measure: Option<f64>,
    pub sp_measure: Option<f64>,
}

/// Saved timing cursor of one layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingContext {
    pub phrase_start: f64,
    pub phrase_start_time: f64,
    pub section_start: f64,
    pub section_start_time: f64,
    pub section_end: f64,
    pub tp_sec: f64,
    pub tp_section: f64,
    pub sp_section: f64,
    pub numerator: u32,
    pub denominator: u32,
    pub measures_per_phrase: u32,
    pub tp_phrase: f64,
    pub sp_phrase: f64,
    pub measure_start: f64,
    pub measure_start_time: f64,
    pub tp_measure: f64,
    pub sp_measure: f64,
    pub meter_ratio: f64,
    /// Name of the buffer this context writes to
    pub buffer_name: String,
}

impl Default for TimingContext {
    fn default() -> Self {
        Self::new(DEFAULT_PPQ)
    }
}

impl TimingContext {
    /// A zeroed cursor in 4/4
    pub fn new(ppq: u32) -> Self {
        Self::from_initial(&InitialTiming::default(), ppq)
    }

    /// Merge `initial` over the defaults
    pub fn from_initial(initial: &InitialTiming, ppq: u32) -> Self {
        let numerator = initial.numerator.unwrap_or(4);
        let denominator = initial.denominator.unwrap_or(4).max(1);
        Self {
            phrase_start: initial.phrase_start.unwrap_or(0.0),
            phrase_start_time: initial.phrase_start_time.unwrap_or(0.0),
            section_start: initial.section_start.unwrap_or(0.0),
            section_start_time: initial.section_start_time.unwrap_or(0.0),
            section_end: initial.section_end.unwrap_or(0.0),
            tp_sec: initial.tp_sec.unwrap_or(0.0),
            tp_section: 0.0,
            sp_section: 0.0,
            numerator,
            denominator,
            measures_per_phrase: initial.measures_per_phrase.unwrap_or(1),
            tp_phrase: 0.0,
            sp_phrase: 0.0,
            measure_start: 0.0,
            measure_start_time: 0.0,
            tp_measure: initial.tp_measure.unwrap_or(ppq as f64 * 4.0),
            sp_measure: initial.sp_measure.unwrap_or(0.0),
            meter_ratio: numerator as f64 / denominator as f64,
            buffer_name: String::new(),
        }
    }

    /// Copy the active layer's fields out of ambient state
    pub fn save_from(&mut self, ambient: &AmbientTiming) {
        self.phrase_start = ambient.phrase_start;
        self.phrase_start_time = ambient.phrase_start_time;
        self.section_start = ambient.section_start;
        self.section_start_time = ambient.section_start_time;
        self.section_end = ambient.section_end;
        self.tp_sec = ambient.tp_sec;
        self.tp_section = ambient.tp_section;
        self.sp_section = ambient.sp_section;
        self.numerator = ambient.numerator;
        self.denominator = ambient.denominator;
        self.measures_per_phrase = ambient.measures_per_phrase;
        self.tp_phrase = ambient.tp_phrase;
        self.sp_phrase = ambient.sp_phrase;
        self.measure_start = ambient.measure_start;
        self.measure_start_time = ambient.measure_start_time;
        self.tp_measure = ambient.tp_measure;
        self.sp_measure = ambient.sp_measure;
        self.meter_ratio = ambient.numerator as f64 / ambient.denominator.max(1) as f64;
    }

    /// Copy this layer's cursor and rates into ambient state.
    ///
    /// The meter and measure counts are left alone: they belong to whoever
    /// staged them for the upcoming phrase.
    pub fn restore_to(&self, ambient: &mut AmbientTiming) {
        ambient.phrase_start = self.phrase_start;
        ambient.phrase_start_time = self.phrase_start_time;
        ambient.section_start = self.section_start;
        ambient.section_start_time = self.section_start_time;
        ambient.section_end = self.section_end;
        ambient.tp_sec = self.tp_sec;
        ambient.tp_section = self.tp_section;
        ambient.sp_section = self.sp_section;
        ambient.tp_phrase = self.tp_phrase;
        ambient.sp_phrase = self.sp_phrase;
        ambient.measure_start = self.measure_start;
        ambient.measure_start_time = self.measure_start_time;
        ambient.tp_measure = self.tp_measure;
        ambient.sp_measure = self.sp_measure;
    }

    /// Move the phrase cursor forward and accumulate into the section
    pub fn advance_phrase(&mut self, tp_phrase: f64, sp_phrase: f64) {
        self.phrase_start += tp_phrase;
        self.phrase_start_time += sp_phrase;
        self.tp_section += tp_phrase;
        self.sp_section += sp_phrase;
    }

    /// Close the section accumulators into the section cursor
    pub fn advance_section(&mut self) {
        self.section_start += self.tp_section;
        self.section_start_time += self.sp_section;
        self.section_end += self.tp_section;
        self.tp_section = 0.0;
        self.sp_section = 0.0;
    }

    pub fn meter(&self) -> Meter {
        Meter::new(self.numerator, self.denominator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::TimingCalculator;
    use approx::assert_relative_eq;

    #[test]
    fn test_defaults() {
        let ctx = TimingContext::new(480);
        assert_eq!(ctx.meter(), Meter::new(4, 4));
        assert_eq!(ctx.tp_measure, 1920.0);
        assert_eq!(ctx.measures_per_phrase, 1);
        assert_eq!(ctx.meter_ratio, 1.0);
    }

    #[test]
    fn test_initial_overrides_merge() {
        let initial = InitialTiming {
            phrase_start: Some(960.0),
            numerator: Some(3),
            ..Default::default()
        };
        let ctx = TimingContext::from_initial(&initial, 240);
        assert_eq!(ctx.phrase_start, 960.0);
        assert_eq!(ctx.numerator, 3);
        assert_eq!(ctx.denominator, 4);
        assert_eq!(ctx.tp_measure, 960.0);
        assert_eq!(ctx.meter_ratio, 0.75);
    }

    #[test]
    fn test_advance_phrase_accumulates_without_touching_section_start() {
        let mut ctx = TimingContext::new(480);
        ctx.advance_phrase(3360.0, 2.8);
        assert_eq!(ctx.phrase_start, 3360.0);
        assert_eq!(ctx.tp_section, 3360.0);
        assert_relative_eq!(ctx.sp_section, 2.8);
        assert_eq!(ctx.section_start, 0.0);
    }

    #[test]
    fn test_advance_phrase_composes() {
        for n in 1..=40u32 {
            let (x, y) = (1234.0, 1.7320508);
            let mut stepped = TimingContext::new(480);
            for _ in 0..n {
                stepped.advance_phrase(x, y);
            }
            let mut once = TimingContext::new(480);
            once.advance_phrase(n as f64 * x, n as f64 * y);

            assert_eq!(stepped.phrase_start, once.phrase_start);
            assert_relative_eq!(stepped.phrase_start_time, once.phrase_start_time, max_relative = 1e-12);
        }
    }

    #[test]
    fn test_advance_section_resets_accumulators() {
        for prior in [0.0, 1.0, 1920.0, 123456.5] {
            let mut ctx = TimingContext::new(480);
            ctx.tp_section = prior;
            ctx.sp_section = prior / 1000.0;
            ctx.advance_section();
            assert_eq!(ctx.tp_section, 0.0);
            assert_eq!(ctx.sp_section, 0.0);
            assert_eq!(ctx.section_start, prior);
            assert_eq!(ctx.section_end, prior);
        }
    }

    #[test]
    fn test_save_restore_round_trip() {
        let mut ambient = AmbientTiming::new(480);
        let rates = TimingCalculator::compute(120.0, 480, Meter::new(7, 5)).unwrap();
        ambient.apply_rates(&rates);
        ambient.phrase_start = 6720.0;
        ambient.phrase_start_time = 5.6;
        ambient.tp_section = 6720.0;
        ambient.sp_section = 5.6;

        let mut ctx = TimingContext::new(480);
        ctx.save_from(&ambient);
        assert_eq!(ctx.meter(), Meter::new(7, 5));
        assert_relative_eq!(ctx.meter_ratio, 1.4);

        let mut other = AmbientTiming::new(480);
        ctx.restore_to(&mut other);
        assert_eq!(other.phrase_start, 6720.0);
        assert_eq!(other.tp_sec, rates.tp_sec);
        assert_eq!(other.sp_measure, rates.sp_measure);
        // meter is staged by the caller, not restored
        assert_eq!(other.meter(), Meter::new(4, 4));
    }
}
