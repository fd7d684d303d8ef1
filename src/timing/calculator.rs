//! Meter spoofing and per-measure rate math.
//!
//! MIDI only expresses power-of-two denominators. A true meter such as 7/5
//! is exported as the nearest legal meter (7/4) and the exported tempo is
//! scaled by `sync_factor` so that one exported measure still lasts exactly
//! as many real seconds as one true measure.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TactusError};

/// A time signature. `numerator / denominator` is the true meter ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Meter {
    pub numerator: u32,
    pub denominator: u32,
}

impl Meter {
    pub const fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// True meter ratio (never altered by spoofing)
    pub fn ratio(&self) -> f64 {
        self.numerator as f64 / self.denominator as f64
    }

    /// Whether this meter can be written to a MIDI file as-is
    pub fn is_midi_legal(&self) -> bool {
        self.denominator.is_power_of_two()
    }

    /// Reject zero components
    pub fn validate(&self) -> Result<()> {
        if self.numerator == 0 {
            return Err(TactusError::invalid("numerator", self.numerator));
        }
        if self.denominator == 0 {
            return Err(TactusError::invalid("denominator", self.denominator));
        }
        Ok(())
    }

    /// The power-of-two neighbour whose ratio is closest to the true ratio.
    ///
    /// Ties go to the lower denominator (the larger ratio).
    pub fn midi_meter(&self) -> Meter {
        if self.is_midi_legal() {
            return *self;
        }
        let hi = self.denominator.next_power_of_two();
        let lo = hi / 2;
        let ratio = self.ratio();
        let num = self.numerator as f64;
        if (ratio - num / hi as f64).abs() < (ratio - num / lo as f64).abs() {
            Meter::new(self.numerator, hi)
        } else {
            Meter::new(self.numerator, lo)
        }
    }
}

impl Default for Meter {
    fn default() -> Self {
        Meter::new(4, 4)
    }
}

impl fmt::Display for Meter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

impl FromStr for Meter {
    type Err = TactusError;

    fn from_str(s: &str) -> Result<Self> {
        let (num, den) = s
            .split_once('/')
            .ok_or_else(|| TactusError::invalid("meter", s))?;
        let numerator = num
            .trim()
            .parse::<u32>()
            .map_err(|_| TactusError::invalid("numerator", num))?;
        let denominator = den
            .trim()
            .parse::<u32>()
            .map_err(|_| TactusError::invalid("denominator", den))?;
        let meter = Meter::new(numerator, denominator);
        meter.validate()?;
        Ok(meter)
    }
}

/// Derived rates for one measure of one meter at one tempo
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimingRates {
    /// Tempo the rates were computed for (beats per minute)
    pub bpm: f64,
    /// Ticks per quarter note
    pub ppq: u32,
    /// The true meter
    pub meter: Meter,
    /// The exported (spoofed) meter
    pub midi_meter: Meter,
    pub meter_ratio: f64,
    pub midi_meter_ratio: f64,
    /// `midi_meter_ratio / meter_ratio`
    pub sync_factor: f64,
    /// Tempo written to the exported file
    pub midi_bpm: f64,
    /// Ticks per real second
    pub tp_sec: f64,
    /// Ticks per measure
    pub tp_measure: f64,
    /// Real seconds per measure
    pub sp_measure: f64,
}

/// Pure calculator reconciling the exported meter with real elapsed time
pub struct TimingCalculator;

impl TimingCalculator {
    /// Compute spoofed-meter rates for one measure
    ///
    /// # Errors
    /// `InvalidParameter` when `bpm` is non-finite or not positive, `ppq`
    /// is zero, or either meter component is zero.
    ///
    /// # Example
    /// ```
    /// use tactus::timing::{Meter, TimingCalculator};
    /// let rates = TimingCalculator::compute(120.0, 480, Meter::new(7, 5)).unwrap();
    /// assert_eq!(rates.midi_meter, Meter::new(7, 4));
    /// assert!((rates.tp_measure / rates.tp_sec - rates.sp_measure).abs() < 1e-12);
    /// ```
    pub fn compute(bpm: f64, ppq: u32, meter: Meter) -> Result<TimingRates> {
        if !bpm.is_finite() || bpm <= 0.0 {
            return Err(TactusError::invalid("bpm", bpm));
        }
        if ppq == 0 {
            return Err(TactusError::invalid("ppq", ppq));
        }
        meter.validate()?;

        let midi_meter = meter.midi_meter();
        let meter_ratio = meter.ratio();
        let midi_meter_ratio = midi_meter.ratio();
        let sync_factor = midi_meter_ratio / meter_ratio;
        let midi_bpm = bpm * sync_factor;
        let ppq_f = ppq as f64;

        Ok(TimingRates {
            bpm,
            ppq,
            meter,
            midi_meter,
            meter_ratio,
            midi_meter_ratio,
            sync_factor,
            midi_bpm,
            tp_sec: midi_bpm * ppq_f / 60.0,
            tp_measure: ppq_f * 4.0 * midi_meter_ratio,
            sp_measure: (60.0 / bpm) * 4.0 * meter_ratio,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use test_case::test_case;

    #[test]
    fn test_spoofed_seven_five() {
        let rates = TimingCalculator::compute(120.0, 480, Meter::new(7, 5)).unwrap();
        assert_eq!(rates.midi_meter, Meter::new(7, 4));
        assert_relative_eq!(rates.midi_meter_ratio, 1.75, max_relative = 1e-12);
        assert_relative_eq!(rates.sync_factor, 1.25, max_relative = 1e-12);
        assert_relative_eq!(rates.midi_bpm, 150.0, max_relative = 1e-12);
        assert_relative_eq!(rates.tp_sec, 1200.0, max_relative = 1e-12);
        assert_relative_eq!(rates.tp_measure, 3360.0, max_relative = 1e-12);
        assert_relative_eq!(rates.sp_measure, 2.8, max_relative = 1e-12);
        assert_relative_eq!(rates.tp_measure / rates.tp_sec, 2.8, max_relative = 1e-12);
    }

    #[test]
    fn test_power_of_two_passthrough() {
        let rates = TimingCalculator::compute(72.0, 480, Meter::new(4, 4)).unwrap();
        assert_eq!(rates.midi_meter, Meter::new(4, 4));
        assert_eq!(rates.sync_factor, 1.0);
        assert_relative_eq!(rates.tp_measure, 1920.0, max_relative = 1e-12);
        assert_relative_eq!(rates.sp_measure, 10.0 / 3.0, max_relative = 1e-12);
    }

    #[test_case(Meter::new(5, 6), Meter::new(5, 8) ; "six rounds up")]
    #[test_case(Meter::new(3, 5), Meter::new(3, 4) ; "five rounds down")]
    #[test_case(Meter::new(7, 12), Meter::new(7, 16) ; "twelve rounds up")]
    #[test_case(Meter::new(4, 3), Meter::new(4, 4) ; "three rounds up")]
    #[test_case(Meter::new(5, 7), Meter::new(5, 8) ; "seven rounds up")]
    #[test_case(Meter::new(9, 1), Meter::new(9, 1) ; "one is a power of two")]
    fn test_midi_meter_choice(meter: Meter, expected: Meter) {
        assert_eq!(meter.midi_meter(), expected);
    }

    #[test]
    fn test_duration_invariant_grid() {
        for &ppq in &[120u32, 240, 480, 960] {
            for bpm in [0.5, 1.0, 33.3, 72.0, 120.0, 187.5, 299.9, 300.0] {
                for num in 1..=32u32 {
                    for den in 1..=32u32 {
                        let rates = TimingCalculator::compute(bpm, ppq, Meter::new(num, den)).unwrap();
                        assert_relative_eq!(
                            rates.tp_measure / rates.tp_sec,
                            rates.sp_measure,
                            max_relative = 1e-9
                        );
                    }
                }
            }
        }
    }

    #[test_case(0.0, 480, Meter::new(4, 4), "bpm")]
    #[test_case(-12.0, 480, Meter::new(4, 4), "bpm")]
    #[test_case(f64::NAN, 480, Meter::new(4, 4), "bpm")]
    #[test_case(f64::INFINITY, 480, Meter::new(4, 4), "bpm")]
    #[test_case(120.0, 0, Meter::new(4, 4), "ppq")]
    #[test_case(120.0, 480, Meter::new(0, 4), "numerator")]
    #[test_case(120.0, 480, Meter::new(4, 0), "denominator")]
    fn test_invalid_parameters(bpm: f64, ppq: u32, meter: Meter, expected: &str) {
        match TimingCalculator::compute(bpm, ppq, meter) {
            Err(TactusError::InvalidParameter { name, .. }) => assert_eq!(name, expected),
            other => panic!("Expected InvalidParameter, got {:?}", other),
        }
    }

    #[test]
    fn test_meter_parse() {
        assert_eq!("7/5".parse::<Meter>().unwrap(), Meter::new(7, 5));
        assert_eq!(" 3 / 8 ".parse::<Meter>().unwrap(), Meter::new(3, 8));
        assert!("7".parse::<Meter>().is_err());
        assert!("7/0".parse::<Meter>().is_err());
        assert_eq!(Meter::new(11, 16).to_string(), "11/16");
    }
}
