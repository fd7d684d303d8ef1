//! Cross-layer phrase alignment.
//!
//! The primary and poly layers run independently chosen meters. Their ticks
//! never line up, but each phrase must last the same number of real seconds
//! on both layers, so the measure counts per phrase are chosen such that
//! `primary_measures * sp_measure_primary == poly_measures * sp_measure_poly`.

use serde::{Deserialize, Serialize};

use super::calculator::{Meter, TimingCalculator, TimingRates};
use crate::composer::{MeterProvider, MeterRole};
use crate::error::Result;

/// Search bounds for phrase alignment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentConfig {
    /// Largest measure count tried on either layer
    pub max_measures: u32,
    /// Allowed disagreement between the two phrase durations, in seconds
    pub tolerance_secs: f64,
    /// Poly meters requested before falling back
    pub max_attempts: u32,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            max_measures: 6,
            tolerance_secs: 1e-6,
            max_attempts: 100,
        }
    }
}

/// Meters, rates and measure counts agreed for one phrase
#[derive(Debug, Clone, PartialEq)]
pub struct PhraseAlignment {
    pub primary_rates: TimingRates,
    pub poly_rates: TimingRates,
    pub primary_measures: u32,
    pub poly_measures: u32,
    /// Poly meters requested before a match was found
    pub attempts: u32,
    /// True when no poly meter matched and both layers share the primary meter
    pub fallback: bool,
}

impl PhraseAlignment {
    pub fn primary_meter(&self) -> Meter {
        self.primary_rates.meter
    }

    pub fn poly_meter(&self) -> Meter {
        self.poly_rates.meter
    }

    /// Real seconds of one primary-layer phrase
    pub fn primary_phrase_secs(&self) -> f64 {
        self.primary_measures as f64 * self.primary_rates.sp_measure
    }

    /// Real seconds of one poly-layer phrase
    pub fn poly_phrase_secs(&self) -> f64 {
        self.poly_measures as f64 * self.poly_rates.sp_measure
    }

    /// Absolute disagreement between the two phrase durations
    pub fn drift_secs(&self) -> f64 {
        (self.primary_phrase_secs() - self.poly_phrase_secs()).abs()
    }
}

/// Smallest `(primary, poly)` measure counts whose durations agree.
///
/// Returns `None` when nothing in `1..=max_measures` matches, or when the
/// best match is the trivial one-against-one pairing (identical ratios are
/// not a polyrhythm).
pub fn find_measure_counts(
    sp_measure_primary: f64,
    sp_measure_poly: f64,
    max_measures: u32,
    tolerance_secs: f64,
) -> Option<(u32, u32)> {
    let mut best: Option<(u32, u32)> = None;
    for primary in 1..=max_measures {
        for poly in 1..=max_measures {
            let drift = (primary as f64 * sp_measure_primary - poly as f64 * sp_measure_poly).abs();
            if drift >= tolerance_secs {
                continue;
            }
            let better = match best {
                Some((p, q)) => primary + poly < p + q,
                None => true,
            };
            if better {
                best = Some((primary, poly));
            }
        }
    }
    best.filter(|&(p, q)| p + q > 2)
}

/// Choose the poly meter and both measure counts for the next phrase
///
/// Requests poly meters from `provider` until one aligns with `primary`.
/// After `max_attempts` misses a fresh primary meter is requested and both
/// layers fall back to it with one measure each.
pub fn resolve_alignment(
    bpm: f64,
    ppq: u32,
    primary: Meter,
    provider: &mut dyn MeterProvider,
    config: &AlignmentConfig,
) -> Result<PhraseAlignment> {
    let primary_rates = TimingCalculator::compute(bpm, ppq, primary)?;

    for attempt in 1..=config.max_attempts {
        let poly = provider.meter(MeterRole::Poly);
        if poly.validate().is_err() || poly == primary {
            continue;
        }
        let poly_rates = TimingCalculator::compute(bpm, ppq, poly)?;
        if let Some((primary_measures, poly_measures)) = find_measure_counts(
            primary_rates.sp_measure,
            poly_rates.sp_measure,
            config.max_measures,
            config.tolerance_secs,
        ) {
            tracing::debug!(
                "Aligned {} x{} with {} x{} after {} attempt(s)",
                primary,
                primary_measures,
                poly,
                poly_measures,
                attempt
            );
            return Ok(PhraseAlignment {
                primary_rates,
                poly_rates,
                primary_measures,
                poly_measures,
                attempts: attempt,
                fallback: false,
            });
        }
    }

    let mut fallback = provider.meter(MeterRole::Fallback);
    if fallback.validate().is_err() {
        fallback = Meter::default();
    }
    tracing::warn!(
        "No poly meter aligned with {} after {} attempts; both layers fall back to {}",
        primary,
        config.max_attempts,
        fallback
    );
    let rates = TimingCalculator::compute(bpm, ppq, fallback)?;
    Ok(PhraseAlignment {
        primary_rates: rates,
        poly_rates: rates,
        primary_measures: 1,
        poly_measures: 1,
        attempts: config.max_attempts,
        fallback: true,
    })
}
