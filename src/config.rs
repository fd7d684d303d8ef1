//! Engine configuration
//!
//! Loaded from a JSON file (every field optional, missing fields take the
//! defaults below) and overridden by CLI flags.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TactusError};
use crate::hierarchy::LogFilter;
use crate::timing::{AlignmentConfig, DEFAULT_PPQ};

/// Default tempo in beats per minute
pub const DEFAULT_BPM: f64 = 72.0;

/// Default silence appended after the last section, in seconds
pub const DEFAULT_SILENT_OUTRO_SECONDS: f64 = 5.0;

/// Inclusive integer range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountRange {
    pub min: u32,
    pub max: u32,
}

impl CountRange {
    pub const fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    /// Uniform draw from `min..=max`
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> u32 {
        rng.gen_range(self.min..=self.max.max(self.min))
    }

    fn validate(&self, name: &str, allow_zero: bool) -> Result<()> {
        if self.min > self.max {
            return Err(TactusError::InvalidConfig {
                reason: format!("{} range {}..={} is inverted", name, self.min, self.max),
            });
        }
        if !allow_zero && self.min == 0 {
            return Err(TactusError::InvalidConfig {
                reason: format!("{} range must start above zero", name),
            });
        }
        Ok(())
    }
}

/// A weighted section profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionType {
    pub name: String,
    pub weight: f64,
    /// Multiplier applied to the base tempo for the whole section
    pub bpm_scale: f64,
    /// Overrides `phrases_per_section` for this section type
    #[serde(default)]
    pub phrases: Option<CountRange>,
}

impl SectionType {
    fn new(name: &str, weight: f64, bpm_scale: f64, phrases: CountRange) -> Self {
        Self {
            name: name.to_string(),
            weight,
            bpm_scale,
            phrases: Some(phrases),
        }
    }
}

/// Ranges used by the random meter provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterRanges {
    pub numerator: CountRange,
    pub denominator: CountRange,
    pub divisions: CountRange,
    pub subdivisions: CountRange,
    pub subsubdivisions: CountRange,
    /// Allowed true meter ratio for primary meters
    pub min_ratio: f64,
    pub max_ratio: f64,
    /// Allowed distance (in octaves of ratio) from the previous meter
    pub min_log_steps: f64,
    pub max_log_steps_primary: f64,
    pub max_log_steps_poly: f64,
}

impl Default for MeterRanges {
    fn default() -> Self {
        Self {
            numerator: CountRange::new(2, 11),
            denominator: CountRange::new(3, 12),
            divisions: CountRange::new(1, 4),
            subdivisions: CountRange::new(1, 3),
            subsubdivisions: CountRange::new(1, 2),
            min_ratio: 0.25,
            max_ratio: 4.0,
            min_log_steps: 0.5,
            max_log_steps_primary: 2.0,
            max_log_steps_poly: 4.0,
        }
    }
}

/// Tolerances applied by the audit pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditTolerances {
    /// Cross-layer phrase/section boundary agreement, in seconds
    pub phrase_secs: f64,
    /// Cross-layer final track length agreement, in seconds
    pub track_secs: f64,
    /// Tick-derived vs. parent-derived unit duration agreement, in seconds
    pub time_domain_secs: f64,
}

impl Default for AuditTolerances {
    fn default() -> Self {
        Self {
            phrase_secs: 0.02,
            track_secs: 0.05,
            time_domain_secs: 1e-6,
        }
    }
}

impl AuditTolerances {
    /// Every tolerance must be a finite positive number of seconds
    pub fn validate(&self) -> Result<()> {
        for (name, secs) in [
            ("phrase_secs", self.phrase_secs),
            ("track_secs", self.track_secs),
            ("time_domain_secs", self.time_domain_secs),
        ] {
            if !(secs.is_finite() && secs > 0.0) {
                return Err(TactusError::InvalidConfig {
                    reason: format!("audit tolerance {} must be finite and positive, got {}", name, secs),
                });
            }
        }
        Ok(())
    }
}

/// Full engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Ticks per quarter note
    pub ppq: u32,
    /// Base tempo in beats per minute
    pub bpm: f64,
    /// Seed for every random choice in a run
    pub seed: u64,
    pub sections: CountRange,
    pub phrases_per_section: CountRange,
    pub section_types: Vec<SectionType>,
    pub meters: MeterRanges,
    pub alignment: AlignmentConfig,
    pub silent_outro_seconds: f64,
    /// Marker filter: "none", "all" or a comma-separated list of levels
    pub log: String,
    pub audit: AuditTolerances,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ppq: DEFAULT_PPQ,
            bpm: DEFAULT_BPM,
            seed: 0,
            sections: CountRange::new(2, 3),
            phrases_per_section: CountRange::new(2, 3),
            section_types: vec![
                SectionType::new("intro", 2.0, 0.9, CountRange::new(1, 2)),
                SectionType::new("exposition", 3.0, 1.0, CountRange::new(2, 3)),
                SectionType::new("development", 2.0, 1.05, CountRange::new(3, 4)),
                SectionType::new("conclusion", 2.0, 0.95, CountRange::new(1, 2)),
                SectionType::new("coda", 1.0, 0.9, CountRange::new(1, 1)),
            ],
            meters: MeterRanges::default(),
            alignment: AlignmentConfig::default(),
            silent_outro_seconds: DEFAULT_SILENT_OUTRO_SECONDS,
            log: "section,phrase,measure".to_string(),
            audit: AuditTolerances::default(),
        }
    }
}

impl EngineConfig {
    /// Load a configuration file and validate it
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let config: EngineConfig = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    /// Save this configuration as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    /// Check every field for values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.ppq == 0 {
            return Err(TactusError::invalid("ppq", self.ppq));
        }
        if !self.bpm.is_finite() || self.bpm <= 0.0 {
            return Err(TactusError::invalid("bpm", self.bpm));
        }
        if !self.silent_outro_seconds.is_finite() || self.silent_outro_seconds < 0.0 {
            return Err(TactusError::invalid(
                "silent_outro_seconds",
                self.silent_outro_seconds,
            ));
        }

        self.sections.validate("sections", false)?;
        self.phrases_per_section.validate("phrases_per_section", false)?;
        for section_type in &self.section_types {
            if !(section_type.weight >= 0.0) || !(section_type.bpm_scale > 0.0) {
                return Err(TactusError::InvalidConfig {
                    reason: format!(
                        "section type '{}' needs a non-negative weight and positive bpm_scale",
                        section_type.name
                    ),
                });
            }
            if let Some(phrases) = &section_type.phrases {
                phrases.validate(&section_type.name, false)?;
            }
        }

        self.meters.numerator.validate("numerator", false)?;
        self.meters.denominator.validate("denominator", false)?;
        self.meters.divisions.validate("divisions", true)?;
        self.meters.subdivisions.validate("subdivisions", true)?;
        self.meters.subsubdivisions.validate("subsubdivisions", true)?;

        if self.alignment.max_measures == 0 || self.alignment.max_attempts == 0 {
            return Err(TactusError::InvalidConfig {
                reason: "alignment needs at least one measure and one attempt".to_string(),
            });
        }
        if !(self.alignment.tolerance_secs > 0.0 && self.alignment.tolerance_secs <= 1e-3) {
            return Err(TactusError::InvalidConfig {
                reason: format!(
                    "alignment tolerance {}s must be positive and at most 1ms",
                    self.alignment.tolerance_secs
                ),
            });
        }

        self.audit.validate()?;
        self.log_filter()?;
        Ok(())
    }

    /// Parsed marker filter
    pub fn log_filter(&self) -> Result<LogFilter> {
        self.log.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_validate() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ppq, 480);
        assert_eq!(config.bpm, 72.0);
    }

    #[test]
    fn test_partial_file_takes_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tactus.json");
        std::fs::write(&path, r#"{ "bpm": 96.0, "alignment": { "max_measures": 4 } }"#).unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.bpm, 96.0);
        assert_eq!(config.alignment.max_measures, 4);
        assert_eq!(config.alignment.max_attempts, 100);
        assert_eq!(config.ppq, 480);
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tactus.json");
        let config = EngineConfig {
            seed: 99,
            log: "all".to_string(),
            ..Default::default()
        };
        config.save(&path).unwrap();
        assert_eq!(EngineConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_rejects_inverted_range() {
        let config = EngineConfig {
            sections: CountRange::new(4, 2),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(TactusError::InvalidConfig { .. })));
    }

    #[test]
    fn test_rejects_unusable_audit_tolerances() {
        let mut config = EngineConfig::default();
        config.audit.phrase_secs = f64::NAN;
        assert!(matches!(config.validate(), Err(TactusError::InvalidConfig { .. })));

        config.audit = AuditTolerances {
            track_secs: -1.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(TactusError::InvalidConfig { .. })));

        config.audit = AuditTolerances {
            time_domain_secs: f64::INFINITY,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(AuditTolerances::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_loose_alignment_tolerance() {
        let mut config = EngineConfig::default();
        config.alignment.tolerance_secs = 0.01;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_unknown_log_level() {
        let config = EngineConfig {
            log: "section,bar".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
