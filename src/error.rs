//! Error handling for Tactus
//!
//! Fatal timing errors surface immediately; zero child counts are not
//! errors at all (they are coerced to 1 where they are resolved).

use thiserror::Error;

use crate::hierarchy::UnitLevel;

/// Result type alias for Tactus operations
pub type Result<T> = std::result::Result<T, TactusError>;

/// Main error type for Tactus operations
#[derive(Error, Debug)]
pub enum TactusError {
    // Parameter Errors
    #[error("Invalid parameter {name}: {value}")]
    InvalidParameter { name: &'static str, value: String },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    // Hierarchy Errors
    #[error("Contiguity violation at {path}: {reason}")]
    ContiguityViolation { path: String, reason: String },

    #[error("No open parent for {level} unit on layer '{layer}'")]
    OrphanUnit { layer: String, level: UnitLevel },

    // Layer Errors
    #[error("Unknown layer: {name}")]
    UnknownLayer { name: String },

    #[error("No layer is active")]
    NoActiveLayer,

    // I/O Errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TactusError {
    /// Shorthand for an `InvalidParameter` error
    pub fn invalid(name: &'static str, value: impl std::fmt::Display) -> Self {
        TactusError::InvalidParameter {
            name,
            value: value.to_string(),
        }
    }

    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            TactusError::InvalidParameter { .. } => "INVALID_PARAMETER",
            TactusError::InvalidConfig { .. } => "INVALID_CONFIG",
            TactusError::ContiguityViolation { .. } => "CONTIGUITY_VIOLATION",
            TactusError::OrphanUnit { .. } => "ORPHAN_UNIT",
            TactusError::UnknownLayer { .. } => "UNKNOWN_LAYER",
            TactusError::NoActiveLayer => "NO_ACTIVE_LAYER",
            TactusError::Io(_) => "IO_ERROR",
            TactusError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Check if this error is recoverable
    ///
    /// Timing errors never are: any repair would be a guess about the
    /// intended ordering of units.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TactusError::Io(_) | TactusError::InvalidConfig { .. })
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            TactusError::InvalidParameter { .. } => vec![
                "BPM and PPQ must be positive and finite",
                "Meter numerator and denominator must both be positive",
            ],
            TactusError::InvalidConfig { .. } => vec![
                "Check the configuration file against the defaults",
                "Range minimums must not exceed their maximums",
            ],
            TactusError::ContiguityViolation { .. } => vec![
                "Open sibling units in strictly increasing index order",
                "Do not remove unit_handoff events from a buffer mid-run",
            ],
            TactusError::UnknownLayer { .. } => vec!["Register the layer before activating it"],
            TactusError::NoActiveLayer => vec!["Activate a layer before computing unit timing"],
            _ => vec![],
        }
    }
}
