//! Hierarchy levels and the marker filter.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TactusError};

/// One of the seven nested timing levels, outermost first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitLevel {
    Section,
    Phrase,
    Measure,
    Beat,
    Division,
    Subdivision,
    Subsubdivision,
}

impl UnitLevel {
    pub const ALL: [UnitLevel; 7] = [
        UnitLevel::Section,
        UnitLevel::Phrase,
        UnitLevel::Measure,
        UnitLevel::Beat,
        UnitLevel::Division,
        UnitLevel::Subdivision,
        UnitLevel::Subsubdivision,
    ];

    /// Nesting depth, 0 for sections
    pub fn depth(self) -> usize {
        self as usize
    }

    pub fn parent(self) -> Option<UnitLevel> {
        self.depth().checked_sub(1).map(|d| Self::ALL[d])
    }

    pub fn child(self) -> Option<UnitLevel> {
        Self::ALL.get(self.depth() + 1).copied()
    }

    pub fn is_leaf(self) -> bool {
        self.child().is_none()
    }

    pub fn name(self) -> &'static str {
        match self {
            UnitLevel::Section => "section",
            UnitLevel::Phrase => "phrase",
            UnitLevel::Measure => "measure",
            UnitLevel::Beat => "beat",
            UnitLevel::Division => "division",
            UnitLevel::Subdivision => "subdivision",
            UnitLevel::Subsubdivision => "subsubdivision",
        }
    }

    /// Capitalised name used in marker text
    pub fn title(self) -> &'static str {
        match self {
            UnitLevel::Section => "Section",
            UnitLevel::Phrase => "Phrase",
            UnitLevel::Measure => "Measure",
            UnitLevel::Beat => "Beat",
            UnitLevel::Division => "Division",
            UnitLevel::Subdivision => "Subdivision",
            UnitLevel::Subsubdivision => "Subsubdivision",
        }
    }
}

impl fmt::Display for UnitLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for UnitLevel {
    type Err = TactusError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        UnitLevel::ALL
            .into_iter()
            .find(|level| level.name() == wanted)
            .ok_or_else(|| TactusError::invalid("level", s))
    }
}

/// Which levels get marker events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LogFilter {
    enabled: [bool; 7],
}

impl LogFilter {
    pub fn all() -> Self {
        Self { enabled: [true; 7] }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn only(levels: &[UnitLevel]) -> Self {
        let mut filter = Self::none();
        for level in levels {
            filter.enabled[level.depth()] = true;
        }
        filter
    }

    pub fn matches(&self, level: UnitLevel) -> bool {
        self.enabled[level.depth()]
    }
}

impl FromStr for LogFilter {
    type Err = TactusError;

    /// `"none"`, `"all"` or a comma-separated list of level names
    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "" | "none" => Ok(Self::none()),
            "all" => Ok(Self::all()),
            list => {
                let levels = list
                    .split(',')
                    .filter(|part| !part.trim().is_empty())
                    .map(str::parse)
                    .collect::<Result<Vec<UnitLevel>>>()?;
                Ok(Self::only(&levels))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_navigation() {
        assert_eq!(UnitLevel::Section.parent(), None);
        assert_eq!(UnitLevel::Beat.parent(), Some(UnitLevel::Measure));
        assert_eq!(UnitLevel::Subdivision.child(), Some(UnitLevel::Subsubdivision));
        assert!(UnitLevel::Subsubdivision.is_leaf());
        assert_eq!(UnitLevel::Division.to_string(), "division");
    }

    #[test]
    fn test_filter_parsing() {
        let filter: LogFilter = "section, Phrase,measure".parse().unwrap();
        assert!(filter.matches(UnitLevel::Section));
        assert!(filter.matches(UnitLevel::Phrase));
        assert!(filter.matches(UnitLevel::Measure));
        assert!(!filter.matches(UnitLevel::Beat));

        let all: LogFilter = "all".parse().unwrap();
        assert!(UnitLevel::ALL.iter().all(|&l| all.matches(l)));
        let none: LogFilter = "none".parse().unwrap();
        assert!(UnitLevel::ALL.iter().all(|&l| !none.matches(l)));

        assert!("section,bar".parse::<LogFilter>().is_err());
    }
}
