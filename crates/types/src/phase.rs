//! Build phase names and their canonical order

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A named stage of a build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Prepare,
    Patch,
    Configure,
    Build,
    Check,
    Install,
}

impl Phase {
    /// Default execution order
    pub const CANONICAL: [Phase; 6] = [
        Phase::Prepare,
        Phase::Patch,
        Phase::Configure,
        Phase::Build,
        Phase::Check,
        Phase::Install,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Prepare => "prepare",
            Self::Patch => "patch",
            Self::Configure => "configure",
            Self::Build => "build",
            Self::Check => "check",
            Self::Install => "install",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown phase: {0}")]
pub struct UnknownPhase(pub String);

impl FromStr for Phase {
    type Err = UnknownPhase;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Phase::CANONICAL
            .into_iter()
            .find(|phase| phase.as_str() == s)
            .ok_or_else(|| UnknownPhase(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_order_is_sorted() {
        let mut sorted = Phase::CANONICAL;
        sorted.sort();
        assert_eq!(sorted, Phase::CANONICAL);
    }

    #[test]
    fn parse_round_trips_names() {
        for phase in Phase::CANONICAL {
            assert_eq!(phase.as_str().parse::<Phase>().unwrap(), phase);
        }
        assert!("compile".parse::<Phase>().is_err());
    }
}
