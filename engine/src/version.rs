//! Semantic version parsing and comparison for predicate matching.
//!
//! Versions are dotted numeric strings with up to three segments
//! (`"1"`, `"1.2"`, `"1.2.3"`). Missing segments default to zero.
//! Malformed strings fail to parse and therefore never satisfy a
//! version constraint.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A parsed dotted numeric version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl SemanticVersion {
    /// Build a version from explicit components.
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl FromStr for SemanticVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::InvalidVersion(s.to_string()));
        }

        let mut segments = [0u64; 3];
        let mut count = 0;
        for part in s.split('.') {
            if count >= 3 {
                return Err(Error::InvalidVersion(s.to_string()));
            }
            segments[count] = part
                .parse::<u64>()
                .map_err(|_| Error::InvalidVersion(s.to_string()))?;
            count += 1;
        }

        Ok(Self {
            major: segments[0],
            minor: segments[1],
            patch: segments[2],
        })
    }
}

impl fmt::Display for SemanticVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl Ord for SemanticVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch).cmp(&(other.major, other.minor, other.patch))
    }
}

impl PartialOrd for SemanticVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A comparator over [`SemanticVersion`] values.
///
/// Range bounds are inclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum VersionConstraint {
    #[serde(rename_all = "camelCase")]
    Exact { version: SemanticVersion },
    #[serde(rename_all = "camelCase")]
    AtLeast { min: SemanticVersion },
    #[serde(rename_all = "camelCase")]
    AtMost { max: SemanticVersion },
    #[serde(rename_all = "camelCase")]
    Range {
        min: SemanticVersion,
        max: SemanticVersion,
    },
}

impl VersionConstraint {
    /// Check a parsed version against this constraint.
    pub fn is_satisfied_by(&self, version: SemanticVersion) -> bool {
        match self {
            VersionConstraint::Exact { version: exact } => version == *exact,
            VersionConstraint::AtLeast { min } => version >= *min,
            VersionConstraint::AtMost { max } => version <= *max,
            VersionConstraint::Range { min, max } => version >= *min && version <= *max,
        }
    }

    /// Check a raw version string. Malformed strings never match.
    pub fn matches_str(&self, raw: &str) -> bool {
        raw.parse::<SemanticVersion>()
            .map(|v| self.is_satisfied_by(v))
            .unwrap_or(false)
    }
}
