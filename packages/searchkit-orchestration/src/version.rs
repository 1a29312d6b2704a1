//! Version constraint resolver
//!
//! Versions are coerced to `major.minor.patch` before comparison, so `v2`,
//! `2.1` and `2.1.0-beta` all normalize. Constraints are a single optional
//! operator followed by a version. Bare `>` and `<` are widened to `>=` and
//! `<=`: `satisfies("1.0.0", ">1.0.0")` is true.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

static VERSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)(?:\.(\d+))?(?:\.(\d+))?").expect("static regex"));

/// Canonical `major.minor.patch`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl Version {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Comparison operator of a constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Exact,
    GreaterOrEqual,
    LessOrEqual,
}

impl Comparator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Comparator::Exact => "=",
            Comparator::GreaterOrEqual => ">=",
            Comparator::LessOrEqual => "<=",
        }
    }
}

/// Parsed constraint (`>=1.2.0`, `<2`, `1.0.0`, ...)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Constraint {
    pub comparator: Comparator,
    pub version: Version,
}

impl Constraint {
    /// Parse a constraint string. Returns `None` when the version part does
    /// not normalize.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();

        // Two-character operators first so ">=" is not read as ">"
        let (comparator, rest) = if let Some(rest) = trimmed.strip_prefix(">=") {
            (Comparator::GreaterOrEqual, rest)
        } else if let Some(rest) = trimmed.strip_prefix("<=") {
            (Comparator::LessOrEqual, rest)
        } else if let Some(rest) = trimmed.strip_prefix('>') {
            (Comparator::GreaterOrEqual, rest)
        } else if let Some(rest) = trimmed.strip_prefix('<') {
            (Comparator::LessOrEqual, rest)
        } else if let Some(rest) = trimmed.strip_prefix('=') {
            (Comparator::Exact, rest)
        } else {
            (Comparator::Exact, trimmed)
        };

        let version = VersionResolver::normalize(rest)?;
        Some(Self {
            comparator,
            version,
        })
    }

    pub fn allows(&self, version: &Version) -> bool {
        match self.comparator {
            Comparator::Exact => version == &self.version,
            Comparator::GreaterOrEqual => version >= &self.version,
            Comparator::LessOrEqual => version <= &self.version,
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.comparator.as_str(), self.version)
    }
}

/// Normalizes versions and checks constraints. Never fails on malformed input.
pub struct VersionResolver;

impl VersionResolver {
    /// Coerce the first `major(.minor(.patch))` group found in `raw`
    pub fn normalize(raw: &str) -> Option<Version> {
        let caps = VERSION_RE.captures(raw)?;
        let part = |i: usize| -> Option<u64> {
            match caps.get(i) {
                Some(m) => m.as_str().parse().ok(),
                None => Some(0),
            }
        };

        Some(Version::new(part(1)?, part(2)?, part(3)?))
    }

    /// Normalized string form; empty when the input does not normalize
    pub fn normalize_str(raw: &str) -> String {
        Self::normalize(raw)
            .map(|v| v.to_string())
            .unwrap_or_default()
    }

    /// Whether `version` satisfies `constraint`. Malformed input on either
    /// side is unsatisfied.
    pub fn satisfies(version: &str, constraint: &str) -> bool {
        let Some(version) = Self::normalize(version) else {
            return false;
        };
        match Constraint::parse(constraint) {
            Some(constraint) => constraint.allows(&version),
            None => false,
        }
    }
}
