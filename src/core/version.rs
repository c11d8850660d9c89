//! Package version handling
//!
//! This module provides:
//! - An opaque ordered version type supporting dotted numeric components
//!   with alphabetic suffixes (`1.2a`, `2.0.1b`)
//! - Constraint satisfaction checks, delegating to semver where the
//!   version is semver-shaped

use std::cmp::Ordering;
use std::fmt;

use semver::VersionReq;
use serde::{Deserialize, Serialize};

/// An opaque, totally ordered package version
///
/// Ordering compares dotted components left to right: numeric parts
/// numerically, alphabetic suffixes lexicographically, with a missing
/// suffix ordering before any suffix (`1.2 < 1.2a < 1.2b < 1.10`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(String);

/// One dotted component: numeric value plus optional alphabetic suffix
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Component {
    number: u64,
    suffix: String,
}

impl Version {
    /// Create a version from its string form
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    /// The version's string form
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn components(&self) -> Vec<Component> {
        self.0
            .split('.')
            .map(|part| {
                let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
                Component {
                    number: digits.parse().unwrap_or(0),
                    suffix: part[digits.len()..].to_string(),
                }
            })
            .collect()
    }

    /// Check this version against a constraint
    ///
    /// Semver-shaped versions are matched with [`semver::VersionReq`];
    /// anything else falls back to exact string equality.
    pub fn satisfies(&self, constraint: &str) -> bool {
        if let (Ok(version), Ok(req)) = (semver::Version::parse(&self.0), VersionReq::parse(constraint)) {
            return req.matches(&version);
        }
        self.0 == constraint
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let mine = self.components();
        let theirs = other.components();
        let pad = Component {
            number: 0,
            suffix: String::new(),
        };
        for i in 0..mine.len().max(theirs.len()) {
            let a = mine.get(i).unwrap_or(&pad);
            let b = theirs.get(i).unwrap_or(&pad);
            match a.cmp(b) {
                Ordering::Equal => {}
                other => return other,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Version {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
