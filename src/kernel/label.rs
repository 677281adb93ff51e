//! Security labels and the clearance scale.
//!
//! A [`Label`] pairs a clearance [`Level`] with a set of category tags.
//! Labels are values: a label change always builds a new `Label` and
//! replaces the stored one, never edits it in place.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::KernelError;

/// Display names used when no scale is configured.
pub const DEFAULT_LEVEL_NAMES: [&str; 4] = ["Unclassified", "Confidential", "Secret", "Top Secret"];

/// Largest number of ranks a scale may hold (ranks are stored as `u8`).
pub const MAX_SCALE_LEN: usize = 256;

/// Rank on the clearance scale. Comparisons are plain integer comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Level(u8);

impl Level {
    /// Wrap a raw rank. Range checking is the scale's job.
    pub const fn new(rank: u8) -> Self {
        Self(rank)
    }

    /// The raw rank.
    pub const fn rank(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Clearance level plus compartment categories.
///
/// An empty category set means "no compartment restriction".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    /// Rank on the clearance scale.
    pub level: Level,
    /// Compartment tags.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub categories: BTreeSet<String>,
}

impl Label {
    /// Label with no categories.
    pub fn new(level: Level) -> Self {
        Self {
            level,
            categories: BTreeSet::new(),
        }
    }

    /// Label with the given categories.
    pub fn with_categories<I, S>(level: Level, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            level,
            categories: categories.into_iter().map(Into::into).collect(),
        }
    }

    /// `self.level >= other.level` and `self.categories ⊇ other.categories`.
    pub fn dominates(&self, other: &Label) -> bool {
        self.level >= other.level && self.categories.is_superset(&other.categories)
    }

    /// Same categories, different level.
    pub fn at_level(&self, level: Level) -> Self {
        Self {
            level,
            categories: self.categories.clone(),
        }
    }

    /// Least upper bound: higher level, union of categories.
    pub fn join(&self, other: &Label) -> Self {
        Self {
            level: self.level.max(other.level),
            categories: self.categories.union(&other.categories).cloned().collect(),
        }
    }
}

/// Totally ordered table of ranks and display names, fixed at startup.
///
/// Ranks are contiguous from 0; rank `i` is displayed as `names[i]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClearanceScale {
    names: Vec<String>,
}

impl Default for ClearanceScale {
    fn default() -> Self {
        Self {
            names: DEFAULT_LEVEL_NAMES.iter().map(|n| (*n).to_owned()).collect(),
        }
    }
}

impl ClearanceScale {
    /// Build a scale from display names, lowest rank first.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::InvalidRequest`] if `names` is empty or holds
    /// more than [`MAX_SCALE_LEN`] entries.
    pub fn new(names: Vec<String>) -> Result<Self, KernelError> {
        if names.is_empty() || names.len() > MAX_SCALE_LEN {
            return Err(KernelError::InvalidRequest(format!(
                "clearance scale must have 1..={MAX_SCALE_LEN} levels, got {}",
                names.len()
            )));
        }
        Ok(Self { names })
    }

    /// Number of ranks.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Always false; a scale has at least one rank.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Highest rank on the scale.
    pub fn max(&self) -> Level {
        let top = self.names.len().saturating_sub(1);
        Level(u8::try_from(top).unwrap_or(u8::MAX))
    }

    /// Resolve a raw integer into a level on this scale.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::InvalidLevel`] if `raw` is negative or above
    /// the top rank.
    pub fn level(&self, raw: i64) -> Result<Level, KernelError> {
        let max = self.max();
        u8::try_from(raw)
            .ok()
            .filter(|rank| *rank <= max.0)
            .map(Level)
            .ok_or(KernelError::InvalidLevel {
                level: i128::from(raw),
                max,
            })
    }

    /// Check that an already-typed level fits this scale.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::InvalidLevel`] if the rank is above the top.
    pub fn check(&self, level: Level) -> Result<Level, KernelError> {
        self.level(i64::from(level.0))
    }

    /// Display name for a level. Out-of-range ranks render as `"level N"`.
    pub fn name(&self, level: Level) -> String {
        self.names
            .get(usize::from(level.0))
            .cloned()
            .unwrap_or_else(|| format!("level {}", level.0))
    }

    /// `(level, name)` pairs, lowest first.
    pub fn iter(&self) -> impl Iterator<Item = (Level, &str)> + '_ {
        self.names
            .iter()
            .enumerate()
            .filter_map(|(i, name)| u8::try_from(i).ok().map(|r| (Level(r), name.as_str())))
    }
}
