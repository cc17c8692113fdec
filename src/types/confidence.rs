//! Confidence ratings for anchors and annotations.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How trustworthy a value is, used to arbitrate conflicting evidence.
///
/// The ordering is what the algorithms consume: a value may be freely
/// overwritten by a computed one only when its confidence is low enough.
///
/// - `None`: no information; the value (if any) is a placeholder.
/// - `Default`: filled in by interpolation or another heuristic.
/// - `Automatic`: produced by an automated process (e.g. a forced aligner).
/// - `Manual`: set or confirmed by a human.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum Confidence {
    /// No confidence at all.
    #[default]
    None,
    /// A computed default value.
    Default,
    /// Automatically aligned.
    Automatic,
    /// Manually aligned.
    Manual,
}

impl Confidence {
    /// Parse a confidence rating from a string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "none" => Some(Self::None),
            "default" => Some(Self::Default),
            "automatic" => Some(Self::Automatic),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Default => write!(f, "default"),
            Self::Automatic => write!(f, "automatic"),
            Self::Manual => write!(f, "manual"),
        }
    }
}
