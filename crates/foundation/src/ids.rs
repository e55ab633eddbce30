use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Stable stream-segment identifier (NHDPlus `comid`).
///
/// The same value keys spatial-query rows and render-surface features, so it
/// must never be reused for a different physical segment.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureId(pub u64);

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A feed key that is not the canonical decimal form of a feature id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseFeatureIdError(pub String);

impl fmt::Display for ParseFeatureIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "not a feature id: {:?}", self.0)
    }
}

impl std::error::Error for ParseFeatureIdError {}

impl FromStr for FeatureId {
    type Err = ParseFeatureIdError;

    /// Only canonical keys parse, so two distinct keys never name the same
    /// feature: no sign, no padding, no leading zeros.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let canonical = !s.is_empty()
            && s.bytes().all(|b| b.is_ascii_digit())
            && (s == "0" || !s.starts_with('0'));
        if !canonical {
            return Err(ParseFeatureIdError(s.to_string()));
        }
        s.parse()
            .map(FeatureId)
            .map_err(|_| ParseFeatureIdError(s.to_string()))
    }
}
