//! Space identifiers.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a physical space (label slot) on the remote service.
///
/// Spaces are addressed by strings on the wire, but the pool only hands out
/// decimal ids. Ordering is numeric for decimal ids (`"2" < "10"`) and places
/// any non-numeric id after all numeric ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpaceId(String);

impl SpaceId {
    /// Wraps a raw identifier, trimming surrounding whitespace.
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.len() == raw.len() {
            Self(raw)
        } else {
            Self(trimmed.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric value when the id is a plain decimal number.
    pub fn number(&self) -> Option<u32> {
        if self.0.is_empty() || !self.0.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        self.0.parse().ok()
    }

    /// True for the empty id, which never names a real space.
    pub fn is_blank(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<u32> for SpaceId {
    fn from(n: u32) -> Self {
        Self(n.to_string())
    }
}

impl From<&str> for SpaceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl fmt::Display for SpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Ord for SpaceId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.number(), other.number()) {
            // "01" and "1" share a number but are distinct ids.
            (Some(a), Some(b)) => a.cmp(&b).then_with(|| self.0.cmp(&other.0)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for SpaceId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
