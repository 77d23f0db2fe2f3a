use std::fmt;
use std::str::FromStr;

use smallvec::SmallVec;
use thiserror::Error;

pub const WILDCARD: &str = "*";
const SEGMENTS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AppIdError {
    #[error("app id is empty")]
    Empty,
    #[error("app id {0:?} must have 1 or {SEGMENTS} '/'-separated segments")]
    SegmentCount(String),
}

/// Hierarchical app identity: `bundle-kind/origin/component-id/branch`.
///
/// Any segment may be `*`, meaning "any". A bare component id such as
/// `org.gimp.GIMP` is shorthand for `*/*/org.gimp.GIMP/*`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AppId {
    segments: SmallVec<[String; SEGMENTS]>,
}

impl AppId {
    pub fn parse(raw: &str) -> Result<Self, AppIdError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(AppIdError::Empty);
        }

        let parts: SmallVec<[&str; SEGMENTS]> = raw.split('/').collect();
        let segments = match parts.len() {
            1 => [WILDCARD, WILDCARD, parts[0], WILDCARD]
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            SEGMENTS => parts.iter().map(|s| normalize(s)).collect(),
            _ => return Err(AppIdError::SegmentCount(raw.to_string())),
        };

        Ok(Self { segments })
    }

    pub fn from_parts(bundle_kind: &str, origin: &str, component_id: &str, branch: &str) -> Self {
        Self {
            segments: [bundle_kind, origin, component_id, branch]
                .iter()
                .map(|s| normalize(s))
                .collect(),
        }
    }

    pub fn bundle_kind(&self) -> &str {
        &self.segments[0]
    }

    pub fn origin(&self) -> &str {
        &self.segments[1]
    }

    pub fn component_id(&self) -> &str {
        &self.segments[2]
    }

    pub fn branch(&self) -> &str {
        &self.segments[3]
    }

    pub fn is_concrete(&self) -> bool {
        self.segments.iter().all(|s| s != WILDCARD)
    }

    /// Segment-wise comparison where a wildcard on either side matches anything.
    pub fn matches(&self, other: &AppId) -> bool {
        self.segments
            .iter()
            .zip(other.segments.iter())
            .all(|(a, b)| a == WILDCARD || b == WILDCARD || a == b)
    }
}

fn normalize(segment: &str) -> String {
    let segment = segment.trim();
    if segment.is_empty() {
        WILDCARD.to_string()
    } else {
        segment.to_string()
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

impl FromStr for AppId {
    type Err = AppIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
