//! Group allocation strategies.
//!
//! Choosing a group is a pure decision over a snapshot of candidates. The
//! caller reserves the chosen group (by locking it) before acting, since the
//! snapshot may already be stale.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use cloudfleet_core::ResourceId;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why no group could be chosen.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocationError {
    /// The candidate list was empty.
    #[error("no candidate groups")]
    NoCandidates,

    /// An allocator name could not be parsed.
    #[error("unknown allocator: {0}")]
    UnknownStrategy(String),
}

/// What a candidate group currently hosts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupStats {
    /// The group (for example a cluster) id.
    pub id: ResourceId,
    /// Number of live sub-resources placed on the group.
    pub total: usize,
    /// Sub-resource counts by lifecycle state name.
    pub by_state: BTreeMap<String, usize>,
}

impl GroupStats {
    /// An empty group.
    #[must_use]
    pub fn new(id: ResourceId) -> Self {
        Self {
            id,
            total: 0,
            by_state: BTreeMap::new(),
        }
    }

    /// Count one more sub-resource in `state`.
    pub fn record(&mut self, state: &str) {
        self.total += 1;
        *self.by_state.entry(state.to_string()).or_default() += 1;
    }
}

/// The observed quantity a lowest-count allocator minimizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupMetric {
    /// Every placed sub-resource.
    Total,
    /// Sub-resources in one lifecycle state.
    InState(String),
}

impl GroupMetric {
    /// The metric's value for `group`.
    #[must_use]
    pub fn measure(&self, group: &GroupStats) -> usize {
        match self {
            Self::Total => group.total,
            Self::InState(state) => group.by_state.get(state).copied().unwrap_or(0),
        }
    }
}

/// A group selection strategy.
///
/// Parsed from and rendered as `random`, `lowest-count` or
/// `lowest-count:<state>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum GroupAllocator {
    /// Pick uniformly at random.
    Random,
    /// Pick the candidate with the smallest metric; the first one wins ties.
    LowestCount(GroupMetric),
}

impl Default for GroupAllocator {
    fn default() -> Self {
        Self::LowestCount(GroupMetric::Total)
    }
}

impl GroupAllocator {
    /// Choose a candidate using the thread-local random generator.
    ///
    /// # Errors
    ///
    /// Returns `AllocationError::NoCandidates` if `candidates` is empty.
    pub fn choose<'a>(
        &self,
        candidates: &'a [GroupStats],
    ) -> Result<&'a GroupStats, AllocationError> {
        self.choose_with_rng(candidates, &mut rand::thread_rng())
    }

    /// Choose a candidate, drawing randomness from `rng`.
    ///
    /// # Errors
    ///
    /// Returns `AllocationError::NoCandidates` if `candidates` is empty.
    pub fn choose_with_rng<'a, R: Rng + ?Sized>(
        &self,
        candidates: &'a [GroupStats],
        rng: &mut R,
    ) -> Result<&'a GroupStats, AllocationError> {
        if candidates.is_empty() {
            return Err(AllocationError::NoCandidates);
        }
        let chosen = match self {
            Self::Random => &candidates[rng.gen_range(0..candidates.len())],
            Self::LowestCount(metric) => candidates
                .iter()
                .min_by_key(|group| metric.measure(group))
                .ok_or(AllocationError::NoCandidates)?,
        };
        Ok(chosen)
    }
}

impl fmt::Display for GroupAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Random => f.write_str("random"),
            Self::LowestCount(GroupMetric::Total) => f.write_str("lowest-count"),
            Self::LowestCount(GroupMetric::InState(state)) => write!(f, "lowest-count:{state}"),
        }
    }
}

impl FromStr for GroupAllocator {
    type Err = AllocationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            None if s == "random" => Ok(Self::Random),
            None if s == "lowest-count" => Ok(Self::LowestCount(GroupMetric::Total)),
            Some(("lowest-count", state)) if !state.is_empty() => {
                Ok(Self::LowestCount(GroupMetric::InState(state.to_string())))
            }
            _ => Err(AllocationError::UnknownStrategy(s.to_string())),
        }
    }
}

impl TryFrom<String> for GroupAllocator {
    type Error = AllocationError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<GroupAllocator> for String {
    fn from(allocator: GroupAllocator) -> Self {
        allocator.to_string()
    }
}
