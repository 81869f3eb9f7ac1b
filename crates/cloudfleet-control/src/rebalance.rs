//! Capacity rebalancing across node groups.
//!
//! A cluster's aggregate node count is split over its named node groups. When
//! the aggregate changes, every group gets `total / n` nodes and the first
//! `total % n` groups in name order get one extra, so the sum is exact and no
//! two groups differ by more than one. The new split is computed from the
//! current one, whatever shape it is in, not by incrementing each group.

use std::collections::BTreeMap;

use cloudfleet_store::{NodeGroup, NodeGroupChange, NodeGroupsChangeRequest};
use thiserror::Error;
use tracing::debug;

use crate::types::ResizeRequest;

/// Why a resize cannot be planned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RebalanceError {
    /// There are no node groups to distribute over.
    #[error("no node groups to resize")]
    NoGroups,

    /// The new aggregate would be negative.
    #[error("new total {0} is negative")]
    NegativeTotal(i64),

    /// The new aggregate does not fit in an `i64`.
    #[error("new total overflows")]
    Overflow,

    /// The minimum count would exceed the maximum count.
    #[error("min count {min} exceeds max count {max}")]
    MinExceedsMax {
        /// Aggregate (or per-group) minimum.
        min: i64,
        /// Aggregate (or per-group) maximum.
        max: i64,
    },
}

/// Redistribute `current` after its total changes by `delta`.
///
/// # Errors
///
/// Returns `RebalanceError::NoGroups` for an empty distribution and
/// `RebalanceError::NegativeTotal` if the new total is below zero.
pub fn rebalance(
    current: &BTreeMap<String, i64>,
    delta: i64,
) -> Result<BTreeMap<String, i64>, RebalanceError> {
    if current.is_empty() {
        return Err(RebalanceError::NoGroups);
    }
    let total = current
        .values()
        .try_fold(0i64, |sum, count| sum.checked_add(*count))
        .and_then(|sum| sum.checked_add(delta))
        .ok_or(RebalanceError::Overflow)?;
    distribute(current.keys(), total)
}

fn distribute<'a>(
    names: impl ExactSizeIterator<Item = &'a String>,
    total: i64,
) -> Result<BTreeMap<String, i64>, RebalanceError> {
    if total < 0 {
        return Err(RebalanceError::NegativeTotal(total));
    }
    let groups = i64::try_from(names.len()).map_err(|_| RebalanceError::Overflow)?;
    if groups == 0 {
        return Err(RebalanceError::NoGroups);
    }

    let base = total / groups;
    let mut remainder = total % groups;
    Ok(names
        .map(|name| {
            let extra = i64::from(remainder > 0);
            remainder -= extra;
            (name.clone(), base + extra)
        })
        .collect())
}

/// Plan the node group changes for a resize.
///
/// `request` carries new aggregate min and max counts (each optional) and an
/// optional instance type. Counts are rebalanced independently; an instance
/// type is propagated to every group. Only groups that change are listed.
///
/// # Errors
///
/// Returns a `RebalanceError` if there are no groups, a total is negative,
/// or a minimum would exceed its maximum. Nothing is planned in that case.
pub fn plan_resize(
    node_groups: &BTreeMap<String, NodeGroup>,
    request: &ResizeRequest,
) -> Result<NodeGroupsChangeRequest, RebalanceError> {
    if node_groups.is_empty() {
        return Err(RebalanceError::NoGroups);
    }

    let current_min: BTreeMap<String, i64> = node_groups
        .iter()
        .map(|(name, group)| (name.clone(), group.min_count))
        .collect();
    let current_max: BTreeMap<String, i64> = node_groups
        .iter()
        .map(|(name, group)| (name.clone(), group.max_count))
        .collect();

    let new_min = match request.node_min_count {
        Some(total) => distribute(node_groups.keys(), total)?,
        None => current_min,
    };
    let new_max = match request.node_max_count {
        Some(total) => distribute(node_groups.keys(), total)?,
        None => current_max,
    };

    let (min_total, max_total): (i64, i64) = (new_min.values().sum(), new_max.values().sum());
    if min_total > max_total {
        return Err(RebalanceError::MinExceedsMax {
            min: min_total,
            max: max_total,
        });
    }

    let mut changes = BTreeMap::new();
    for (name, group) in node_groups {
        let min = new_min[name];
        let max = new_max[name];
        if min > max {
            return Err(RebalanceError::MinExceedsMax { min, max });
        }
        let change = NodeGroupChange {
            instance_type: request.node_instance_type.clone(),
            min_count: (min != group.min_count).then_some(min),
            max_count: (max != group.max_count).then_some(max),
        };
        if !change.is_empty() {
            changes.insert(name.clone(), change);
        }
    }

    debug!(
        groups = node_groups.len(),
        changed = changes.len(),
        min_total,
        max_total,
        "Planned node group resize"
    );

    Ok(NodeGroupsChangeRequest { changes })
}
