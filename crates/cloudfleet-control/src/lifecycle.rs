//! Transition validation with typed errors.
//!
//! The tables themselves live in `cloudfleet_core::lifecycle`. This module
//! turns a rejected move into a [`ControlError::InvalidTransition`] that names
//! the states the target is reachable from, so callers always get a concrete
//! reason rather than a bare refusal.
//!
//! API requests are checked against the request table; supervisors check
//! their own moves against the progression table.

use cloudfleet_core::{LifecycleState, ResourceId, ResourceKind};

use crate::error::{ControlError, Result};

/// Validates an API request and returns the requested state if legal.
///
/// # Errors
///
/// Returns `ControlError::InvalidTransition` if the request table does not
/// allow `requested` from `current`.
pub fn validate_request<S: LifecycleState>(id: ResourceId, current: S, requested: S) -> Result<S> {
    let requests = &S::registry().requests;
    if requests.allows(current, requested) {
        Ok(requested)
    } else {
        Err(invalid(id, current, requested, requests.legal_sources(requested)))
    }
}

/// Validates a supervisor move and returns the next state if legal.
///
/// # Errors
///
/// Returns `ControlError::InvalidTransition` if the progression table does
/// not allow `next` from `current`.
pub fn validate_progression<S: LifecycleState>(id: ResourceId, current: S, next: S) -> Result<S> {
    let progressions = &S::registry().progressions;
    if progressions.allows(current, next) {
        Ok(next)
    } else {
        Err(invalid(id, current, next, progressions.legal_sources(next)))
    }
}

/// Parse a state name of kind `S`.
///
/// # Errors
///
/// Returns `ControlError::UnknownState` for names outside the kind's set.
pub fn parse_state<S: LifecycleState>(state: &str) -> Result<S> {
    S::parse(state).ok_or_else(|| ControlError::UnknownState {
        kind: S::KIND,
        state: state.to_string(),
    })
}

/// The states from which `requested` may be asked for, by name.
///
/// Empty when `requested` is not requestable or not a state of `kind`.
#[must_use]
pub fn request_sources(kind: ResourceKind, requested: &str) -> Vec<&'static str> {
    kind.state_change_report()
        .into_iter()
        .find(|change| change.requested == requested)
        .map(|change| change.accepted_from)
        .unwrap_or_default()
}

fn invalid<S: LifecycleState>(
    id: ResourceId,
    from: S,
    to: S,
    sources: Option<&'static [S]>,
) -> ControlError {
    ControlError::InvalidTransition {
        kind: S::KIND,
        id,
        from: from.name(),
        to: to.name(),
        allowed_from: sources
            .unwrap_or_default()
            .iter()
            .map(|state| state.name())
            .collect(),
    }
}
