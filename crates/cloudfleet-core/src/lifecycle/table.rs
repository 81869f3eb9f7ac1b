//! Labeled transition tables and work classification.
//!
//! Tables are keyed by the *target* state and list the states a resource may
//! be in for that target to be legal. Many sources collapsing into one
//! retry-safe target stays compact, and self-transitions are spelled out.

use std::cmp::Ordering;

/// One row of a transition table: `to` is legal from any state in `from`.
#[derive(Debug)]
pub struct Transition<S: 'static> {
    /// The requested target state.
    pub to: S,
    /// States from which `to` may be entered.
    pub from: &'static [S],
}

/// A static `target -> legal sources` table.
#[derive(Debug)]
pub struct TransitionTable<S: 'static> {
    rows: &'static [Transition<S>],
}

impl<S: Copy + PartialEq + 'static> TransitionTable<S> {
    /// Build a table from static rows.
    #[must_use]
    pub const fn new(rows: &'static [Transition<S>]) -> Self {
        Self { rows }
    }

    /// The legal source states for `to`, or `None` if `to` is not a target.
    #[must_use]
    pub fn legal_sources(&self, to: S) -> Option<&'static [S]> {
        self.rows.iter().find(|row| row.to == to).map(|row| row.from)
    }

    /// Whether moving from `from` to `to` is listed in this table.
    ///
    /// Targets absent from the table are always illegal.
    #[must_use]
    pub fn allows(&self, from: S, to: S) -> bool {
        self.legal_sources(to)
            .is_some_and(|sources| sources.contains(&from))
    }

    /// Every target state of this table, in table order.
    pub fn targets(&self) -> impl Iterator<Item = S> + '_ {
        self.rows.iter().map(|row| row.to)
    }

    /// Every state reachable from `from` in one step.
    pub fn successors(&self, from: S) -> impl Iterator<Item = S> + '_ {
        self.rows
            .iter()
            .filter(move |row| row.from.contains(&from))
            .map(|row| row.to)
    }

    /// The underlying rows.
    #[must_use]
    pub const fn rows(&self) -> &'static [Transition<S>] {
        self.rows
    }
}

/// States that need supervisor attention, with optional priorities.
#[derive(Debug)]
pub struct WorkClassifier<S: 'static> {
    pending: &'static [S],
    priorities: &'static [(S, i32)],
}

impl<S: Copy + PartialEq + 'static> WorkClassifier<S> {
    /// Build a classifier. `priorities` should only name pending states;
    /// unlisted states weigh `0`.
    #[must_use]
    pub const fn new(pending: &'static [S], priorities: &'static [(S, i32)]) -> Self {
        Self {
            pending,
            priorities,
        }
    }

    /// Whether a resource in `state` should be polled by supervisors.
    #[must_use]
    pub fn is_pending(&self, state: S) -> bool {
        self.pending.contains(&state)
    }

    /// The pending work states.
    #[must_use]
    pub const fn pending(&self) -> &'static [S] {
        self.pending
    }

    /// The explicit priority entries.
    #[must_use]
    pub const fn priorities(&self) -> &'static [(S, i32)] {
        self.priorities
    }

    /// The work priority of `state`. Higher runs first.
    #[must_use]
    pub fn priority(&self, state: S) -> i32 {
        self.priorities
            .iter()
            .find(|(s, _)| *s == state)
            .map_or(0, |(_, weight)| *weight)
    }

    /// Order two states so that the higher priority sorts first.
    #[must_use]
    pub fn compare(&self, a: S, b: S) -> Ordering {
        self.priority(b).cmp(&self.priority(a))
    }
}

/// The complete lifecycle definition of one resource kind.
#[derive(Debug)]
pub struct StateRegistry<S: 'static> {
    /// Transitions an API client may request.
    pub requests: TransitionTable<S>,
    /// Transitions a supervisor makes while holding the resource lock.
    pub progressions: TransitionTable<S>,
    /// Pending work classification.
    pub work: WorkClassifier<S>,
}

impl<S: Copy + PartialEq + 'static> StateRegistry<S> {
    /// Whether an API client may move a resource from `current` to `requested`.
    #[must_use]
    pub fn valid_request(&self, current: S, requested: S) -> bool {
        self.requests.allows(current, requested)
    }

    /// Whether a supervisor may move a resource from `current` to `next`.
    #[must_use]
    pub fn valid_progression(&self, current: S, next: S) -> bool {
        self.progressions.allows(current, next)
    }

    /// Whether any table permits the move. Every persisted state change
    /// must pass this check.
    #[must_use]
    pub fn permits(&self, current: S, next: S) -> bool {
        self.valid_request(current, next) || self.valid_progression(current, next)
    }

    /// Every state from which either table permits moving to `to`.
    #[must_use]
    pub fn permitted_sources(&self, to: S) -> Vec<S> {
        let mut sources: Vec<S> = Vec::new();
        let tables = [&self.requests, &self.progressions];
        for from in tables.iter().filter_map(|table| table.legal_sources(to)) {
            for state in from {
                if !sources.contains(state) {
                    sources.push(*state);
                }
            }
        }
        sources
    }

    /// Every state reachable from `from` in one step through either table.
    #[must_use]
    pub fn successors(&self, from: S) -> Vec<S> {
        let mut next: Vec<S> = Vec::new();
        for state in self
            .requests
            .successors(from)
            .chain(self.progressions.successors(from))
        {
            if !next.contains(&state) {
                next.push(state);
            }
        }
        next
    }
}
