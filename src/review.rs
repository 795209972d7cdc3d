//! Review session: explicit state machine over Review-tier decisions.
//!
//! The session does no I/O. A presenter reads `current()`, asks the user,
//! and feeds the answer back through `apply()`. Bulk actions resolve every
//! not-yet-visited item at once and end the session; skip-all ends it and
//! leaves those items for a later run.
//!
//! Resuming is just building a new session over the same decisions: items
//! already resolved are no longer Review-tier and are not queued again.

use rustc_hash::FxHashSet;
use serde::Serialize;

use crate::models::{MatchDecision, Resolution, Tier};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewAction {
    Accept,
    Reject,
    Skip,
    AcceptAll,
    RejectAll,
    SkipAll,
}

/// Presenter answer. `Quit` stops the run after a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewChoice {
    Action(ReviewAction),
    Quit,
}

/// What the presenter shows for one item.
#[derive(Debug, Clone, Copy)]
pub struct ReviewItem<'d> {
    /// 1-based position within this session's queue.
    pub position: usize,
    pub total: usize,
    pub decision: &'d MatchDecision,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReviewSummary {
    pub accepted: usize,
    pub rejected: usize,
    /// Accepted, but the local track was already claimed.
    pub conflicts: usize,
    pub unresolved: usize,
}

impl ReviewSummary {
    /// Tally review outcomes over any set of decisions. Decisions the
    /// classifier finalized on its own are not counted.
    pub fn tally<'d>(decisions: impl IntoIterator<Item = &'d MatchDecision>) -> Self {
        let mut summary = Self::default();
        for d in decisions {
            match (d.tier, d.resolution) {
                (Tier::Review, _) => summary.unresolved += 1,
                (_, Resolution::CandidateTaken) => summary.conflicts += 1,
                (_, Resolution::Automatic) => {}
                (Tier::Matched, _) => summary.accepted += 1,
                (Tier::Missing, _) => summary.rejected += 1,
            }
        }
        summary
    }
}

pub struct ReviewSession<'d> {
    decisions: &'d mut [MatchDecision],
    /// Indices into `decisions` of the items queued for this session.
    queue: Vec<usize>,
    cursor: usize,
    /// Local identifiers owned by Matched decisions.
    claimed: FxHashSet<String>,
}

impl<'d> ReviewSession<'d> {
    pub fn new(decisions: &'d mut [MatchDecision]) -> Self {
        let queue: Vec<usize> = decisions
            .iter()
            .enumerate()
            .filter(|(_, d)| d.tier == Tier::Review)
            .map(|(i, _)| i)
            .collect();
        let claimed = decisions
            .iter()
            .filter_map(|d| d.claimed_local().map(str::to_string))
            .collect();

        Self {
            decisions,
            queue,
            cursor: 0,
            claimed,
        }
    }

    pub fn current(&self) -> Option<ReviewItem<'_>> {
        let index = *self.queue.get(self.cursor)?;
        Some(ReviewItem {
            position: self.cursor + 1,
            total: self.queue.len(),
            decision: &self.decisions[index],
        })
    }

    pub fn is_finished(&self) -> bool {
        self.cursor >= self.queue.len()
    }

    /// Items not yet visited in this session.
    pub fn remaining(&self) -> usize {
        self.queue.len().saturating_sub(self.cursor)
    }

    pub fn decisions(&self) -> &[MatchDecision] {
        self.decisions
    }

    /// Apply the user's answer to the current item. Returns the number of
    /// decisions that changed tier; zero for Skip or a finished session.
    pub fn apply(&mut self, action: ReviewAction) -> usize {
        if self.is_finished() {
            return 0;
        }

        match action {
            ReviewAction::Skip => {
                self.cursor += 1;
                0
            }
            ReviewAction::SkipAll => {
                tracing::info!("Deferred {} review item(s)", self.remaining());
                self.cursor = self.queue.len();
                0
            }
            ReviewAction::Accept | ReviewAction::Reject => {
                let index = self.queue[self.cursor];
                self.cursor += 1;
                let changed = self.resolve(index, action == ReviewAction::Accept, Resolution::Reviewed);
                usize::from(changed)
            }
            ReviewAction::AcceptAll | ReviewAction::RejectAll => {
                let accept = action == ReviewAction::AcceptAll;
                let pending: Vec<usize> = self.queue[self.cursor..].to_vec();
                self.cursor = self.queue.len();
                let changed = pending
                    .into_iter()
                    .filter(|&i| self.resolve(i, accept, Resolution::BulkReviewed))
                    .count();
                tracing::info!(
                    "Bulk {} applied to {} review item(s)",
                    if accept { "accept" } else { "reject" },
                    changed
                );
                changed
            }
        }
    }

    fn resolve(&mut self, index: usize, accept: bool, via: Resolution) -> bool {
        let decision = &mut self.decisions[index];
        if !accept {
            return decision.resolve(Tier::Missing, via);
        }

        let local = decision.candidate.as_ref().map(|c| c.local.identifier.clone());
        match local {
            Some(id) if !self.claimed.contains(&id) => {
                let changed = decision.resolve(Tier::Matched, via);
                if changed {
                    self.claimed.insert(id);
                }
                changed
            }
            Some(id) => {
                tracing::warn!(
                    "Cannot accept {}: {} is already matched to another track",
                    decision.remote.display_name(),
                    id
                );
                decision.resolve(Tier::Missing, Resolution::CandidateTaken)
            }
            None => decision.resolve(Tier::Missing, Resolution::CandidateTaken),
        }
    }

    /// Outcome of the items queued in this session.
    pub fn summary(&self) -> ReviewSummary {
        ReviewSummary::tally(self.queue.iter().map(|&i| &self.decisions[i]))
    }
}

// ============================================================================
// TESTS
// ============================================================================
