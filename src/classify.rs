//! Match classification of remote tracks against the local catalog.
//!
//! For each remote track every still-unclaimed local track is scored, the
//! best candidate is selected, and the decision is bucketed into a tier:
//!
//! | composite score                         | tier    |
//! |-----------------------------------------|---------|
//! | `score >= similarity`                   | Matched |
//! | `review <= score < similarity`          | Review  |
//! | `score < review`                        | Missing |
//!
//! Matching is one-to-one on the local side: a local track claimed by a
//! Matched decision is not offered to any later remote track. Remote tracks
//! are processed in catalog order, so identical inputs give identical
//! results.

use rayon::prelude::*;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::error::{Result, SyncError};
use crate::models::{KeyedTrack, MatchDecision, Resolution, ScoredCandidate, Tier};
use crate::progress::create_spinner;
use crate::scoring::score_keys;

// ============================================================================
// Thresholds
// ============================================================================

pub const DEFAULT_SIMILARITY_THRESHOLD: u8 = 85;
pub const DEFAULT_REVIEW_THRESHOLD: u8 = 75;

/// Run-scoped tier boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thresholds {
    pub similarity: u8,
    pub review: u8,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            similarity: DEFAULT_SIMILARITY_THRESHOLD,
            review: DEFAULT_REVIEW_THRESHOLD,
        }
    }
}

impl Thresholds {
    pub fn new(similarity: u8, review: u8) -> Result<Self> {
        if similarity > 100 || review > 100 {
            return Err(SyncError::Config(format!(
                "thresholds must be within 0..=100 (similarity {}, review {})",
                similarity, review
            )));
        }
        if review > similarity {
            return Err(SyncError::Config(format!(
                "review threshold {} is above similarity threshold {}",
                review, similarity
            )));
        }
        Ok(Self { similarity, review })
    }

    /// Tier for a composite score. Both boundaries are inclusive on the
    /// upper tier.
    pub fn tier_for(&self, score: u8) -> Tier {
        if score >= self.similarity {
            Tier::Matched
        } else if score >= self.review {
            Tier::Review
        } else {
            Tier::Missing
        }
    }
}

// ============================================================================
// Candidates
// ============================================================================

/// One scored (remote, local) pair. Lives only while a remote track is
/// being classified.
#[derive(Debug, Clone, Copy)]
pub struct MatchCandidate<'a> {
    pub remote: &'a KeyedTrack,
    pub local: &'a KeyedTrack,
    pub local_index: usize,
    pub title_score: u8,
    pub artist_score: u8,
    pub score: u8,
}

/// Ranking order: composite score, then artist score, then earlier catalog
/// position. `Greater` means `a` ranks above `b`.
pub fn rank(a: &MatchCandidate, b: &MatchCandidate) -> Ordering {
    a.score
        .cmp(&b.score)
        .then_with(|| a.artist_score.cmp(&b.artist_score))
        .then_with(|| b.local_index.cmp(&a.local_index))
}

// ============================================================================
// Classifier
// ============================================================================

/// Classifier over one local catalog. Holds the set of claimed local
/// tracks, so decisions must be requested in remote catalog order.
pub struct MatchClassifier<'a> {
    local: &'a [KeyedTrack],
    claimed: FxHashSet<usize>,
    thresholds: Thresholds,
}

impl<'a> MatchClassifier<'a> {
    pub fn new(local: &'a [KeyedTrack], thresholds: Thresholds) -> Self {
        Self {
            local,
            claimed: FxHashSet::default(),
            thresholds,
        }
    }

    pub fn is_claimed(&self, local_index: usize) -> bool {
        self.claimed.contains(&local_index)
    }

    pub fn claimed_count(&self) -> usize {
        self.claimed.len()
    }

    /// Score every unclaimed local track against `remote`, in catalog order.
    pub fn candidates<'r>(&self, remote: &'r KeyedTrack) -> Vec<MatchCandidate<'r>>
    where
        'a: 'r,
    {
        let claimed = &self.claimed;
        self.local
            .par_iter()
            .enumerate()
            .filter(|(i, _)| !claimed.contains(i))
            .map(|(i, local)| {
                let s = score_keys(&remote.key, &local.key);
                MatchCandidate {
                    remote,
                    local,
                    local_index: i,
                    title_score: s.title,
                    artist_score: s.artist,
                    score: s.composite,
                }
            })
            .collect()
    }

    /// Best unclaimed candidate for `remote`, if the catalog has any.
    pub fn best_candidate<'r>(&self, remote: &'r KeyedTrack) -> Option<MatchCandidate<'r>>
    where
        'a: 'r,
    {
        // Sequential fold keeps the insertion-order tie-break exact
        self.candidates(remote)
            .into_iter()
            .fold(None, |best: Option<MatchCandidate>, c| match best {
                Some(b) if rank(&c, &b) != Ordering::Greater => Some(b),
                _ => Some(c),
            })
    }

    /// Classify one remote track. A Matched result claims its local track.
    pub fn classify(&mut self, remote: &KeyedTrack) -> MatchDecision {
        let best = self.best_candidate(remote);
        let score = best.map_or(0, |c| c.score);
        let tier = match best {
            Some(_) => self.thresholds.tier_for(score),
            None => Tier::Missing,
        };

        if let (Tier::Matched, Some(c)) = (tier, best) {
            self.claimed.insert(c.local_index);
        }

        MatchDecision {
            remote: remote.track.clone(),
            tier,
            candidate: best.map(|c| ScoredCandidate {
                local: c.local.track.clone(),
                title_score: c.title_score,
                artist_score: c.artist_score,
            }),
            score,
            version_note: None,
            resolution: Resolution::Automatic,
        }
    }
}

/// Classify a whole remote catalog in order.
pub fn classify_all(
    remote: &[KeyedTrack],
    local: &[KeyedTrack],
    thresholds: Thresholds,
) -> Vec<MatchDecision> {
    let spinner = create_spinner("Classifying liked tracks");
    let mut classifier = MatchClassifier::new(local, thresholds);
    let decisions: Vec<MatchDecision> = remote.iter().map(|r| classifier.classify(r)).collect();
    spinner.finish_and_clear();

    tracing::info!(
        "Classified {} remote tracks against {} local tracks ({} claimed)",
        decisions.len(),
        local.len(),
        classifier.claimed_count()
    );
    decisions
}

/// Count decisions per tier: (matched, review, missing).
pub fn tier_counts(decisions: &[MatchDecision]) -> (usize, usize, usize) {
    decisions.iter().fold((0, 0, 0), |(m, r, x), d| match d.tier {
        Tier::Matched => (m + 1, r, x),
        Tier::Review => (m, r + 1, x),
        Tier::Missing => (m, r, x + 1),
    })
}

// ============================================================================
// TESTS
// ============================================================================
