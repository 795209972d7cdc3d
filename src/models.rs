//! Core data models for catalog reconciliation.
//!
//! This module contains the track records handed over by the catalog
//! sources, the derived comparison keys, and the decision records produced
//! by classification, review and orphan resolution.

use serde::{Deserialize, Serialize};

// ============================================================================
// Tracks
// ============================================================================

/// Which catalog a track came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Source {
    Remote,
    Local,
}

/// One song instance as reported by a catalog source. Immutable once ingested.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub source: Source,
    pub title: String,  // Raw text, empty when a local file has no tags
    pub artist: String, // Raw text, empty when a local file has no tags
    pub album: String,
    pub identifier: String, // Remote catalog URI, or absolute file path for local tracks
    pub duration_seconds: Option<u32>, // Display only, never used for matching
}

impl Track {
    pub fn remote(identifier: &str, title: &str, artist: &str, album: &str) -> Self {
        Self {
            source: Source::Remote,
            title: title.to_string(),
            artist: artist.to_string(),
            album: album.to_string(),
            identifier: identifier.to_string(),
            duration_seconds: None,
        }
    }

    pub fn local(path: &str, title: &str, artist: &str, album: &str) -> Self {
        Self {
            source: Source::Local,
            title: title.to_string(),
            artist: artist.to_string(),
            album: album.to_string(),
            identifier: path.to_string(),
            duration_seconds: None,
        }
    }

    /// "Artist - Title" for logs and prompts.
    pub fn display_name(&self) -> String {
        match (self.artist.is_empty(), self.title.is_empty()) {
            (true, true) => format!("<untagged> {}", self.identifier),
            (true, false) => self.title.clone(),
            (false, true) => format!("{} - <untitled>", self.artist),
            (false, false) => format!("{} - {}", self.artist, self.title),
        }
    }
}

// ============================================================================
// Normalized Keys
// ============================================================================

/// Comparable form of a (title, artist) pair.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NormalizedKey {
    pub title: String,
    pub artist: String,
}

impl NormalizedKey {
    pub fn is_empty(&self) -> bool {
        self.title.is_empty() && self.artist.is_empty()
    }
}

/// Track paired with its cached key. Catalog snapshots are `Vec<KeyedTrack>`
/// in catalog order; the index into that vector is the insertion order used
/// for tie-breaking.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyedTrack {
    pub track: Track,
    pub key: NormalizedKey,
}

// ============================================================================
// Match Decisions
// ============================================================================

/// Classification bucket for a remote track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    Matched,
    Review,
    Missing,
}

/// How a decision reached its current tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    /// Set by the classifier thresholds.
    Automatic,
    /// Answered one item at a time during review.
    Reviewed,
    /// Applied by accept-all / reject-all.
    BulkReviewed,
    /// Accepted during review, but the local track already belonged to
    /// another Matched decision.
    CandidateTaken,
}

impl Resolution {
    pub fn label(self) -> &'static str {
        match self {
            Resolution::Automatic => "automatic",
            Resolution::Reviewed => "reviewed",
            Resolution::BulkReviewed => "reviewed (bulk)",
            Resolution::CandidateTaken => "local file already matched",
        }
    }
}

/// Best local candidate retained on a decision.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub local: Track,
    pub title_score: u8,
    pub artist_score: u8,
}

/// Outcome for one remote track.
///
/// Created by the classifier. Only Review-tier decisions may change, and
/// only to Matched or Missing; after that the decision is final.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchDecision {
    pub remote: Track,
    pub tier: Tier,
    pub candidate: Option<ScoredCandidate>,
    pub score: u8,
    pub version_note: Option<String>,
    pub resolution: Resolution,
}

impl MatchDecision {
    pub fn is_final(&self) -> bool {
        self.tier != Tier::Review
    }

    /// Move a Review decision to its final tier. Returns false (and changes
    /// nothing) if the decision is already final or `tier` is Review.
    pub fn resolve(&mut self, tier: Tier, via: Resolution) -> bool {
        if self.is_final() || tier == Tier::Review {
            return false;
        }
        self.tier = tier;
        self.resolution = via;
        true
    }

    /// Identifier of the local track this decision owns, if Matched.
    pub fn claimed_local(&self) -> Option<&str> {
        match (&self.tier, &self.candidate) {
            (Tier::Matched, Some(c)) => Some(c.local.identifier.as_str()),
            _ => None,
        }
    }
}

// ============================================================================
// Orphans
// ============================================================================

/// Remote search hit ranked against an orphan.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RankedResult {
    pub track: Track,
    pub score: u8,
}

/// What the user chose for an orphan. Indices point into `results`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrphanAction {
    #[default]
    None,
    AddToLiked(usize),
    AddToPlaylist(usize),
    Skip,
}

/// Local track with no accepted remote counterpart.
#[derive(Clone, Debug, PartialEq)]
pub struct OrphanCandidate {
    pub local: KeyedTrack,
    pub results: Vec<RankedResult>,
    pub action: OrphanAction,
    /// Set when the search could not be completed (retries exhausted).
    pub search_failed: bool,
}

impl OrphanCandidate {
    pub fn new(local: KeyedTrack) -> Self {
        Self {
            local,
            results: Vec::new(),
            action: OrphanAction::None,
            search_failed: false,
        }
    }

    /// Stage an action. Index-carrying actions outside `results` are ignored.
    pub fn stage(&mut self, action: OrphanAction) -> bool {
        let valid = match action {
            OrphanAction::AddToLiked(i) | OrphanAction::AddToPlaylist(i) => i < self.results.len(),
            OrphanAction::None | OrphanAction::Skip => true,
        };
        if valid {
            self.action = action;
        }
        valid
    }

    /// Remote track selected by the staged action.
    pub fn selected(&self) -> Option<&Track> {
        match self.action {
            OrphanAction::AddToLiked(i) | OrphanAction::AddToPlaylist(i) => {
                self.results.get(i).map(|r| &r.track)
            }
            OrphanAction::None | OrphanAction::Skip => None,
        }
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Per-run counters, logged as JSON at the end of a run.
#[derive(Default, Debug, Clone, Serialize)]
pub struct RunStats {
    // Inputs
    pub remote_tracks: usize,
    pub remote_fetch_incomplete: bool,
    pub local_files_seen: usize,
    pub local_tracks: usize,
    pub local_files_excluded: usize,
    pub session_reused: bool,

    // Classification
    pub auto_matched: usize,
    pub sent_to_review: usize,
    pub auto_missing: usize,
    pub version_notes: usize,

    // Review
    pub review_accepted: usize,
    pub review_rejected: usize,
    pub review_unresolved: usize,
    pub review_conflicts: usize,

    // Orphans
    pub orphans: usize,
    pub orphan_searches_failed: usize,
    pub orphans_added_to_liked: usize,
    pub orphans_added_to_playlist: usize,
    pub orphans_already_present: usize,

    // Playlist maintenance
    pub playlist_added: usize,
    pub playlist_already_present: usize,
    pub playlist_removed: usize,

    pub elapsed_seconds: f64,
}

impl RunStats {
    /// Percentage of remote tracks found locally.
    pub fn match_rate(&self) -> f64 {
        if self.remote_tracks == 0 {
            0.0
        } else {
            100.0 * (self.auto_matched + self.review_accepted) as f64 / self.remote_tracks as f64
        }
    }

    pub fn log_phase(&self, phase: &str) {
        if let Ok(json) = serde_json::to_string_pretty(self) {
            tracing::info!("[STATS:{}]\n{}", phase, json);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn review_decision() -> MatchDecision {
        MatchDecision {
            remote: Track::remote("spotify:track:1", "Song", "Artist", "Album"),
            tier: Tier::Review,
            candidate: Some(ScoredCandidate {
                local: Track::local("/music/song.mp3", "Song", "Artist", "Album"),
                title_score: 80,
                artist_score: 78,
            }),
            score: 79,
            version_note: None,
            resolution: Resolution::Automatic,
        }
    }

    #[test]
    fn test_resolve_only_from_review() {
        let mut d = review_decision();
        assert!(d.claimed_local().is_none());
        assert!(!d.resolve(Tier::Review, Resolution::Reviewed));
        assert!(d.resolve(Tier::Matched, Resolution::Reviewed));
        assert_eq!(d.claimed_local(), Some("/music/song.mp3"));
        // Final decisions are immutable
        assert!(!d.resolve(Tier::Missing, Resolution::Reviewed));
        assert_eq!(d.tier, Tier::Matched);
    }

    #[test]
    fn test_display_name_untagged() {
        let t = Track::local("/music/x.mp3", "", "", "");
        assert_eq!(t.display_name(), "<untagged> /music/x.mp3");
        let t = Track::local("/music/x.mp3", "Song", "Band", "");
        assert_eq!(t.display_name(), "Band - Song");
    }

    #[test]
    fn test_stage_rejects_out_of_range() {
        let local = KeyedTrack {
            track: Track::local("/music/a.mp3", "A", "B", ""),
            key: NormalizedKey::default(),
        };
        let mut orphan = OrphanCandidate::new(local);
        assert!(!orphan.stage(OrphanAction::AddToLiked(0)));
        assert_eq!(orphan.action, OrphanAction::None);
        orphan.results.push(RankedResult {
            track: Track::remote("spotify:track:9", "A", "B", ""),
            score: 100,
        });
        assert!(orphan.stage(OrphanAction::AddToPlaylist(0)));
        assert_eq!(orphan.selected().map(|t| t.identifier.as_str()), Some("spotify:track:9"));
        assert!(orphan.stage(OrphanAction::Skip));
        assert!(orphan.selected().is_none());
    }
}
