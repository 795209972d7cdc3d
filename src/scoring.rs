//! Similarity scoring between normalized strings.
//!
//! Scores are integers in 0..=100. Two measures are combined:
//! - sequence similarity (normalized Levenshtein), which catches typos
//! - token-set similarity, which ignores word order and extra words, so
//!   "artist title" vs "title artist" and "yesterday" vs
//!   "yesterday remastered 2009" still score high
//!
//! The final score is the larger of the two.

use rustc_hash::FxHashSet;

use crate::models::NormalizedKey;

// ============================================================================
// Weights
// ============================================================================

/// Composite weights. Artist must weigh at least as much as title because
/// unrelated songs (covers, common titles) share titles far more often
/// than they share artists.
pub const TITLE_WEIGHT: u16 = 1;
pub const ARTIST_WEIGHT: u16 = 1;

// ============================================================================
// String Similarity
// ============================================================================

/// Sequence similarity 0..=100. Two empty strings are identical (100);
/// callers guard against empty input.
pub fn ratio(a: &str, b: &str) -> u8 {
    (strsim::normalized_levenshtein(a, b) * 100.0).round() as u8
}

/// Order-independent word overlap 0..=100.
///
/// With `I` the sorted intersection of the two token sets and `Ra`/`Rb` the
/// sorted tokens only in a / only in b, the result is the best of
/// `ratio(I, I+Ra)`, `ratio(I, I+Rb)` and `ratio(I+Ra, I+Rb)`. A token set
/// that is a subset of the other therefore scores 100.
pub fn token_set_ratio(a: &str, b: &str) -> u8 {
    let tokens_a: FxHashSet<&str> = a.split_whitespace().collect();
    let tokens_b: FxHashSet<&str> = b.split_whitespace().collect();

    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0;
    }

    let mut common: Vec<&str> = tokens_a.intersection(&tokens_b).copied().collect();
    let mut only_a: Vec<&str> = tokens_a.difference(&tokens_b).copied().collect();
    let mut only_b: Vec<&str> = tokens_b.difference(&tokens_a).copied().collect();
    common.sort_unstable();
    only_a.sort_unstable();
    only_b.sort_unstable();

    let common = common.join(" ");
    let combined_a = join_nonempty(&common, &only_a.join(" "));
    let combined_b = join_nonempty(&common, &only_b.join(" "));

    let mut best = ratio(&combined_a, &combined_b);
    if !common.is_empty() {
        best = best.max(ratio(&common, &combined_a)).max(ratio(&common, &combined_b));
    }
    best
}

fn join_nonempty(a: &str, b: &str) -> String {
    match (a.is_empty(), b.is_empty()) {
        (true, _) => b.to_string(),
        (_, true) => a.to_string(),
        _ => format!("{} {}", a, b),
    }
}

/// Closeness of two normalized strings, 0..=100. Symmetric. Empty input
/// scores 0 so missing data never auto-matches.
pub fn score(a: &str, b: &str) -> u8 {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    ratio(a, b).max(token_set_ratio(a, b))
}

// ============================================================================
// Composite Scoring
// ============================================================================

/// Weighted mean of title and artist scores, rounded half up.
pub fn composite(title_score: u8, artist_score: u8) -> u8 {
    let total = TITLE_WEIGHT + ARTIST_WEIGHT;
    let weighted = title_score as u16 * TITLE_WEIGHT + artist_score as u16 * ARTIST_WEIGHT;
    ((weighted * 2 + total) / (total * 2)) as u8
}

/// Title, artist and composite scores for a pair of keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairScore {
    pub title: u8,
    pub artist: u8,
    pub composite: u8,
}

pub fn score_keys(a: &NormalizedKey, b: &NormalizedKey) -> PairScore {
    let title = score(&a.title, &b.title);
    let artist = score(&a.artist, &b.artist);
    PairScore {
        title,
        artist,
        composite: composite(title, artist),
    }
}

// ============================================================================
// TESTS
// ============================================================================
