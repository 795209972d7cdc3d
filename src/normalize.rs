//! Text normalization for remote/local track matching.
//!
//! Both catalogs go through the same rule set, so any change here changes
//! every cached key. `NormalizationRules::digest` identifies the rule set
//! and the algorithm revision; bump `NORMALIZER_REVISION` when the pass
//! below changes behavior.

use any_ascii::any_ascii;
use once_cell::sync::Lazy;
use rayon::prelude::*;
use regex::{Regex, RegexBuilder};
use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

use crate::error::{Result, SyncError};
use crate::models::{KeyedTrack, NormalizedKey, Track};

/// Part of every rule digest. Bump to invalidate cached keys.
pub const NORMALIZER_REVISION: u32 = 1;

// ============================================================================
// REGEX PATTERNS
// ============================================================================

/// Removal patterns used when the configuration does not supply its own.
/// Matched case-insensitively against the raw text.
pub const DEFAULT_REMOVAL_PATTERNS: &[&str] = &[
    r"\(official video\)",
    r"\[official video\]",
    r"\(official lyric video\)",
    r"\(official audio\)",
    r"\[official audio\]",
    r"\(lyrics\)",
    r"\[lyrics\]",
    r"\(visualizer\)",
    r"\(hd\)",
    r"\[hq\]",
    r"\(explicit\)",
    r"\(clean version\)",
    r"\(stereo\)",
    r"\(mono\)",
    // Featured artists: "(feat. Artist)", "[ft. Someone]"
    r"\s*[\(\[](?:feat\.?|ft\.?|featuring)\s+[^\)\]]+[\)\]]",
    // Feat without brackets: "Song feat. Artist", "Artist ft. Someone"
    r"\s+(?:feat\.|ft\.|featuring)\s+.+$",
];

/// Everything that is not a lower-case ASCII alphanumeric or whitespace.
static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9\s]").unwrap());

/// Any whitespace run, collapsed to a single space.
static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

// ============================================================================
// RULE SET
// ============================================================================

/// Compiled removal patterns. Built from configuration, never hard-coded
/// into the pass itself.
#[derive(Debug, Clone)]
pub struct NormalizationRules {
    sources: Vec<String>,
    patterns: Vec<Regex>,
}

impl NormalizationRules {
    /// Compile patterns case-insensitively. A malformed pattern is a
    /// configuration error.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut sources = Vec::with_capacity(patterns.len());
        let mut compiled = Vec::with_capacity(patterns.len());
        for p in patterns {
            let p = p.as_ref();
            let re = RegexBuilder::new(p)
                .case_insensitive(true)
                .build()
                .map_err(|e| SyncError::Config(format!("removal pattern {:?}: {}", p, e)))?;
            sources.push(p.to_string());
            compiled.push(re);
        }
        Ok(Self {
            sources,
            patterns: compiled,
        })
    }

    pub fn empty() -> Self {
        Self {
            sources: Vec::new(),
            patterns: Vec::new(),
        }
    }

    pub fn patterns(&self) -> &[String] {
        &self.sources
    }

    /// Stable identifier of this rule set, used to decide whether cached
    /// keys can be reused.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(NORMALIZER_REVISION.to_le_bytes());
        for source in &self.sources {
            hasher.update(source.as_bytes());
            hasher.update([0u8]);
        }
        format!("{:x}", hasher.finalize())
    }
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Check if a character is a Unicode combining mark (diacritical mark).
pub fn is_combining_mark(c: char) -> bool {
    matches!(c as u32, 0x0300..=0x036F | 0x1AB0..=0x1AFF | 0x1DC0..=0x1DFF | 0xFE20..=0xFE2F)
}

/// Fold Unicode text to lower-case ASCII: NFKD decomposition, combining
/// marks dropped, remaining non-ASCII transliterated.
/// e.g., "Beyoncé" → "beyonce", "Motörhead" → "motorhead"
pub fn fold_to_ascii(s: &str) -> String {
    let stripped: String = s.nfkd().filter(|c| !is_combining_mark(*c)).collect();
    any_ascii(&stripped).to_lowercase()
}

/// Unify quote characters and spell out a free-standing ampersand.
pub fn normalize_punctuation(s: &str) -> String {
    s.replace(['\u{2018}', '\u{2019}'], "'") // Left/right single curly quotes
        .replace(['\u{201C}', '\u{201D}'], "\"") // Left/right double curly quotes
        .replace(['\u{00B4}', '\u{0060}'], "'") // Acute and grave accents used as apostrophes
        .replace(" & ", " and ")
}

// ============================================================================
// NORMALIZATION FUNCTIONS
// ============================================================================

/// One pass: removals, lower-case/ASCII fold, punctuation strip, whitespace
/// collapse, trim.
fn normalize_pass(text: &str, rules: &NormalizationRules) -> String {
    let mut result = text.to_string();
    for pattern in &rules.patterns {
        result = pattern.replace_all(&result, "").into_owned();
    }

    let folded = fold_to_ascii(&normalize_punctuation(&result));
    let stripped = NON_WORD.replace_all(&folded, "");
    WHITESPACE_RUN.replace_all(&stripped, " ").trim().to_string()
}

/// Normalize one field.
///
/// The pass is repeated until it reaches a fixed point, which makes the
/// result idempotent for any rule set: a removal pattern that only matches
/// after whitespace collapse is applied on the next pass instead of on the
/// caller's second call. After the first pass the text is plain ASCII and
/// each further pass can only shorten it, so the loop terminates.
pub fn normalize_text(text: &str, rules: &NormalizationRules) -> String {
    let mut current = normalize_pass(text, rules);
    loop {
        let next = normalize_pass(&current, rules);
        if next == current {
            return current;
        }
        current = next;
    }
}

/// Canonicalize a (title, artist) pair.
pub fn normalize(title: &str, artist: &str, rules: &NormalizationRules) -> NormalizedKey {
    NormalizedKey {
        title: normalize_text(title, rules),
        artist: normalize_text(artist, rules),
    }
}

pub fn key_track(track: Track, rules: &NormalizationRules) -> KeyedTrack {
    let key = normalize(&track.title, &track.artist, rules);
    KeyedTrack { track, key }
}

/// Derive keys for a whole catalog. Output order equals input order.
pub fn key_catalog(tracks: Vec<Track>, rules: &NormalizationRules) -> Vec<KeyedTrack> {
    tracks
        .into_par_iter()
        .map(|t| key_track(t, rules))
        .collect()
}

/// Recompute keys of a cached catalog after a rule change.
pub fn rekey_catalog(catalog: Vec<KeyedTrack>, rules: &NormalizationRules) -> Vec<KeyedTrack> {
    key_catalog(catalog.into_iter().map(|k| k.track).collect(), rules)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn default_rules() -> NormalizationRules {
        NormalizationRules::new(DEFAULT_REMOVAL_PATTERNS).unwrap()
    }

    #[test]
    fn test_normalize_text_basic() {
        let rules = default_rules();
        assert_eq!(normalize_text("  Hello,   World! ", &rules), "hello world");
        assert_eq!(normalize_text("Don't Stop Me Now", &rules), "dont stop me now");
        assert_eq!(normalize_text("Song (Official Video)", &rules), "song");
        assert_eq!(normalize_text("SONG [HQ]", &rules), "song");
        assert_eq!(normalize_text("", &rules), "");
    }

    #[test]
    fn test_normalize_keeps_version_tags() {
        // Version markers stay in the key
        let rules = default_rules();
        assert_eq!(
            normalize_text("yesterday (Remastered 2009)", &rules),
            "yesterday remastered 2009"
        );
    }

    #[test]
    fn test_featured_artists_removed() {
        let rules = default_rules();
        assert_eq!(normalize_text("Drake feat. Rihanna", &rules), "drake");
        assert_eq!(normalize_text("Work (feat. Drake)", &rules), "work");
        assert_eq!(normalize_text("Daft Punk ft. Pharrell", &rules), "daft punk");
    }

    #[test]
    fn test_fold_to_ascii() {
        assert_eq!(fold_to_ascii("Björk"), "bjork");
        assert_eq!(fold_to_ascii("Motörhead"), "motorhead");
        assert_eq!(fold_to_ascii("Beyoncé"), "beyonce");
    }

    #[test]
    fn test_normalize_punctuation() {
        assert_eq!(normalize_punctuation("Can\u{2019}t Stop"), "Can't Stop");
        assert_eq!(normalize_punctuation("Rock & Roll"), "Rock and Roll");
        let rules = NormalizationRules::empty();
        assert_eq!(
            normalize_text("Simon & Garfunkel", &rules),
            normalize_text("Simon and Garfunkel", &rules)
        );
    }

    #[test]
    fn test_idempotent_with_pattern_matching_after_collapse() {
        // Only matches once the double space has been collapsed
        let rules = NormalizationRules::new(&[r"\bofficial video\b"]).unwrap();
        let once = normalize_text("Song official  video", &rules);
        assert_eq!(once, "song");
        assert_eq!(normalize_text(&once, &rules), once);
    }

    #[test]
    fn test_idempotent_across_inputs() {
        let rules = NormalizationRules::new(&[r"\(live\)", r"remix$", r"^the "]).unwrap();
        let inputs = [
            "The The",
            "Song (Live) Remix",
            "  the  Remix Remix ",
            "Ça va (Live)",
            "Трава у дома",
            "AC/DC - Back In Black",
            "!!!",
        ];
        for input in inputs {
            let once = normalize_text(input, &rules);
            assert_eq!(normalize_text(&once, &rules), once, "input {:?}", input);
        }
    }

    #[test]
    fn test_removal_is_case_insensitive() {
        let rules = NormalizationRules::new(&[r"\(radio edit\)"]).unwrap();
        assert_eq!(normalize_text("Hit (RADIO EDIT)", &rules), "hit");
    }

    #[test]
    fn test_malformed_pattern_is_config_error() {
        let err = NormalizationRules::new(&["(unclosed"]).unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[test]
    fn test_digest_tracks_rule_changes() {
        let a = NormalizationRules::new(&["x"]).unwrap();
        let b = NormalizationRules::new(&["x"]).unwrap();
        let c = NormalizationRules::new(&["x", "y"]).unwrap();
        assert_eq!(a.digest(), b.digest());
        assert_ne!(a.digest(), c.digest());
        assert_eq!(a.digest().len(), 64);
    }

    #[test]
    fn test_key_catalog_preserves_order() {
        let rules = default_rules();
        let tracks: Vec<Track> = (0..50)
            .map(|i| Track::local(&format!("/m/{}.mp3", i), &format!("Song {}", i), "Band", ""))
            .collect();
        let keyed = key_catalog(tracks, &rules);
        for (i, k) in keyed.iter().enumerate() {
            assert_eq!(k.key.title, format!("song {}", i));
            assert_eq!(k.key.artist, "band");
        }
    }
}
