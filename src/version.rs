//! Version-difference annotation for accepted matches.
//!
//! Looks for configured version keywords ("live", "remix", "remastered",
//! ...) that appear in one title but not in the other. Titles are folded
//! and lower-cased without the removal patterns, which may strip exactly
//! the markers looked for here ("(Mono)"). The result is a human-readable
//! note; the tier is never changed.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Result, SyncError};
use crate::models::{MatchDecision, Tier};
use crate::normalize::{normalize_text, NormalizationRules};

/// Keyword matching sees titles without removal patterns applied.
static PLAIN: Lazy<NormalizationRules> = Lazy::new(NormalizationRules::empty);

pub const DEFAULT_VERSION_KEYWORDS: &[&str] = &[
    "live",
    "acoustic",
    "remix",
    "remastered",
    "edit",
    "version",
    "deluxe",
    "extended",
    "instrumental",
    "unplugged",
    "radio edit",
    "club mix",
    "anniversary",
    "mono",
    "stereo",
    "original mix",
    "demo",
];

/// Word-bounded matchers for each configured keyword.
#[derive(Debug, Clone)]
pub struct VersionKeywords {
    keywords: Vec<(String, Regex)>,
}

impl VersionKeywords {
    /// Keywords are normalized the same way titles are, so they can be
    /// matched against normalized titles directly.
    pub fn new<S: AsRef<str>>(keywords: &[S]) -> Result<Self> {
        let mut compiled: Vec<(String, Regex)> = Vec::with_capacity(keywords.len());
        for kw in keywords {
            let norm = normalize_text(kw.as_ref(), &PLAIN);
            if norm.is_empty() {
                return Err(SyncError::Config(format!(
                    "version keyword {:?} is empty after normalization",
                    kw.as_ref()
                )));
            }
            if compiled.iter().any(|(k, _)| *k == norm) {
                continue;
            }
            let re = Regex::new(&format!(r"\b{}\b", regex::escape(&norm)))
                .map_err(|e| SyncError::Config(format!("version keyword {:?}: {}", norm, e)))?;
            compiled.push((norm, re));
        }
        Ok(Self { keywords: compiled })
    }

    pub fn keywords(&self) -> impl Iterator<Item = &str> {
        self.keywords.iter().map(|(k, _)| k.as_str())
    }

    /// Configured keywords present in a normalized title.
    pub fn found_in<'a>(&'a self, title_norm: &str) -> BTreeSet<&'a str> {
        self.keywords
            .iter()
            .filter(|(_, re)| re.is_match(title_norm))
            .map(|(k, _)| k.as_str())
            .collect()
    }

    /// Compare two normalized titles. `None` when both carry the same
    /// version keywords.
    pub fn describe_difference(&self, remote_title: &str, local_title: &str) -> Option<String> {
        let remote = self.found_in(remote_title);
        let local = self.found_in(local_title);
        if remote == local {
            return None;
        }

        let note = if remote.is_empty() {
            format!(
                "local copy may be a {} version; remote is standard",
                display_keywords(&local)
            )
        } else if local.is_empty() {
            format!(
                "remote track may be a {} version; local copy is standard",
                display_keywords(&remote)
            )
        } else {
            format!(
                "versions differ: remote is {}, local copy is {}",
                display_keywords(&remote),
                display_keywords(&local)
            )
        };
        Some(note)
    }

    /// `describe_difference` on raw titles.
    pub fn compare_titles(&self, remote_title: &str, local_title: &str) -> Option<String> {
        self.describe_difference(
            &normalize_text(remote_title, &PLAIN),
            &normalize_text(local_title, &PLAIN),
        )
    }
}

/// "remastered" → "Remastered", "radio edit" → "Radio Edit"; joined by "/".
fn display_keywords(keywords: &BTreeSet<&str>) -> String {
    keywords
        .iter()
        .map(|kw| {
            kw.split(' ')
                .map(|word| {
                    let mut chars = word.chars();
                    match chars.next() {
                        Some(first) => first.to_uppercase().chain(chars).collect(),
                        None => String::new(),
                    }
                })
                .collect::<Vec<String>>()
                .join(" ")
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Version note for a decision. Only Matched decisions with a candidate are
/// annotated.
pub fn annotate(decision: &MatchDecision, keywords: &VersionKeywords) -> Option<String> {
    if decision.tier != Tier::Matched {
        return None;
    }
    let candidate = decision.candidate.as_ref()?;
    keywords.compare_titles(&decision.remote.title, &candidate.local.title)
}

/// Annotate every Matched decision in place. Returns how many carry a note.
pub fn annotate_all(decisions: &mut [MatchDecision], keywords: &VersionKeywords) -> usize {
    let mut noted = 0;
    for decision in decisions.iter_mut() {
        decision.version_note = annotate(decision, keywords);
        if decision.version_note.is_some() {
            noted += 1;
        }
    }
    noted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Resolution, ScoredCandidate, Track};

    fn keywords() -> VersionKeywords {
        VersionKeywords::new(DEFAULT_VERSION_KEYWORDS).unwrap()
    }

    fn decision(tier: Tier, remote_title: &str, local_title: &str) -> MatchDecision {
        MatchDecision {
            remote: Track::remote("spotify:track:1", remote_title, "The Beatles", ""),
            tier,
            candidate: Some(ScoredCandidate {
                local: Track::local("/music/a.flac", local_title, "The Beatles", ""),
                title_score: 100,
                artist_score: 100,
            }),
            score: 100,
            version_note: None,
            resolution: Resolution::Automatic,
        }
    }

    #[test]
    fn test_remastered_only_locally() {
        let d = decision(Tier::Matched, "Yesterday", "yesterday (Remastered 2009)");
        let note = annotate(&d, &keywords()).unwrap();
        assert_eq!(note, "local copy may be a Remastered version; remote is standard");
    }

    #[test]
    fn test_live_only_remotely() {
        let d = decision(Tier::Matched, "Hey Jude - Live", "Hey Jude");
        let note = annotate(&d, &keywords()).unwrap();
        assert!(note.starts_with("remote track may be a Live version"));
    }

    #[test]
    fn test_same_keywords_no_note() {
        let d = decision(Tier::Matched, "Song (Live)", "Song - live");
        assert!(annotate(&d, &keywords()).is_none());
    }

    #[test]
    fn test_different_keywords_both_sides() {
        let d = decision(Tier::Matched, "Song (Acoustic)", "Song (Club Mix)");
        let note = annotate(&d, &keywords()).unwrap();
        assert_eq!(note, "versions differ: remote is Acoustic, local copy is Club Mix");
    }

    #[test]
    fn test_word_boundaries() {
        // "alive" must not count as "live"
        let kw = keywords();
        assert!(kw.found_in("alive and well").is_empty());
        assert!(kw.found_in("song radio edit").contains("radio edit"));
    }

    #[test]
    fn test_only_matched_annotated() {
        let kw = keywords();
        let d = decision(Tier::Review, "Yesterday", "Yesterday (Live)");
        assert!(annotate(&d, &kw).is_none());
        let mut all = vec![
            decision(Tier::Matched, "Yesterday", "Yesterday (Live)"),
            d,
            decision(Tier::Matched, "Help", "Help"),
        ];
        assert_eq!(annotate_all(&mut all, &kw), 1);
        assert!(all[0].version_note.is_some());
        assert!(all[1].version_note.is_none());
    }

    #[test]
    fn test_markers_found_despite_removal_patterns() {
        // "(mono)" is a default removal pattern; the note must still see it
        let d = decision(Tier::Matched, "Help!", "Help! (Mono)");
        let note = annotate(&d, &keywords()).unwrap();
        assert_eq!(note, "local copy may be a Mono version; remote is standard");

        let d = decision(Tier::Matched, "Help! (Stereo)", "Help! (Mono)");
        let note = annotate(&d, &keywords()).unwrap();
        assert_eq!(note, "versions differ: remote is Stereo, local copy is Mono");
    }

    #[test]
    fn test_empty_keyword_rejected() {
        assert!(VersionKeywords::new(&["live", "!!"]).is_err());
    }
}
