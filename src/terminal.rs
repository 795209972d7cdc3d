//! Line-based presenter for interactive runs.
//!
//! Generic over the input and output streams so prompts can be driven
//! from a script in tests. End of input, or output that can no longer be
//! written, counts as quit/skip.

use std::io::{BufRead, Write};

use crate::models::OrphanCandidate;
use crate::pipeline::{OrphanChoice, OrphanMode, OrphanPlaylistChoice, PlaylistChoice, Presenter};
use crate::remote::Playlist;
use crate::review::{ReviewAction, ReviewChoice, ReviewItem};
use crate::version::VersionKeywords;

/// `y`, `n`, `s`, `ya` (accept all remaining), `na` (reject all
/// remaining), `sa` (skip all remaining), `q`.
pub fn parse_review_choice(input: &str) -> Option<ReviewChoice> {
    let choice = match input.trim().to_lowercase().as_str() {
        "y" | "yes" => ReviewChoice::Action(ReviewAction::Accept),
        "n" | "no" => ReviewChoice::Action(ReviewAction::Reject),
        "s" | "skip" => ReviewChoice::Action(ReviewAction::Skip),
        "ya" => ReviewChoice::Action(ReviewAction::AcceptAll),
        "na" => ReviewChoice::Action(ReviewAction::RejectAll),
        "sa" => ReviewChoice::Action(ReviewAction::SkipAll),
        "q" | "quit" => ReviewChoice::Quit,
        _ => return None,
    };
    Some(choice)
}

/// `1..=results` selects, `0` skips, `c` cancels the rest.
pub fn parse_orphan_choice(input: &str, results: usize) -> Option<OrphanChoice> {
    let input = input.trim().to_lowercase();
    match input.as_str() {
        "" | "0" => Some(OrphanChoice::Skip),
        "c" => Some(OrphanChoice::CancelAll),
        n => match n.parse::<usize>() {
            Ok(i) if (1..=results).contains(&i) => Some(OrphanChoice::Select(i - 1)),
            _ => None,
        },
    }
}

pub fn parse_yes_no(input: &str, default: bool) -> Option<bool> {
    match input.trim().to_lowercase().as_str() {
        "" => Some(default),
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}

pub struct TerminalPresenter<R, W> {
    input: R,
    output: W,
    keywords: VersionKeywords,
}

impl<R: BufRead, W: Write> TerminalPresenter<R, W> {
    /// `keywords` are used to point out version differences during review.
    pub fn new(input: R, output: W, keywords: VersionKeywords) -> Self {
        Self { input, output, keywords }
    }

    /// Prompt and read one line. `None` at end of input or when the prompt
    /// cannot be written.
    fn ask(&mut self, prompt: &str) -> Option<String> {
        if let Err(e) = write!(self.output, "{} ", prompt).and_then(|_| self.output.flush()) {
            tracing::warn!("Cannot write prompt: {}", e);
            return None;
        }
        let mut line = String::new();
        match self.input.read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line),
        }
    }

    /// Re-prompt until `parse` accepts the answer.
    fn ask_until<T>(&mut self, prompt: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        loop {
            let line = self.ask(prompt)?;
            if let Some(value) = parse(&line) {
                return Some(value);
            }
            self.say(&format!("Invalid answer: {:?}", line.trim()))?;
        }
    }

    /// `None` when the output is gone; prompts that follow will fail too.
    fn say(&mut self, text: &str) -> Option<()> {
        writeln!(self.output, "{}", text).ok()
    }

    /// Numbered playlist menu. `None` for 0, end of input or a closed output.
    fn pick_playlist(&mut self, playlists: &[Playlist]) -> Option<Playlist> {
        for (i, p) in playlists.iter().enumerate() {
            self.say(&format!("  {:>3}. {} ({} tracks)", i + 1, p.name, p.track_count))?;
        }
        let count = playlists.len();
        let picked = self.ask_until(&format!("Playlist number (1-{}, 0 to cancel):", count), |s| {
            match s.trim().parse::<usize>() {
                Ok(0) => Some(None),
                Ok(i) if i <= count => Some(Some(i - 1)),
                _ => None,
            }
        })??;
        Some(playlists[picked].clone())
    }
}

impl<R: BufRead, W: Write> Presenter for TerminalPresenter<R, W> {
    fn review(&mut self, item: &ReviewItem<'_>) -> ReviewChoice {
        let d = item.decision;
        let mut lines = vec![
            format!("\nReview {}/{} (score {}%)", item.position, item.total, d.score),
            format!("  Remote: {} [{}]", d.remote.display_name(), d.remote.album),
        ];
        if let Some(c) = &d.candidate {
            lines.push(format!(
                "  Local:  {} [{}] (title {}%, artist {}%)",
                c.local.display_name(),
                c.local.identifier,
                c.title_score,
                c.artist_score
            ));
            if let Some(note) = self.keywords.compare_titles(&d.remote.title, &c.local.title) {
                lines.push(format!("  Version: {}", note));
            }
        }
        for line in &lines {
            if self.say(line).is_none() {
                return ReviewChoice::Quit;
            }
        }
        self.ask_until(
            "Same song? [y]es / [n]o / [s]kip / [ya] accept all / [na] reject all / [sa] skip all / [q]uit:",
            parse_review_choice,
        )
        .unwrap_or(ReviewChoice::Quit)
    }

    fn missing_playlist(&mut self, missing: usize, playlists: &[Playlist], suggested_name: &str) -> PlaylistChoice {
        let prompt = format!("\n{} liked tracks are missing locally. Add them to a playlist? [y/N]", missing);
        if !self.ask_until(&prompt, |s| parse_yes_no(s, false)).unwrap_or(false) {
            return PlaylistChoice::Skip;
        }

        let use_existing = !playlists.is_empty()
            && self
                .ask_until("Use an existing playlist? [y/N]", |s| parse_yes_no(s, false))
                .unwrap_or(false);
        if use_existing {
            let Some(playlist) = self.pick_playlist(playlists) else {
                return PlaylistChoice::Skip;
            };
            let clean = self
                .ask_until(
                    &format!("Remove tracks from '{}' that are now found locally? [y/N]", playlist.name),
                    |s| parse_yes_no(s, false),
                )
                .unwrap_or(false);
            return PlaylistChoice::Existing { playlist, clean };
        }

        let name = self
            .ask(&format!("New playlist name [{}]:", suggested_name))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| suggested_name.to_string());
        PlaylistChoice::Create(name)
    }

    fn orphan(&mut self, orphan: &OrphanCandidate, position: usize, total: usize, mode: OrphanMode) -> OrphanChoice {
        let mut lines = vec![format!(
            "\nLocal orphan {}/{}: {}",
            position,
            total,
            orphan.local.track.display_name()
        )];
        for (i, r) in orphan.results.iter().enumerate() {
            lines.push(format!(
                "  {:>2}. {} [{}] {}% ({})",
                i + 1,
                r.track.display_name(),
                r.track.album,
                r.score,
                r.track.identifier
            ));
        }
        for line in &lines {
            if self.say(line).is_none() {
                return OrphanChoice::CancelAll;
            }
        }
        let verb = match mode {
            OrphanMode::AddToLiked => "like",
            OrphanMode::AddToPlaylist => "add to the playlist",
            OrphanMode::Display => "select",
        };
        let results = orphan.results.len();
        self.ask_until(
            &format!("Select a match to {} (1-{}, 0 to skip, c to cancel all):", verb, results),
            |s| parse_orphan_choice(s, results),
        )
        .unwrap_or(OrphanChoice::CancelAll)
    }

    fn orphan_playlist(&mut self, playlists: &[Playlist], suggested_name: &str) -> OrphanPlaylistChoice {
        let use_existing = !playlists.is_empty()
            && match self.ask_until(
                &format!("Add orphans to a new playlist ('{}') or an existing one? [N/e]", suggested_name),
                |s| match s.trim().to_lowercase().as_str() {
                    "" | "n" | "new" => Some(false),
                    "e" | "existing" => Some(true),
                    _ => None,
                },
            ) {
                Some(existing) => existing,
                None => return OrphanPlaylistChoice::Skip,
            };
        if !use_existing {
            return OrphanPlaylistChoice::New(suggested_name.to_string());
        }
        match self.pick_playlist(playlists) {
            Some(playlist) => OrphanPlaylistChoice::Existing(playlist),
            None => OrphanPlaylistChoice::Skip,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{KeyedTrack, MatchDecision, NormalizedKey, RankedResult, Resolution, ScoredCandidate, Tier, Track};
    use crate::version::DEFAULT_VERSION_KEYWORDS;
    use std::io::{self, Cursor};

    fn keywords() -> VersionKeywords {
        VersionKeywords::new(DEFAULT_VERSION_KEYWORDS).unwrap()
    }

    fn presenter(input: &str) -> TerminalPresenter<Cursor<Vec<u8>>, Vec<u8>> {
        TerminalPresenter::new(Cursor::new(input.as_bytes().to_vec()), Vec::new(), keywords())
    }

    /// Output whose reader went away.
    struct ClosedOutput;

    impl Write for ClosedOutput {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }
        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }
    }

    fn review_decision(remote_title: &str, local_title: &str) -> MatchDecision {
        MatchDecision {
            remote: Track::remote("r:1", remote_title, "Band", ""),
            tier: Tier::Review,
            candidate: Some(ScoredCandidate {
                local: Track::local("/m/1.mp3", local_title, "Band", ""),
                title_score: 80,
                artist_score: 100,
            }),
            score: 80,
            version_note: None,
            resolution: Resolution::Automatic,
        }
    }

    #[test]
    fn test_parse_review_choice() {
        assert_eq!(parse_review_choice(" Y\n"), Some(ReviewChoice::Action(ReviewAction::Accept)));
        assert_eq!(parse_review_choice("na"), Some(ReviewChoice::Action(ReviewAction::RejectAll)));
        assert_eq!(parse_review_choice("SA"), Some(ReviewChoice::Action(ReviewAction::SkipAll)));
        assert_eq!(parse_review_choice("q"), Some(ReviewChoice::Quit));
        assert_eq!(parse_review_choice("maybe"), None);
    }

    #[test]
    fn test_parse_orphan_choice() {
        assert_eq!(parse_orphan_choice("2", 3), Some(OrphanChoice::Select(1)));
        assert_eq!(parse_orphan_choice("0", 3), Some(OrphanChoice::Skip));
        assert_eq!(parse_orphan_choice("C", 3), Some(OrphanChoice::CancelAll));
        assert_eq!(parse_orphan_choice("4", 3), None);
    }

    #[test]
    fn test_review_reprompts_then_quits_at_eof() {
        let decision = MatchDecision {
            remote: Track::remote("r:1", "Song", "Band", ""),
            tier: Tier::Review,
            candidate: None,
            score: 80,
            version_note: None,
            resolution: Resolution::Automatic,
        };
        let item = ReviewItem {
            position: 1,
            total: 1,
            decision: &decision,
        };

        let mut p = presenter("what\nn\n");
        assert_eq!(p.review(&item), ReviewChoice::Action(ReviewAction::Reject));
        assert!(String::from_utf8_lossy(&p.output).contains("Invalid answer"));

        let mut p = presenter("");
        assert_eq!(p.review(&item), ReviewChoice::Quit);
    }

    #[test]
    fn test_review_shows_version_difference() {
        let decision = review_decision("Help!", "Help! (Mono)");
        let item = ReviewItem {
            position: 1,
            total: 1,
            decision: &decision,
        };
        let mut p = presenter("y\n");
        assert_eq!(p.review(&item), ReviewChoice::Action(ReviewAction::Accept));
        let shown = String::from_utf8_lossy(&p.output).to_string();
        assert!(shown.contains("Version: local copy may be a Mono version"), "{}", shown);

        let plain = review_decision("Help", "Help!");
        let item = ReviewItem {
            position: 1,
            total: 1,
            decision: &plain,
        };
        let mut p = presenter("y\n");
        p.review(&item);
        assert!(!String::from_utf8_lossy(&p.output).contains("Version:"));
    }

    #[test]
    fn test_closed_output_ends_prompts() {
        let decision = review_decision("Song", "Song");
        let item = ReviewItem {
            position: 1,
            total: 1,
            decision: &decision,
        };
        // Plenty of answers, but nobody can see the questions
        let mut p = TerminalPresenter::new(Cursor::new(b"y\ny\n".to_vec()), ClosedOutput, keywords());
        assert_eq!(p.review(&item), ReviewChoice::Quit);
        assert_eq!(p.orphan_playlist(&[], "Finds"), OrphanPlaylistChoice::New("Finds".into()));
        assert_eq!(p.missing_playlist(1, &[], "Missing"), PlaylistChoice::Skip);
    }

    #[test]
    fn test_orphan_playlist_choice() {
        let playlists = vec![Playlist {
            id: "p1".into(),
            name: "Finds".into(),
            track_count: 2,
        }];

        let mut p = presenter("\n");
        assert_eq!(
            p.orphan_playlist(&playlists, "Local Orphans Found"),
            OrphanPlaylistChoice::New("Local Orphans Found".into())
        );

        let mut p = presenter("e\n1\n");
        assert_eq!(
            p.orphan_playlist(&playlists, "Local Orphans Found"),
            OrphanPlaylistChoice::Existing(playlists[0].clone())
        );

        let mut p = presenter("e\n0\n");
        assert_eq!(p.orphan_playlist(&playlists, "Local Orphans Found"), OrphanPlaylistChoice::Skip);

        // No playlists to pick from: no question
        let mut p = presenter("");
        assert_eq!(
            p.orphan_playlist(&[], "Local Orphans Found"),
            OrphanPlaylistChoice::New("Local Orphans Found".into())
        );
    }

    #[test]
    fn test_missing_playlist_flow() {
        let playlists = vec![Playlist {
            id: "p1".into(),
            name: "Old".into(),
            track_count: 4,
        }];

        let mut p = presenter("n\n");
        assert_eq!(p.missing_playlist(3, &playlists, "Missing"), PlaylistChoice::Skip);

        let mut p = presenter("y\nn\n\n");
        assert_eq!(
            p.missing_playlist(3, &playlists, "Missing"),
            PlaylistChoice::Create("Missing".into())
        );

        let mut p = presenter("y\ny\n1\ny\n");
        assert_eq!(
            p.missing_playlist(3, &playlists, "Missing"),
            PlaylistChoice::Existing {
                playlist: playlists[0].clone(),
                clean: true
            }
        );
    }

    #[test]
    fn test_orphan_prompt() {
        let mut orphan = OrphanCandidate::new(KeyedTrack {
            track: Track::local("/m/a.mp3", "A", "B", ""),
            key: NormalizedKey::default(),
        });
        orphan.results.push(RankedResult {
            track: Track::remote("r:a", "A", "B", ""),
            score: 100,
        });
        let mut p = presenter("1\n");
        assert_eq!(p.orphan(&orphan, 1, 1, OrphanMode::AddToLiked), OrphanChoice::Select(0));
        let mut p = presenter("");
        assert_eq!(p.orphan(&orphan, 1, 1, OrphanMode::AddToLiked), OrphanChoice::CancelAll);
    }
}
