//! Final report model and the report files written from it.
//!
//! Files:
//! - links file: one remote identifier per Missing track
//! - details TSV: Missing tracks with album and review note
//! - annotated TSV: Matched tracks that carry a version note
//!
//! Dry-run files are identical to live ones except for a leading
//! `# DRY RUN` line in each TSV.

use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};

use crate::atomic;
use crate::config::Config;
use crate::models::{MatchDecision, OrphanCandidate, Resolution, RunStats, Tier};
use crate::orphan::OrphanReport;
use crate::playlist::PlaylistOutcome;

pub const DRY_RUN_LINE: &str = "# DRY RUN: changes were not applied";

const DETAILS_HEADER: &str = "URL\tTitle\tArtist\tAlbum\tNote";

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Collection label, as used in playlist names.
    pub collection: String,
    pub dry_run: bool,
    /// The user quit during review; later phases did not run.
    pub cancelled: bool,
    pub missing: Vec<MatchDecision>,
    pub matched_with_notes: Vec<MatchDecision>,
    /// Review items still open (skipped or not reached).
    pub unresolved: Vec<MatchDecision>,
    pub orphans: Vec<OrphanCandidate>,
    pub orphan_outcome: Option<OrphanReport>,
    pub playlist_outcome: Option<PlaylistOutcome>,
    pub stats: RunStats,
}

impl RunReport {
    /// Split decisions into the report buckets, keeping remote order.
    pub fn from_decisions(collection: &str, decisions: &[MatchDecision], dry_run: bool) -> Self {
        let mut report = Self {
            collection: collection.to_string(),
            dry_run,
            ..Default::default()
        };
        for d in decisions {
            match d.tier {
                Tier::Missing => report.missing.push(d.clone()),
                Tier::Matched if d.version_note.is_some() => report.matched_with_notes.push(d.clone()),
                Tier::Matched => {}
                Tier::Review => report.unresolved.push(d.clone()),
            }
        }
        report
    }

    pub fn missing_ids(&self) -> Vec<String> {
        self.missing.iter().map(|d| d.remote.identifier.clone()).collect()
    }

    /// End-of-run summary in the log.
    pub fn log_summary(&self) {
        if self.dry_run {
            tracing::info!("{}", DRY_RUN_LINE.trim_start_matches("# "));
        }
        if self.cancelled {
            tracing::warn!("Run cancelled during review; progress so far was kept");
        }
        tracing::info!(
            "{} missing, {} matched with version notes, {} unresolved ({:.1}% of remote tracks found locally)",
            self.missing.len(),
            self.matched_with_notes.len(),
            self.unresolved.len(),
            self.stats.match_rate()
        );
        self.stats.log_phase("final");
    }
}

/// Note column: version note plus how a reviewed decision was resolved.
pub fn note_for(decision: &MatchDecision) -> String {
    let mut note = decision.version_note.clone().unwrap_or_default();
    if decision.resolution != Resolution::Automatic {
        if !note.is_empty() {
            note.push(' ');
        }
        let _ = write!(note, "(Review: {})", decision.resolution.label());
    }
    note
}

/// Tabs and newlines inside a field would break the TSV layout.
fn field(s: &str) -> String {
    s.replace(['\t', '\n', '\r'], " ")
}

fn details_tsv(decisions: &[MatchDecision], dry_run: bool) -> String {
    let mut out = String::new();
    if dry_run {
        out.push_str(DRY_RUN_LINE);
        out.push('\n');
    }
    out.push_str(DETAILS_HEADER);
    out.push('\n');
    for d in decisions {
        let _ = writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}",
            field(&d.remote.identifier),
            field(&d.remote.title),
            field(&d.remote.artist),
            field(&d.remote.album),
            field(&note_for(d))
        );
    }
    out
}

/// Write the links file and the details TSV for the Missing tracks.
/// Nothing is written when no track is missing.
pub fn write_missing(dir: &Path, config: &Config, report: &RunReport) -> io::Result<Option<(PathBuf, PathBuf)>> {
    if report.missing.is_empty() {
        tracing::info!("No remote tracks are missing locally");
        return Ok(None);
    }

    let links_path = dir.join(&config.missing_links_file);
    let mut links = String::new();
    for d in &report.missing {
        links.push_str(&d.remote.identifier);
        links.push('\n');
    }
    atomic::write_bytes(&links_path, links.as_bytes())?;

    let details_path = dir.join(&config.missing_details_file);
    atomic::write_bytes(&details_path, details_tsv(&report.missing, report.dry_run).as_bytes())?;

    tracing::info!(
        "Wrote {} missing tracks to {} and {}",
        report.missing.len(),
        links_path.display(),
        details_path.display()
    );
    Ok(Some((links_path, details_path)))
}

/// Write the matched-with-notes TSV. Nothing is written when no match
/// carries a note.
pub fn write_annotated(dir: &Path, config: &Config, report: &RunReport) -> io::Result<Option<PathBuf>> {
    if report.matched_with_notes.is_empty() {
        return Ok(None);
    }
    let path = dir.join(&config.annotated_report_file);
    atomic::write_bytes(&path, details_tsv(&report.matched_with_notes, report.dry_run).as_bytes())?;
    tracing::info!(
        "Wrote {} matches with version notes to {}",
        report.matched_with_notes.len(),
        path.display()
    );
    Ok(Some(path))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigFile;
    use crate::models::{ScoredCandidate, Track};
    use std::fs;
    use tempfile::TempDir;

    fn decision(id: &str, tier: Tier, note: Option<&str>, resolution: Resolution) -> MatchDecision {
        MatchDecision {
            remote: Track::remote(id, "Yesterday", "The Beatles", "Help!"),
            tier,
            candidate: Some(ScoredCandidate {
                local: Track::local("/m/yesterday.mp3", "Yesterday", "The Beatles", ""),
                title_score: 90,
                artist_score: 100,
            }),
            score: 95,
            version_note: note.map(str::to_string),
            resolution,
        }
    }

    fn sample() -> Vec<MatchDecision> {
        vec![
            decision("r:1", Tier::Missing, None, Resolution::Automatic),
            decision("r:2", Tier::Matched, Some("local copy may be a remastered version; remote is standard"), Resolution::Automatic),
            decision("r:3", Tier::Matched, None, Resolution::Automatic),
            decision("r:4", Tier::Review, None, Resolution::Automatic),
            decision("r:5", Tier::Missing, None, Resolution::Reviewed),
        ]
    }

    fn config() -> Config {
        Config::from_raw(ConfigFile::default()).unwrap()
    }

    #[test]
    fn test_buckets_keep_order() {
        let report = RunReport::from_decisions("Music", &sample(), false);
        assert_eq!(report.missing_ids(), vec!["r:1".to_string(), "r:5".to_string()]);
        assert_eq!(report.matched_with_notes.len(), 1);
        assert_eq!(report.unresolved.len(), 1);
    }

    #[test]
    fn test_note_includes_review_resolution() {
        let d = decision("r:5", Tier::Missing, None, Resolution::Reviewed);
        assert_eq!(note_for(&d), "(Review: reviewed)");
        let d = decision("r:2", Tier::Matched, Some("versions differ"), Resolution::BulkReviewed);
        assert_eq!(note_for(&d), "versions differ (Review: reviewed (bulk))");
        let d = decision("r:1", Tier::Missing, None, Resolution::Automatic);
        assert_eq!(note_for(&d), "");
    }

    #[test]
    fn test_write_missing_files() {
        let dir = TempDir::new().unwrap();
        let report = RunReport::from_decisions("Music", &sample(), false);
        let (links, details) = write_missing(dir.path(), &config(), &report).unwrap().unwrap();

        assert_eq!(fs::read_to_string(links).unwrap(), "r:1\nr:5\n");
        let details = fs::read_to_string(details).unwrap();
        let lines: Vec<&str> = details.lines().collect();
        assert_eq!(lines[0], DETAILS_HEADER);
        assert_eq!(lines[1], "r:1\tYesterday\tThe Beatles\tHelp!\t");
        assert_eq!(lines[2], "r:5\tYesterday\tThe Beatles\tHelp!\t(Review: reviewed)");
    }

    #[test]
    fn test_dry_run_differs_only_by_marker_line() {
        let live_dir = TempDir::new().unwrap();
        let dry_dir = TempDir::new().unwrap();
        let live = RunReport::from_decisions("Music", &sample(), false);
        let dry = RunReport::from_decisions("Music", &sample(), true);

        let (_, live_details) = write_missing(live_dir.path(), &config(), &live).unwrap().unwrap();
        let (_, dry_details) = write_missing(dry_dir.path(), &config(), &dry).unwrap().unwrap();
        let live_text = fs::read_to_string(live_details).unwrap();
        let dry_text = fs::read_to_string(dry_details).unwrap();
        assert_eq!(dry_text, format!("{}\n{}", DRY_RUN_LINE, live_text));
    }

    #[test]
    fn test_nothing_written_when_empty() {
        let dir = TempDir::new().unwrap();
        let report = RunReport::from_decisions("Music", &[], false);
        assert!(write_missing(dir.path(), &config(), &report).unwrap().is_none());
        assert!(write_annotated(dir.path(), &config(), &report).unwrap().is_none());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_annotated_report() {
        let dir = TempDir::new().unwrap();
        let report = RunReport::from_decisions("Music", &sample(), false);
        let path = write_annotated(dir.path(), &config(), &report).unwrap().unwrap();
        let text = fs::read_to_string(path).unwrap();
        assert!(text.contains("r:2\tYesterday"));
        assert!(text.contains("remastered"));
        assert!(!text.contains("r:3"));
    }

    #[test]
    fn test_fields_are_sanitized() {
        assert_eq!(field("a\tb\nc"), "a b c");
    }
}
