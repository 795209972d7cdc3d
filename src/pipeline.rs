//! End-to-end reconciliation run.
//!
//! Phases:
//! 1. Inputs: fingerprint both catalogs, reuse the session snapshot or
//!    fetch, scan and key from scratch
//! 2. Classification
//! 3. Review, checkpointed after every change
//! 4. Version notes
//! 5. Missing-tracks playlist (optional, presenter decides)
//! 6. Orphans (optional, by `OrphanMode`)
//!
//! The presenter is the only source of user input. Remote mutations are
//! suppressed in dry-run mode; everything else runs the same.

use chrono::{Local, Utc};
use std::time::Instant;

use crate::cache::{Fingerprint, SessionCache, SnapshotView, SNAPSHOT_VERSION};
use crate::classify::{classify_all, tier_counts};
use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::models::{KeyedTrack, MatchDecision, OrphanAction, OrphanCandidate, Resolution, RunStats, Tier};
use crate::normalize::{key_catalog, rekey_catalog};
use crate::orphan::{apply_orphan_actions, find_orphans, search_orphans, OrphanReport};
use crate::playlist::{
    add_missing_to_playlist, clean_playlist, find_or_create_playlist, open_playlist, PlaylistOutcome,
};
use crate::progress::format_duration;
use crate::remote::{fetch_liked, Playlist, RemoteCatalog};
use crate::report::RunReport;
use crate::review::{ReviewChoice, ReviewItem, ReviewSession, ReviewSummary};
use crate::scan::LocalLibrary;
use crate::version::annotate_all;

// ============================================================================
// Options and presenter
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrphanMode {
    /// Search and show results only.
    Display,
    AddToLiked,
    AddToPlaylist,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub dry_run: bool,
    pub save_session: bool,
    pub orphan_mode: Option<OrphanMode>,
    pub orphan_playlist_name: String,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            save_session: true,
            orphan_mode: None,
            orphan_playlist_name: "Local Orphans Found".to_string(),
        }
    }
}

/// What to do with the Missing tracks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaylistChoice {
    Skip,
    /// New playlist with this name (reused if one already has it).
    Create(String),
    /// Add to an existing playlist, optionally removing tracks that are now
    /// found locally first.
    Existing { playlist: Playlist, clean: bool },
}

/// Where orphans picked for a playlist go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrphanPlaylistChoice {
    /// Playlist with this name, created unless one already has it.
    New(String),
    Existing(Playlist),
    /// No playlist; the picks are counted as skipped.
    Skip,
}

/// Answer for one orphan. `Select` indexes into the orphan's results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrphanChoice {
    Select(usize),
    Skip,
    /// Stop prompting; actions chosen so far are still applied.
    CancelAll,
}

/// Request/response boundary to the user.
pub trait Presenter {
    fn review(&mut self, item: &ReviewItem<'_>) -> ReviewChoice;

    fn missing_playlist(&mut self, missing: usize, playlists: &[Playlist], suggested_name: &str) -> PlaylistChoice;

    fn orphan(&mut self, orphan: &OrphanCandidate, position: usize, total: usize, mode: OrphanMode) -> OrphanChoice;

    /// Asked once, after the picks, when at least one orphan goes to a
    /// playlist.
    fn orphan_playlist(&mut self, playlists: &[Playlist], suggested_name: &str) -> OrphanPlaylistChoice;
}

/// Downgrade exhausted retries to a warning; anything else propagates.
fn soft<T>(what: &str, result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e @ SyncError::TransientRemote { .. }) => {
            tracing::warn!("{} skipped: {}", what, e);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

// ============================================================================
// Inputs
// ============================================================================

struct Inputs {
    /// `None` when the remote marker could not be read.
    fingerprint: Option<Fingerprint>,
    remote: Vec<KeyedTrack>,
    local: Vec<KeyedTrack>,
    local_files_seen: usize,
    local_files_excluded: usize,
    decisions: Vec<MatchDecision>,
    /// False when the liked fetch stopped early or had no marker; such
    /// inputs are not cached.
    complete: bool,
    reused: bool,
}

fn load_inputs(
    config: &Config,
    cache: &SessionCache,
    remote: &dyn RemoteCatalog,
    library: &dyn LocalLibrary,
) -> Result<Inputs> {
    let rules_digest = config.rules.digest();
    let marker = match config.retry.call("catalog marker", || remote.catalog_marker()) {
        Ok(marker) => Some(marker),
        Err(e @ SyncError::TransientRemote { .. }) => {
            tracing::warn!("{}. Skipping the saved session and fetching everything", e);
            None
        }
        Err(e) => return Err(e),
    };
    let stamps = library.stamps()?;
    let cached = marker.as_ref().and_then(|marker| {
        let fingerprint = Fingerprint::compute(marker, &stamps);
        tracing::debug!("Input fingerprint {}", fingerprint.as_str());
        cache.load(&fingerprint).map(|snapshot| (fingerprint, snapshot))
    });

    if let Some((fingerprint, snapshot)) = cached {
        let reclassify = snapshot.needs_reclassify(&rules_digest, config.thresholds);
        let (remote_keyed, local_keyed) = if snapshot.needs_rekey(&rules_digest) {
            tracing::info!("Normalization rules changed, recomputing keys");
            (
                rekey_catalog(snapshot.remote, &config.rules),
                rekey_catalog(snapshot.local, &config.rules),
            )
        } else {
            (snapshot.remote, snapshot.local)
        };
        let decisions = if reclassify {
            tracing::info!("Rules or thresholds changed, reclassifying cached catalogs");
            classify_all(&remote_keyed, &local_keyed, config.thresholds)
        } else {
            snapshot.decisions
        };
        return Ok(Inputs {
            fingerprint: Some(fingerprint),
            remote: remote_keyed,
            local: local_keyed,
            local_files_seen: snapshot.local_files_seen,
            local_files_excluded: snapshot.local_files_excluded,
            decisions,
            complete: true,
            reused: true,
        });
    }

    let fetch = fetch_liked(remote, &config.retry)?;
    let scan = library.scan()?;
    for excluded in &scan.excluded {
        tracing::debug!("Excluded: {}", excluded);
    }
    if !scan.excluded.is_empty() {
        tracing::warn!("{} local files could not be read and were excluded", scan.excluded.len());
    }

    let remote_keyed = key_catalog(fetch.tracks, &config.rules);
    let local_keyed = key_catalog(scan.tracks, &config.rules);
    let decisions = classify_all(&remote_keyed, &local_keyed, config.thresholds);

    Ok(Inputs {
        // The marker seen by the fetch is the one the data belongs to
        fingerprint: fetch.marker.as_ref().map(|m| Fingerprint::compute(m, &stamps)),
        remote: remote_keyed,
        local: local_keyed,
        local_files_seen: scan.files_seen,
        local_files_excluded: scan.excluded.len(),
        decisions,
        complete: fetch.complete && fetch.marker.is_some(),
        reused: false,
    })
}

fn classification_stats(stats: &mut RunStats, decisions: &[MatchDecision]) {
    for d in decisions {
        match (d.tier, d.resolution) {
            (Tier::Matched, Resolution::Automatic) => stats.auto_matched += 1,
            (Tier::Missing, Resolution::Automatic) => stats.auto_missing += 1,
            _ => stats.sent_to_review += 1,
        }
    }
}

// ============================================================================
// Run
// ============================================================================

pub fn run(
    config: &Config,
    options: &RunOptions,
    cache: &SessionCache,
    remote: &dyn RemoteCatalog,
    library: &dyn LocalLibrary,
    presenter: &mut dyn Presenter,
) -> Result<RunReport> {
    let started = Instant::now();
    let label = library.label();
    if options.dry_run {
        tracing::info!("Dry run: no changes will be made to the remote account");
    }
    tracing::info!(
        "Thresholds: similarity {}%, review {}%",
        config.thresholds.similarity,
        config.thresholds.review
    );

    // Phase 1: inputs
    let Inputs {
        fingerprint,
        remote: remote_keyed,
        local: local_keyed,
        local_files_seen,
        local_files_excluded,
        mut decisions,
        complete,
        reused,
    } = load_inputs(config, cache, remote, library)?;

    let mut stats = RunStats {
        remote_tracks: remote_keyed.len(),
        remote_fetch_incomplete: !complete,
        local_files_seen,
        local_tracks: local_keyed.len(),
        local_files_excluded,
        session_reused: reused,
        ..Default::default()
    };
    stats.log_phase("inputs");

    let rules_digest = config.rules.digest();
    let save_under = fingerprint.as_ref().filter(|_| options.save_session && complete);
    if options.save_session && !complete {
        tracing::warn!("Remote inputs are incomplete; the session will not be saved");
    }
    let checkpoint = |decisions: &[MatchDecision]| {
        if let Some(fingerprint) = save_under {
            cache.save(&SnapshotView {
                version: SNAPSHOT_VERSION,
                fingerprint,
                rules_digest: &rules_digest,
                thresholds: config.thresholds,
                saved_at: Utc::now(),
                remote: &remote_keyed,
                local: &local_keyed,
                local_files_seen,
                local_files_excluded,
                decisions,
            });
        }
    };

    // Phase 2: classification
    classification_stats(&mut stats, &decisions);
    let (matched, review, missing) = tier_counts(&decisions);
    tracing::info!(
        "Classification: {} matched, {} to review, {} missing",
        matched,
        review,
        missing
    );
    checkpoint(&decisions);

    // Phase 3: review
    let mut cancelled = false;
    {
        let mut session = ReviewSession::new(&mut decisions);
        if !session.is_finished() {
            tracing::info!("{} tracks need review", session.remaining());
        }
        while let Some(item) = session.current() {
            let action = match presenter.review(&item) {
                ReviewChoice::Action(action) => action,
                ReviewChoice::Quit => {
                    cancelled = true;
                    break;
                }
            };
            if session.apply(action) > 0 {
                checkpoint(session.decisions());
            }
        }
    }
    let review_summary = ReviewSummary::tally(&decisions);
    stats.review_accepted = review_summary.accepted;
    stats.review_rejected = review_summary.rejected;
    stats.review_conflicts = review_summary.conflicts;
    stats.review_unresolved = review_summary.unresolved;

    // Phase 4: version notes
    stats.version_notes = annotate_all(&mut decisions, &config.version_keywords);
    checkpoint(&decisions);

    let mut report = RunReport::from_decisions(&label, &decisions, options.dry_run);
    if cancelled {
        tracing::warn!("Review cancelled; skipping playlist and orphan processing");
        report.cancelled = true;
        stats.elapsed_seconds = started.elapsed().as_secs_f64();
        report.stats = stats;
        return Ok(report);
    }

    // Phase 5: playlist for the Missing tracks
    if !report.missing.is_empty() {
        if let Some(outcome) = missing_playlist_phase(config, options, remote, presenter, &local_keyed, &report)? {
            stats.playlist_added = outcome.added;
            stats.playlist_already_present = outcome.already_present;
            stats.playlist_removed = outcome.removed;
            report.playlist_outcome = Some(outcome);
        }
    }

    // Phase 6: orphans
    if let Some(mode) = options.orphan_mode {
        let mut orphans = find_orphans(&local_keyed, &decisions);
        stats.orphans = orphans.len();
        tracing::info!("{} local tracks have no match in the liked collection", orphans.len());

        if !orphans.is_empty() {
            let searched = search_orphans(
                remote,
                &config.retry,
                &config.rules,
                &mut orphans,
                config.search_result_limit,
            )?;
            stats.orphan_searches_failed = searched.failed;

            if mode != OrphanMode::Display {
                stage_orphan_actions(presenter, &mut orphans, mode);
                if let Some(outcome) = apply_orphans_phase(config, options, remote, presenter, &orphans)? {
                    stats.orphans_added_to_liked = outcome.added_to_liked;
                    stats.orphans_added_to_playlist = outcome.added_to_playlist;
                    stats.orphans_already_present = outcome.already_present;
                    report.orphan_outcome = Some(outcome);
                }
            }
        }
        report.orphans = orphans;
    }

    stats.elapsed_seconds = started.elapsed().as_secs_f64();
    tracing::info!("Run finished in {}", format_duration(started.elapsed()));
    report.stats = stats;
    Ok(report)
}

fn missing_playlist_phase(
    config: &Config,
    options: &RunOptions,
    remote: &dyn RemoteCatalog,
    presenter: &mut dyn Presenter,
    local: &[KeyedTrack],
    report: &RunReport,
) -> Result<Option<PlaylistOutcome>> {
    let retry = &config.retry;
    let Some(playlists) = soft("Playlist step", retry.call("list playlists", || remote.playlists()))? else {
        return Ok(None);
    };

    let now = Local::now();
    let suggested = config.playlist_name(&report.collection, &now.format("%Y-%m-%d").to_string());
    let choice = presenter.missing_playlist(report.missing.len(), &playlists, &suggested);

    let mut removed = 0;
    let target = match choice {
        PlaylistChoice::Skip => {
            tracing::info!("Missing tracks were not added to a playlist");
            return Ok(None);
        }
        PlaylistChoice::Create(name) => {
            let description = format!(
                "Liked tracks missing from '{}'. Checked {}.",
                report.collection,
                now.format("%Y-%m-%d %H:%M")
            );
            soft(
                "Playlist step",
                find_or_create_playlist(remote, retry, &name, &description, options.dry_run),
            )?
        }
        PlaylistChoice::Existing { playlist, clean } => {
            let opened = soft("Playlist step", open_playlist(remote, retry, &playlist))?;
            match opened {
                Some(mut target) if clean => {
                    removed = soft(
                        "Playlist cleaning",
                        clean_playlist(
                            remote,
                            retry,
                            &mut target,
                            local,
                            &config.rules,
                            config.thresholds.similarity,
                            options.dry_run,
                        ),
                    )?
                    .unwrap_or(0);
                    Some(target)
                }
                other => other,
            }
        }
    };

    let Some(mut target) = target else {
        return Ok(None);
    };
    let outcome = soft(
        "Playlist step",
        add_missing_to_playlist(remote, retry, &mut target, &report.missing_ids(), options.dry_run),
    )?;
    Ok(outcome.map(|mut o| {
        o.removed = removed;
        o
    }))
}

/// Ask about every orphan that has results, in order.
fn stage_orphan_actions(presenter: &mut dyn Presenter, orphans: &mut [OrphanCandidate], mode: OrphanMode) {
    let total = orphans.iter().filter(|o| !o.results.is_empty()).count();
    let mut position = 0;
    for orphan in orphans.iter_mut().filter(|o| !o.results.is_empty()) {
        position += 1;
        let action = match presenter.orphan(orphan, position, total, mode) {
            OrphanChoice::Select(i) if mode == OrphanMode::AddToLiked => OrphanAction::AddToLiked(i),
            OrphanChoice::Select(i) => OrphanAction::AddToPlaylist(i),
            OrphanChoice::Skip => OrphanAction::Skip,
            OrphanChoice::CancelAll => {
                tracing::info!("Orphan processing cancelled after {} of {}", position - 1, total);
                break;
            }
        };
        if !orphan.stage(action) {
            tracing::warn!(
                "Ignoring invalid selection for {}",
                orphan.local.track.display_name()
            );
        }
    }
}

fn apply_orphans_phase(
    config: &Config,
    options: &RunOptions,
    remote: &dyn RemoteCatalog,
    presenter: &mut dyn Presenter,
    orphans: &[OrphanCandidate],
) -> Result<Option<OrphanReport>> {
    let retry = &config.retry;
    let wants_playlist = orphans
        .iter()
        .any(|o| matches!(o.action, OrphanAction::AddToPlaylist(_)));

    let mut target = None;
    if wants_playlist {
        let Some(playlists) = soft("Orphan playlist", retry.call("list playlists", || remote.playlists()))? else {
            return Ok(None);
        };
        let opened = match presenter.orphan_playlist(&playlists, &options.orphan_playlist_name) {
            OrphanPlaylistChoice::New(name) => {
                let description = format!(
                    "Local tracks found in the catalog {}",
                    Local::now().format("%Y-%m-%d")
                );
                find_or_create_playlist(remote, retry, &name, &description, options.dry_run)
            }
            OrphanPlaylistChoice::Existing(playlist) => open_playlist(remote, retry, &playlist),
            OrphanPlaylistChoice::Skip => {
                tracing::info!("No playlist chosen; orphans picked for a playlist are skipped");
                return apply_orphan_actions(remote, retry, orphans, None, options.dry_run).map(Some);
            }
        };
        let Some(opened) = soft("Orphan playlist", opened)? else {
            return Ok(None);
        };
        target = Some(opened);
    }

    apply_orphan_actions(remote, retry, orphans, target.as_mut(), options.dry_run).map(Some)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteError;

    #[test]
    fn test_soft_downgrades_only_transient() {
        let transient: Result<u8> = Err(SyncError::from_remote(RemoteError::Transient("t".into()), 3));
        assert!(soft("step", transient).unwrap().is_none());

        let fatal: Result<u8> = Err(SyncError::from_remote(RemoteError::Unauthorized("u".into()), 1));
        assert!(soft("step", fatal).is_err());

        assert_eq!(soft("step", Ok(7u8)).unwrap(), Some(7));
    }

    #[test]
    fn test_default_options() {
        let options = RunOptions::default();
        assert!(options.save_session);
        assert!(!options.dry_run);
        assert!(options.orphan_mode.is_none());
    }
}
