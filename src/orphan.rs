//! Orphan resolution: local tracks that no Matched decision claims.
//!
//! Orphans are searched for in the remote catalog, results are re-ranked
//! with the same scorer the classifier uses, and the actions the user
//! staged are applied with an already-present check before every add.

use rayon::prelude::*;
use rustc_hash::FxHashSet;
use serde::Serialize;

use crate::error::{Result, SyncError};
use crate::models::{KeyedTrack, MatchDecision, OrphanAction, OrphanCandidate, RankedResult, Track};
use crate::normalize::{key_track, NormalizationRules};
use crate::playlist::PlaylistTarget;
use crate::progress::{create_progress_bar, log_progress};
use crate::remote::RemoteCatalog;
use crate::retry::RetryPolicy;
use crate::scoring::score_keys;

// ============================================================================
// Discovery
// ============================================================================

/// Local tracks not claimed by any Matched decision, in catalog order.
pub fn find_orphans(local: &[KeyedTrack], decisions: &[MatchDecision]) -> Vec<OrphanCandidate> {
    let claimed: FxHashSet<&str> = decisions.iter().filter_map(|d| d.claimed_local()).collect();
    local
        .iter()
        .filter(|l| !claimed.contains(l.track.identifier.as_str()))
        .cloned()
        .map(OrphanCandidate::new)
        .collect()
}

/// Free-text query for an orphan: normalized artist and title. `None` for
/// untagged files.
pub fn search_query(orphan: &KeyedTrack) -> Option<String> {
    let query = format!("{} {}", orphan.key.artist, orphan.key.title);
    let query = query.trim();
    if query.is_empty() {
        None
    } else {
        Some(query.to_string())
    }
}

/// Score search hits against the orphan and keep the best `limit`. Ties
/// keep the service's order.
pub fn rank_results(
    orphan: &KeyedTrack,
    hits: Vec<Track>,
    rules: &NormalizationRules,
    limit: usize,
) -> Vec<RankedResult> {
    let mut ranked: Vec<RankedResult> = hits
        .into_iter()
        .map(|hit| {
            let keyed = key_track(hit, rules);
            RankedResult {
                score: score_keys(&orphan.key, &keyed.key).composite,
                track: keyed.track,
            }
        })
        .collect();
    ranked.sort_by(|a, b| b.score.cmp(&a.score));
    ranked.truncate(limit);
    ranked
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SearchStats {
    pub searched: usize,
    pub failed: usize,
    pub without_results: usize,
}

/// Search every orphan. Searches run in parallel; a search that still fails
/// after retries marks only that orphan. A fatal error stops the phase.
pub fn search_orphans(
    remote: &dyn RemoteCatalog,
    retry: &RetryPolicy,
    rules: &NormalizationRules,
    orphans: &mut [OrphanCandidate],
    limit: usize,
) -> Result<SearchStats> {
    let total = orphans.len() as u64;
    let pb = create_progress_bar(total, "Searching for local orphans");

    let outcomes: Vec<Result<()>> = orphans
        .par_iter_mut()
        .map(|orphan| {
            let outcome = match search_query(&orphan.local) {
                None => Ok(()),
                Some(query) => match retry.call("orphan search", || remote.search(&query, limit)) {
                    Ok(hits) => {
                        orphan.results = rank_results(&orphan.local, hits, rules, limit);
                        Ok(())
                    }
                    Err(e @ SyncError::TransientRemote { .. }) => {
                        tracing::debug!("Search failed for {}: {}", orphan.local.track.display_name(), e);
                        orphan.search_failed = true;
                        Ok(())
                    }
                    Err(e) => Err(e),
                },
            };
            pb.inc(1);
            log_progress("orphans", pb.position(), total, 100);
            outcome
        })
        .collect();
    pb.finish_and_clear();

    outcomes.into_iter().collect::<Result<Vec<()>>>()?;

    let stats = SearchStats {
        searched: orphans.len(),
        failed: orphans.iter().filter(|o| o.search_failed).count(),
        without_results: orphans
            .iter()
            .filter(|o| !o.search_failed && o.results.is_empty())
            .count(),
    };
    if stats.failed > 0 {
        tracing::warn!("{} orphan searches failed after retries", stats.failed);
    }
    tracing::info!(
        "Searched {} orphans ({} without results)",
        stats.searched,
        stats.without_results
    );
    Ok(stats)
}

// ============================================================================
// Applying staged actions
// ============================================================================

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OrphanReport {
    pub added_to_liked: usize,
    pub added_to_playlist: usize,
    pub already_present: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Apply every staged action. Before each add the target is checked for
/// the identifier; a hit is counted as already present, not re-added.
/// In a dry run the checks run but nothing is sent.
pub fn apply_orphan_actions(
    remote: &dyn RemoteCatalog,
    retry: &RetryPolicy,
    orphans: &[OrphanCandidate],
    mut playlist: Option<&mut PlaylistTarget>,
    dry_run: bool,
) -> Result<OrphanReport> {
    let mut report = OrphanReport::default();
    let mut liked_this_run: FxHashSet<String> = FxHashSet::default();

    for orphan in orphans {
        let Some(selected) = orphan.selected() else {
            if orphan.action == OrphanAction::Skip {
                report.skipped += 1;
            }
            continue;
        };
        let id = selected.identifier.clone();

        match orphan.action {
            OrphanAction::AddToLiked(_) => {
                let present = liked_this_run.contains(&id)
                    || match retry.call("liked lookup", || remote.liked_contains(std::slice::from_ref(&id))) {
                        Ok(flags) => flags.first().copied().unwrap_or(false),
                        Err(e @ SyncError::TransientRemote { .. }) => {
                            tracing::warn!("Could not check liked status of {}: {}", id, e);
                            report.failed += 1;
                            continue;
                        }
                        Err(e) => return Err(e),
                    };
                if present {
                    tracing::info!("'{}' is already liked", selected.display_name());
                    report.already_present += 1;
                    continue;
                }
                if dry_run {
                    tracing::info!("[DRY RUN] Would like '{}'", selected.display_name());
                } else {
                    match retry.call("add to liked", || remote.add_to_liked(std::slice::from_ref(&id))) {
                        Ok(()) => tracing::info!("Liked '{}'", selected.display_name()),
                        Err(e @ SyncError::TransientRemote { .. }) => {
                            tracing::warn!("Could not like '{}': {}", selected.display_name(), e);
                            report.failed += 1;
                            continue;
                        }
                        Err(e) => return Err(e),
                    }
                }
                liked_this_run.insert(id);
                report.added_to_liked += 1;
            }
            OrphanAction::AddToPlaylist(_) => {
                let Some(target) = playlist.as_deref_mut() else {
                    tracing::warn!("No playlist selected for '{}'", selected.display_name());
                    report.skipped += 1;
                    continue;
                };
                if target.contains(&id) {
                    tracing::info!("'{}' is already in '{}'", selected.display_name(), target.name);
                    report.already_present += 1;
                    continue;
                }
                match (&target.id, dry_run) {
                    (Some(playlist_id), false) => {
                        match retry.call("add to playlist", || {
                            remote.add_to_playlist(playlist_id, std::slice::from_ref(&id))
                        }) {
                            Ok(()) => tracing::info!("Added '{}' to '{}'", selected.display_name(), target.name),
                            Err(e @ SyncError::TransientRemote { .. }) => {
                                tracing::warn!("Could not add '{}': {}", selected.display_name(), e);
                                report.failed += 1;
                                continue;
                            }
                            Err(e) => return Err(e),
                        }
                    }
                    _ => tracing::info!(
                        "[DRY RUN] Would add '{}' to '{}'",
                        selected.display_name(),
                        target.name
                    ),
                }
                target.existing.insert(id);
                report.added_to_playlist += 1;
            }
            OrphanAction::None | OrphanAction::Skip => {}
        }
    }

    tracing::info!(
        "Orphans: {} liked, {} added to playlist, {} already present, {} skipped, {} failed",
        report.added_to_liked,
        report.added_to_playlist,
        report.already_present,
        report.skipped,
        report.failed
    );
    Ok(report)
}

// ============================================================================
// TESTS
// ============================================================================
