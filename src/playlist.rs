//! Playlist maintenance: collect Missing tracks into a playlist, and clean
//! a playlist of tracks that have since turned up locally.
//!
//! Every add is checked against the playlist's current contents first, so
//! re-running never duplicates entries. In dry-run mode nothing is sent.

use rayon::prelude::*;
use rustc_hash::FxHashSet;
use serde::Serialize;

use crate::error::{Result, SyncError};
use crate::models::KeyedTrack;
use crate::normalize::{key_track, NormalizationRules};
use crate::progress::create_progress_bar;
use crate::remote::{playlist_track_ids, Playlist, RemoteCatalog, PLAYLIST_BATCH_SIZE};
use crate::retry::RetryPolicy;
use crate::scoring::score_keys;

/// Playlist a run writes to, with the identifiers it already holds.
#[derive(Debug, Clone)]
pub struct PlaylistTarget {
    /// `None` when the playlist would have been created in a dry run.
    pub id: Option<String>,
    pub name: String,
    pub existing: FxHashSet<String>,
}

impl PlaylistTarget {
    pub fn contains(&self, id: &str) -> bool {
        self.existing.contains(id)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlaylistOutcome {
    pub added: usize,
    pub already_present: usize,
    /// Not sent because a batch failed after retries.
    pub failed: usize,
    pub removed: usize,
}

/// Open an existing playlist and load its contents.
pub fn open_playlist(
    remote: &dyn RemoteCatalog,
    retry: &RetryPolicy,
    playlist: &Playlist,
) -> Result<PlaylistTarget> {
    let ids = playlist_track_ids(remote, retry, &playlist.id)?;
    Ok(PlaylistTarget {
        id: Some(playlist.id.clone()),
        name: playlist.name.clone(),
        existing: ids.into_iter().collect(),
    })
}

/// Reuse the playlist called `name`, or create it.
pub fn find_or_create_playlist(
    remote: &dyn RemoteCatalog,
    retry: &RetryPolicy,
    name: &str,
    description: &str,
    dry_run: bool,
) -> Result<PlaylistTarget> {
    let playlists = retry.call("list playlists", || remote.playlists())?;
    if let Some(found) = playlists.iter().find(|p| p.name == name) {
        tracing::info!("Using existing playlist '{}' ({} tracks)", found.name, found.track_count);
        return open_playlist(remote, retry, found);
    }
    create_playlist(remote, retry, name, description, dry_run)
}

pub fn create_playlist(
    remote: &dyn RemoteCatalog,
    retry: &RetryPolicy,
    name: &str,
    description: &str,
    dry_run: bool,
) -> Result<PlaylistTarget> {
    if dry_run {
        tracing::info!("[DRY RUN] Would create playlist '{}'", name);
        return Ok(PlaylistTarget {
            id: None,
            name: name.to_string(),
            existing: FxHashSet::default(),
        });
    }
    let created = retry.call("create playlist", || remote.create_playlist(name, description))?;
    tracing::info!("Created playlist '{}'", created.name);
    Ok(PlaylistTarget {
        id: Some(created.id),
        name: created.name,
        existing: FxHashSet::default(),
    })
}

/// Add `ids` to the playlist in batches. Identifiers already in the
/// playlist (or repeated in `ids`) are counted as already present. A batch
/// that still fails after retries stops the adds; fatal errors propagate.
pub fn add_missing_to_playlist(
    remote: &dyn RemoteCatalog,
    retry: &RetryPolicy,
    target: &mut PlaylistTarget,
    ids: &[String],
    dry_run: bool,
) -> Result<PlaylistOutcome> {
    let mut outcome = PlaylistOutcome::default();
    let mut to_add: Vec<String> = Vec::with_capacity(ids.len());
    for id in ids {
        if target.contains(id) || to_add.contains(id) {
            tracing::debug!("Already in '{}': {}", target.name, id);
            outcome.already_present += 1;
        } else {
            to_add.push(id.clone());
        }
    }

    if to_add.is_empty() {
        tracing::info!("Nothing new to add to '{}'", target.name);
        return Ok(outcome);
    }
    if dry_run {
        tracing::info!("[DRY RUN] Would add {} tracks to '{}'", to_add.len(), target.name);
        outcome.added = to_add.len();
        return Ok(outcome);
    }
    let Some(playlist_id) = target.id.clone() else {
        return Err(SyncError::Config(format!(
            "playlist '{}' has no identifier",
            target.name
        )));
    };

    let pb = create_progress_bar(to_add.len() as u64, "Adding to playlist");
    for (n, batch) in to_add.chunks(PLAYLIST_BATCH_SIZE).enumerate() {
        match retry.call("add to playlist", || remote.add_to_playlist(&playlist_id, batch)) {
            Ok(()) => {
                outcome.added += batch.len();
                target.existing.extend(batch.iter().cloned());
                pb.inc(batch.len() as u64);
            }
            Err(e @ SyncError::TransientRemote { .. }) => {
                outcome.failed = to_add.len() - n * PLAYLIST_BATCH_SIZE;
                tracing::warn!(
                    "Stopped adding to '{}' after {} tracks: {}",
                    target.name,
                    outcome.added,
                    e
                );
                break;
            }
            Err(e) => return Err(e),
        }
    }
    pb.finish_and_clear();

    tracing::info!(
        "Added {} tracks to '{}' ({} already present)",
        outcome.added,
        target.name,
        outcome.already_present
    );
    Ok(outcome)
}

/// Remove from the playlist every track that now matches a local track at
/// or above `threshold`. Returns the number removed (or that would be, in
/// a dry run).
pub fn clean_playlist(
    remote: &dyn RemoteCatalog,
    retry: &RetryPolicy,
    target: &mut PlaylistTarget,
    local: &[KeyedTrack],
    rules: &NormalizationRules,
    threshold: u8,
    dry_run: bool,
) -> Result<usize> {
    let Some(playlist_id) = target.id.clone() else {
        return Ok(0);
    };
    let tracks = retry.call("playlist tracks", || remote.playlist_tracks(&playlist_id))?;
    let total = tracks.len();

    let found_locally: Vec<String> = tracks
        .into_par_iter()
        .map(|t| key_track(t, rules))
        .filter(|remote_track| {
            !remote_track.key.is_empty()
                && local
                    .iter()
                    .any(|l| score_keys(&remote_track.key, &l.key).composite >= threshold)
        })
        .map(|k| k.track.identifier)
        .collect();

    if found_locally.is_empty() {
        tracing::info!("No tracks in '{}' are now found locally", target.name);
        return Ok(0);
    }
    if dry_run {
        tracing::info!(
            "[DRY RUN] Would remove {} of {} tracks from '{}'",
            found_locally.len(),
            total,
            target.name
        );
        return Ok(found_locally.len());
    }

    let mut removed = 0;
    for batch in found_locally.chunks(PLAYLIST_BATCH_SIZE) {
        match retry.call("remove from playlist", || remote.remove_from_playlist(&playlist_id, batch)) {
            Ok(()) => {
                removed += batch.len();
                for id in batch {
                    target.existing.remove(id);
                }
            }
            Err(e @ SyncError::TransientRemote { .. }) => {
                tracing::warn!("Stopped cleaning '{}' after {} removals: {}", target.name, removed, e);
                break;
            }
            Err(e) => return Err(e),
        }
    }
    tracing::info!("Removed {} tracks now found locally from '{}'", removed, target.name);
    Ok(removed)
}

// ============================================================================
// TESTS
// ============================================================================
