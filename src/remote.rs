//! Remote catalog boundary.
//!
//! `RemoteCatalog` is the blocking interface the engine talks to. Every
//! call may fail with a `RemoteError`; callers wrap calls in a
//! `RetryPolicy`. `ExportCatalog` implements the trait over a JSON export
//! of the account so runs can be reproduced offline.

use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::atomic;
use crate::error::{RemoteError, Result, SyncError};
use crate::models::Track;
use crate::normalize::{normalize_text, NormalizationRules};
use crate::progress::{create_progress_bar, log_progress};
use crate::retry::RetryPolicy;

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Liked tracks are requested in pages of this size.
pub const LIKED_PAGE_SIZE: usize = 50;

/// Playlist mutations are sent in batches of this size.
pub const PLAYLIST_BATCH_SIZE: usize = 100;

// ============================================================================
// Types
// ============================================================================

/// Cheap summary of the liked collection: changes whenever a track is
/// liked or unliked.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CatalogMarker {
    pub total: usize,
    /// Most recent "added at" timestamp, if the service reports one.
    pub latest_added: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub tracks: Vec<Track>,
    /// Size of the whole collection at the time of the request.
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Playlist {
    pub id: String,
    pub name: String,
    pub track_count: usize,
}

pub trait RemoteCatalog: Sync {
    fn catalog_marker(&self) -> RemoteResult<CatalogMarker>;

    /// Liked tracks `[offset, offset + limit)`, most recently liked first.
    fn liked_page(&self, offset: usize, limit: usize) -> RemoteResult<Page>;

    /// Free-text track search, best hits first.
    fn search(&self, query: &str, limit: usize) -> RemoteResult<Vec<Track>>;

    /// One flag per identifier, in order.
    fn liked_contains(&self, ids: &[String]) -> RemoteResult<Vec<bool>>;

    fn add_to_liked(&self, ids: &[String]) -> RemoteResult<()>;

    fn playlists(&self) -> RemoteResult<Vec<Playlist>>;

    fn create_playlist(&self, name: &str, description: &str) -> RemoteResult<Playlist>;

    fn playlist_tracks(&self, playlist_id: &str) -> RemoteResult<Vec<Track>>;

    fn add_to_playlist(&self, playlist_id: &str, ids: &[String]) -> RemoteResult<()>;

    fn remove_from_playlist(&self, playlist_id: &str, ids: &[String]) -> RemoteResult<()>;
}

// ============================================================================
// Liked collection fetch
// ============================================================================

/// Result of paging through the liked collection.
#[derive(Debug, Clone)]
pub struct LikedFetch {
    /// `None` when the marker could not be read; the data then has no
    /// fingerprint.
    pub marker: Option<CatalogMarker>,
    pub tracks: Vec<Track>,
    /// False when retries ran out part-way; `tracks` holds what was fetched.
    pub complete: bool,
}

/// Fetch the whole liked collection page by page.
///
/// Exhausted retries on the marker or a page are warnings: without a marker
/// the collection size comes from the first page, and a failed page ends
/// the fetch early with `complete: false`. Fatal errors propagate.
pub fn fetch_liked(remote: &dyn RemoteCatalog, retry: &RetryPolicy) -> Result<LikedFetch> {
    let marker = match retry.call("catalog marker", || remote.catalog_marker()) {
        Ok(marker) => Some(marker),
        Err(e @ SyncError::TransientRemote { .. }) => {
            tracing::warn!("Could not read the liked collection marker: {}", e);
            None
        }
        Err(e) => return Err(e),
    };
    let mut total = marker.as_ref().map_or(0, |m| m.total);
    let pb = create_progress_bar(total as u64, "Fetching liked tracks");

    let mut tracks: Vec<Track> = Vec::with_capacity(total);
    let mut complete = true;
    loop {
        let offset = tracks.len();
        let page = match retry.call("liked tracks page", || remote.liked_page(offset, LIKED_PAGE_SIZE)) {
            Ok(page) => page,
            Err(e @ SyncError::TransientRemote { .. }) => {
                tracing::warn!(
                    "Stopped fetching liked tracks at {}/{}: {}. Continuing with partial data",
                    offset,
                    total,
                    e
                );
                complete = false;
                break;
            }
            Err(e) => return Err(e),
        };

        if page.total != total {
            total = page.total;
            pb.set_length(total as u64);
        }
        let fetched = page.tracks.len();
        tracks.extend(page.tracks);
        pb.set_position(tracks.len() as u64);
        log_progress("liked", tracks.len() as u64, total.max(1) as u64, 500);

        if fetched == 0 || tracks.len() >= page.total {
            break;
        }
    }
    pb.finish_and_clear();

    tracing::info!(
        "Fetched {} liked tracks{}",
        tracks.len(),
        if complete { "" } else { " (incomplete)" }
    );
    Ok(LikedFetch {
        marker,
        tracks,
        complete,
    })
}

/// Identifiers currently in a playlist.
pub fn playlist_track_ids(
    remote: &dyn RemoteCatalog,
    retry: &RetryPolicy,
    playlist_id: &str,
) -> Result<Vec<String>> {
    let tracks = retry.call("playlist tracks", || remote.playlist_tracks(playlist_id))?;
    Ok(tracks.into_iter().map(|t| t.identifier).collect())
}

// ============================================================================
// Offline export
// ============================================================================

/// One track in an export file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportTrack {
    pub id: String,
    pub title: String,
    pub artist: String,
    #[serde(default)]
    pub album: String,
    #[serde(default)]
    pub duration_seconds: Option<u32>,
    #[serde(default)]
    pub added_at: Option<String>,
}

impl ExportTrack {
    fn to_track(&self) -> Track {
        let mut track = Track::remote(&self.id, &self.title, &self.artist, &self.album);
        track.duration_seconds = self.duration_seconds;
        track
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportPlaylist {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tracks: Vec<String>,
}

/// On-disk layout of an account export.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountExport {
    /// Liked collection, most recently liked first.
    #[serde(default)]
    pub liked: Vec<ExportTrack>,
    #[serde(default)]
    pub playlists: Vec<ExportPlaylist>,
    /// Searchable tracks beyond the liked collection.
    #[serde(default)]
    pub catalog: Vec<ExportTrack>,
}

impl AccountExport {
    fn find(&self, id: &str) -> Option<&ExportTrack> {
        self.liked
            .iter()
            .chain(self.catalog.iter())
            .find(|t| t.id == id)
    }
}

/// `RemoteCatalog` over an account export file.
///
/// Mutations change the in-memory export; `persist()` writes it back.
pub struct ExportCatalog {
    path: Option<PathBuf>,
    state: Mutex<ExportState>,
}

struct ExportState {
    export: AccountExport,
    dirty: bool,
    next_playlist: usize,
}

impl ExportCatalog {
    pub fn new(export: AccountExport) -> Self {
        let next_playlist = export.playlists.len() + 1;
        Self {
            path: None,
            state: Mutex::new(ExportState {
                export,
                dirty: false,
                next_playlist,
            }),
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        let export: AccountExport = atomic::read_json(path)
            .map_err(|e| SyncError::Config(format!("remote export {}: {}", path.display(), e)))?
            .ok_or_else(|| {
                SyncError::Config(format!("remote export {} does not exist", path.display()))
            })?;
        tracing::info!(
            "Loaded remote export {} ({} liked, {} playlists)",
            path.display(),
            export.liked.len(),
            export.playlists.len()
        );
        let mut catalog = Self::new(export);
        catalog.path = Some(path.to_path_buf());
        Ok(catalog)
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut ExportState) -> RemoteResult<T>) -> RemoteResult<T> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| RemoteError::Transient("export state lock poisoned".into()))?;
        f(&mut state)
    }

    /// Copy of the current export, mutations included.
    pub fn snapshot(&self) -> Result<AccountExport> {
        self.with_state(|s| Ok(s.export.clone()))
            .map_err(|e| SyncError::from_remote(e, 1))
    }

    /// Write pending mutations back to the export file. Returns whether
    /// anything was written.
    pub fn persist(&self) -> io::Result<bool> {
        let Some(path) = &self.path else {
            return Ok(false);
        };
        let mut state = self
            .state
            .lock()
            .map_err(|_| io::Error::other("export state lock poisoned"))?;
        if !state.dirty {
            return Ok(false);
        }
        atomic::write_json(path, &state.export)?;
        state.dirty = false;
        tracing::info!("Wrote remote export changes to {}", path.display());
        Ok(true)
    }
}

fn playlist_mut<'s>(export: &'s mut AccountExport, id: &str) -> RemoteResult<&'s mut ExportPlaylist> {
    export
        .playlists
        .iter_mut()
        .find(|p| p.id == id)
        .ok_or_else(|| RemoteError::NotFound(format!("playlist {}", id)))
}

impl RemoteCatalog for ExportCatalog {
    fn catalog_marker(&self) -> RemoteResult<CatalogMarker> {
        self.with_state(|s| {
            let liked = &s.export.liked;
            let latest_added = liked
                .iter()
                .filter_map(|t| t.added_at.clone())
                .max()
                .or_else(|| liked.first().map(|t| t.id.clone()));
            Ok(CatalogMarker {
                total: liked.len(),
                latest_added,
            })
        })
    }

    fn liked_page(&self, offset: usize, limit: usize) -> RemoteResult<Page> {
        self.with_state(|s| {
            let liked = &s.export.liked;
            let tracks = liked
                .iter()
                .skip(offset)
                .take(limit)
                .map(ExportTrack::to_track)
                .collect();
            Ok(Page {
                tracks,
                total: liked.len(),
            })
        })
    }

    /// Ranks by how many query words appear in "title artist".
    fn search(&self, query: &str, limit: usize) -> RemoteResult<Vec<Track>> {
        let plain = NormalizationRules::empty();
        let query = normalize_text(query, &plain);
        let words: Vec<&str> = query.split_whitespace().collect();
        if words.is_empty() {
            return Ok(Vec::new());
        }

        self.with_state(|s| {
            let mut seen: Vec<&str> = Vec::new();
            let mut hits: Vec<(usize, &ExportTrack)> = Vec::new();
            for t in s.export.liked.iter().chain(s.export.catalog.iter()) {
                if seen.contains(&t.id.as_str()) {
                    continue;
                }
                seen.push(&t.id);
                let text = normalize_text(&format!("{} {}", t.title, t.artist), &plain);
                let overlap = text.split_whitespace().filter(|w| words.contains(w)).count();
                if overlap > 0 {
                    hits.push((overlap, t));
                }
            }
            // Stable sort keeps export order among equal overlaps
            hits.sort_by(|a, b| b.0.cmp(&a.0));
            Ok(hits.into_iter().take(limit).map(|(_, t)| t.to_track()).collect())
        })
    }

    fn liked_contains(&self, ids: &[String]) -> RemoteResult<Vec<bool>> {
        self.with_state(|s| {
            Ok(ids
                .iter()
                .map(|id| s.export.liked.iter().any(|t| &t.id == id))
                .collect())
        })
    }

    fn add_to_liked(&self, ids: &[String]) -> RemoteResult<()> {
        self.with_state(|s| {
            for id in ids {
                if s.export.liked.iter().any(|t| &t.id == id) {
                    continue;
                }
                let track = s
                    .export
                    .find(id)
                    .cloned()
                    .ok_or_else(|| RemoteError::NotFound(format!("track {}", id)))?;
                s.export.liked.insert(0, track);
                s.dirty = true;
            }
            Ok(())
        })
    }

    fn playlists(&self) -> RemoteResult<Vec<Playlist>> {
        self.with_state(|s| {
            Ok(s.export
                .playlists
                .iter()
                .map(|p| Playlist {
                    id: p.id.clone(),
                    name: p.name.clone(),
                    track_count: p.tracks.len(),
                })
                .collect())
        })
    }

    fn create_playlist(&self, name: &str, description: &str) -> RemoteResult<Playlist> {
        self.with_state(|s| {
            let id = format!("playlist-{}", s.next_playlist);
            s.next_playlist += 1;
            s.export.playlists.push(ExportPlaylist {
                id: id.clone(),
                name: name.to_string(),
                description: description.to_string(),
                tracks: Vec::new(),
            });
            s.dirty = true;
            Ok(Playlist {
                id,
                name: name.to_string(),
                track_count: 0,
            })
        })
    }

    fn playlist_tracks(&self, playlist_id: &str) -> RemoteResult<Vec<Track>> {
        self.with_state(|s| {
            let playlist = s
                .export
                .playlists
                .iter()
                .find(|p| p.id == playlist_id)
                .ok_or_else(|| RemoteError::NotFound(format!("playlist {}", playlist_id)))?;
            Ok(playlist
                .tracks
                .iter()
                .map(|id| match s.export.find(id) {
                    Some(t) => t.to_track(),
                    None => Track::remote(id, "", "", ""),
                })
                .collect())
        })
    }

    fn add_to_playlist(&self, playlist_id: &str, ids: &[String]) -> RemoteResult<()> {
        self.with_state(|s| {
            let playlist = playlist_mut(&mut s.export, playlist_id)?;
            playlist.tracks.extend(ids.iter().cloned());
            s.dirty = true;
            Ok(())
        })
    }

    fn remove_from_playlist(&self, playlist_id: &str, ids: &[String]) -> RemoteResult<()> {
        self.with_state(|s| {
            let playlist = playlist_mut(&mut s.export, playlist_id)?;
            playlist.tracks.retain(|id| !ids.contains(id));
            s.dirty = true;
            Ok(())
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn export_track(id: &str, title: &str, artist: &str) -> ExportTrack {
        ExportTrack {
            id: id.into(),
            title: title.into(),
            artist: artist.into(),
            album: String::new(),
            duration_seconds: None,
            added_at: None,
        }
    }

    fn sample_export(liked: usize) -> AccountExport {
        AccountExport {
            liked: (0..liked)
                .map(|i| export_track(&format!("t{}", i), &format!("Song {}", i), "Band"))
                .collect(),
            playlists: vec![ExportPlaylist {
                id: "p1".into(),
                name: "Road Trip".into(),
                description: String::new(),
                tracks: vec!["t0".into()],
            }],
            catalog: vec![
                export_track("c1", "Imagine", "John Lennon"),
                export_track("c2", "Jealous Guy", "John Lennon"),
            ],
        }
    }

    #[test]
    fn test_fetch_liked_pages_through_everything() {
        let catalog = ExportCatalog::new(sample_export(120));
        let fetch = fetch_liked(&catalog, &RetryPolicy::immediate(1)).unwrap();
        assert!(fetch.complete);
        assert_eq!(fetch.tracks.len(), 120);
        assert_eq!(fetch.marker.unwrap().total, 120);
        assert_eq!(fetch.tracks[0].identifier, "t0");
        assert_eq!(fetch.tracks[119].identifier, "t119");
    }

    #[test]
    fn test_search_ranks_by_overlap() {
        let catalog = ExportCatalog::new(sample_export(0));
        let hits = catalog.search("imagine john lennon", 5).unwrap();
        assert_eq!(hits[0].identifier, "c1");
        assert_eq!(hits.len(), 2);
        assert_eq!(catalog.search("imagine", 1).unwrap().len(), 1);
        assert!(catalog.search("", 5).unwrap().is_empty());
    }

    #[test]
    fn test_add_to_liked_is_idempotent() {
        let catalog = ExportCatalog::new(sample_export(1));
        catalog.add_to_liked(&["c1".into()]).unwrap();
        catalog.add_to_liked(&["c1".into()]).unwrap();
        let export = catalog.snapshot().unwrap();
        assert_eq!(export.liked.len(), 2);
        assert_eq!(export.liked[0].id, "c1");
        assert_eq!(
            catalog.liked_contains(&["c1".into(), "c2".into()]).unwrap(),
            vec![true, false]
        );
        assert!(matches!(
            catalog.add_to_liked(&["nope".into()]),
            Err(RemoteError::NotFound(_))
        ));
    }

    #[test]
    fn test_playlist_mutations() {
        let catalog = ExportCatalog::new(sample_export(3));
        let created = catalog.create_playlist("Missing", "desc").unwrap();
        catalog
            .add_to_playlist(&created.id, &["t1".into(), "t2".into()])
            .unwrap();
        catalog.remove_from_playlist(&created.id, &["t1".into()]).unwrap();
        let ids = playlist_track_ids(&catalog, &RetryPolicy::immediate(1), &created.id).unwrap();
        assert_eq!(ids, vec!["t2".to_string()]);
        assert_eq!(catalog.playlists().unwrap().len(), 2);
        assert!(matches!(
            catalog.playlist_tracks("missing"),
            Err(RemoteError::NotFound(_))
        ));
    }

    #[test]
    fn test_persist_writes_only_when_dirty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("export.json");
        atomic::write_json(&path, &sample_export(2)).unwrap();

        let catalog = ExportCatalog::open(&path).unwrap();
        assert!(!catalog.persist().unwrap());
        catalog.add_to_liked(&["c2".into()]).unwrap();
        assert!(catalog.persist().unwrap());

        let reopened = ExportCatalog::open(&path).unwrap();
        assert_eq!(reopened.catalog_marker().unwrap().total, 3);
    }

    #[test]
    fn test_open_missing_file_is_config_error() {
        let dir = TempDir::new().unwrap();
        let err = ExportCatalog::open(&dir.path().join("nope.json")).err().unwrap();
        assert!(matches!(err, SyncError::Config(_)));
    }
}
