//! Local catalog source.
//!
//! `DirectoryLibrary` walks one or more music directories, keeps files with
//! a supported extension and reads their tags with `lofty`. Files without
//! tags still become tracks (empty title/artist); files that cannot be
//! parsed at all are excluded and reported as `LocalRead` errors.

use lofty::prelude::*;
use lofty::probe::Probe;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use walkdir::WalkDir;

use crate::error::{Result, SyncError};
use crate::models::Track;
use crate::progress::{create_progress_bar, log_progress};

/// Path, modification time and size of one supported file. The local half
/// of a session fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileStamp {
    pub path: String,
    pub modified_secs: u64,
    pub size: u64,
}

/// Outcome of a full scan.
#[derive(Debug, Default)]
pub struct LocalScan {
    /// In walk order.
    pub tracks: Vec<Track>,
    /// One `LocalRead` per excluded file.
    pub excluded: Vec<SyncError>,
    pub files_seen: usize,
}

pub trait LocalLibrary: Sync {
    /// Stamps of every supported file, without reading tags.
    fn stamps(&self) -> Result<Vec<FileStamp>>;

    fn scan(&self) -> Result<LocalScan>;

    /// Display name of the collection, used in playlist names.
    fn label(&self) -> String {
        "Local Collection".to_string()
    }
}

// ============================================================================
// Directory walker
// ============================================================================

pub struct DirectoryLibrary {
    roots: Vec<PathBuf>,
    /// Lower-case, with leading dot.
    extensions: Vec<String>,
}

impl DirectoryLibrary {
    /// Roots that are not directories are skipped with a warning. No valid
    /// root at all is a configuration error.
    pub fn new(dirs: &[PathBuf], extensions: &[String]) -> Result<Self> {
        let mut roots = Vec::with_capacity(dirs.len());
        for dir in dirs {
            match fs::canonicalize(dir) {
                Ok(root) if root.is_dir() => roots.push(root),
                _ => tracing::warn!("Skipping {}: not a readable directory", dir.display()),
            }
        }
        if roots.is_empty() {
            return Err(SyncError::Config(format!(
                "none of the music directories are valid: {:?}",
                dirs
            )));
        }

        Ok(Self {
            roots,
            extensions: extensions.iter().map(|e| e.to_lowercase()).collect(),
        })
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    fn is_supported(&self, path: &Path) -> bool {
        let name = match path.file_name() {
            Some(n) => n.to_string_lossy().to_lowercase(),
            None => return false,
        };
        self.extensions.iter().any(|ext| name.ends_with(ext.as_str()))
    }

    /// Supported files under every root, in a stable order.
    fn supported_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        for root in &self.roots {
            for entry in WalkDir::new(root).sort_by_file_name() {
                match entry {
                    Ok(e) if e.file_type().is_file() && self.is_supported(e.path()) => {
                        files.push(e.into_path());
                    }
                    Ok(_) => {}
                    Err(e) => tracing::debug!("Skipping unreadable entry: {}", e),
                }
            }
        }
        files
    }
}

impl LocalLibrary for DirectoryLibrary {
    fn stamps(&self) -> Result<Vec<FileStamp>> {
        Ok(self
            .supported_files()
            .into_iter()
            .map(|path| stamp(&path))
            .collect())
    }

    fn scan(&self) -> Result<LocalScan> {
        let files = self.supported_files();
        let total = files.len() as u64;
        tracing::info!(
            "Found {} supported files in {} director(y/ies)",
            files.len(),
            self.roots.len()
        );

        let pb = create_progress_bar(total, "Scanning local files");
        let results: Vec<Result<Track>> = files
            .par_iter()
            .map(|path| {
                let result = read_track(path);
                pb.inc(1);
                log_progress("scan", pb.position(), total, 1000);
                result
            })
            .collect();
        pb.finish_and_clear();

        let mut scan = LocalScan {
            files_seen: files.len(),
            ..Default::default()
        };
        for result in results {
            match result {
                Ok(track) => scan.tracks.push(track),
                Err(e) => {
                    tracing::debug!("Excluded: {}", e);
                    scan.excluded.push(e);
                }
            }
        }

        let untagged = scan
            .tracks
            .iter()
            .filter(|t| t.title.is_empty() && t.artist.is_empty())
            .count();
        tracing::info!(
            "Read tags for {} of {} files ({} excluded, {} without tags)",
            scan.tracks.len(),
            scan.files_seen,
            scan.excluded.len(),
            untagged
        );
        Ok(scan)
    }

    /// Folder name for a single root.
    fn label(&self) -> String {
        match self.roots.as_slice() {
            [root] => root
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| root.display().to_string()),
            _ => "Local Collection".to_string(),
        }
    }
}

fn stamp(path: &Path) -> FileStamp {
    let (modified_secs, size) = match fs::metadata(path) {
        Ok(meta) => {
            let modified = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map_or(0, |d| d.as_secs());
            (modified, meta.len())
        }
        Err(_) => (0, 0),
    };
    FileStamp {
        path: path.to_string_lossy().into_owned(),
        modified_secs,
        size,
    }
}

/// Read one audio file. Missing tags give empty fields; a file `lofty`
/// cannot parse is a `LocalRead` error.
pub fn read_track(path: &Path) -> Result<Track> {
    let tagged = Probe::open(path)
        .and_then(|p| p.read())
        .map_err(|e| SyncError::LocalRead {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    let identifier = path.to_string_lossy();
    let mut track = match tagged.primary_tag().or_else(|| tagged.first_tag()) {
        Some(tag) => Track::local(
            &identifier,
            tag.title().as_deref().unwrap_or("").trim(),
            tag.artist().as_deref().unwrap_or("").trim(),
            tag.album().as_deref().unwrap_or("").trim(),
        ),
        None => Track::local(&identifier, "", "", ""),
    };

    let secs = tagged.properties().duration().as_secs();
    if secs > 0 {
        track.duration_seconds = u32::try_from(secs).ok();
    }
    Ok(track)
}

// ============================================================================
// In-memory library
// ============================================================================

/// Fixed list of tracks, for replaying a catalog without touching disk.
#[derive(Debug, Clone, Default)]
pub struct StaticLibrary {
    pub tracks: Vec<Track>,
    pub label: String,
}

impl StaticLibrary {
    pub fn new(tracks: Vec<Track>) -> Self {
        Self {
            tracks,
            label: "Local Collection".to_string(),
        }
    }
}

impl LocalLibrary for StaticLibrary {
    /// Stamps derive from identifier and tags, so any edit changes them.
    fn stamps(&self) -> Result<Vec<FileStamp>> {
        Ok(self
            .tracks
            .iter()
            .map(|t| FileStamp {
                path: t.identifier.clone(),
                modified_secs: 0,
                size: (t.title.len() + t.artist.len() + t.album.len()) as u64,
            })
            .collect())
    }

    fn scan(&self) -> Result<LocalScan> {
        Ok(LocalScan {
            tracks: self.tracks.clone(),
            excluded: Vec::new(),
            files_seen: self.tracks.len(),
        })
    }

    fn label(&self) -> String {
        self.label.clone()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn extensions() -> Vec<String> {
        [".mp3", ".flac"].iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_no_valid_root_is_config_error() {
        let dir = TempDir::new().unwrap();
        let err = DirectoryLibrary::new(&[dir.path().join("missing")], &extensions())
            .err()
            .unwrap();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[test]
    fn test_invalid_root_skipped() {
        let dir = TempDir::new().unwrap();
        let lib =
            DirectoryLibrary::new(&[dir.path().join("missing"), dir.path().to_path_buf()], &extensions())
                .unwrap();
        assert_eq!(lib.roots().len(), 1);
    }

    #[test]
    fn test_stamps_filter_extensions_case_insensitively() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("b")).unwrap();
        fs::write(dir.path().join("a.MP3"), b"x").unwrap();
        fs::write(dir.path().join("b").join("c.flac"), b"xyz").unwrap();
        fs::write(dir.path().join("cover.jpg"), b"x").unwrap();

        let lib = DirectoryLibrary::new(&[dir.path().to_path_buf()], &extensions()).unwrap();
        let stamps = lib.stamps().unwrap();
        assert_eq!(stamps.len(), 2);
        assert!(stamps[0].path.ends_with("a.MP3"));
        assert!(stamps[1].path.ends_with("c.flac"));
        assert_eq!(stamps[1].size, 3);
    }

    #[test]
    fn test_unreadable_file_excluded() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("broken.flac"), b"not audio").unwrap();

        let lib = DirectoryLibrary::new(&[dir.path().to_path_buf()], &extensions()).unwrap();
        let scan = lib.scan().unwrap();
        assert_eq!(scan.files_seen, 1);
        assert!(scan.tracks.is_empty());
        assert!(matches!(scan.excluded[0], SyncError::LocalRead { .. }));
    }

    #[test]
    fn test_label_uses_folder_name() {
        let dir = TempDir::new().unwrap();
        let music = dir.path().join("Vinyl Rips");
        fs::create_dir(&music).unwrap();
        let lib = DirectoryLibrary::new(&[music], &extensions()).unwrap();
        assert_eq!(lib.label(), "Vinyl Rips");
    }

    #[test]
    fn test_static_library_stamps_track_edits() {
        let mut lib = StaticLibrary::new(vec![Track::local("/m/a.mp3", "A", "B", "")]);
        let before = lib.stamps().unwrap();
        lib.tracks[0].title = "A (Live)".into();
        assert_ne!(lib.stamps().unwrap(), before);
    }
}
