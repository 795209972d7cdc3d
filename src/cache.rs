//! Session cache: fingerprinted snapshots of both catalogs and the
//! decisions made so far.
//!
//! A snapshot is reused only when its fingerprint equals the fingerprint of
//! the current inputs. Anything else (mismatch, unreadable file, forced
//! rescan) is a cache miss. Saving is best-effort and atomic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::atomic;
use crate::classify::Thresholds;
use crate::error::{Result, SyncError};
use crate::models::{KeyedTrack, MatchDecision};
use crate::remote::CatalogMarker;
use crate::scan::FileStamp;

/// Bump when the snapshot layout changes.
pub const SNAPSHOT_VERSION: u32 = 1;

pub const DEFAULT_SESSION_FILENAME: &str = ".liked-sync-session.json";

// ============================================================================
// Fingerprint
// ============================================================================

/// Hex SHA-256 over the remote catalog marker and every local file stamp.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn compute(marker: &CatalogMarker, stamps: &[FileStamp]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"remote\0");
        hasher.update((marker.total as u64).to_le_bytes());
        hasher.update(marker.latest_added.as_deref().unwrap_or("").as_bytes());
        hasher.update(b"\0local\0");
        hasher.update((stamps.len() as u64).to_le_bytes());
        for stamp in stamps {
            hasher.update(stamp.path.as_bytes());
            hasher.update([0u8]);
            hasher.update(stamp.modified_secs.to_le_bytes());
            hasher.update(stamp.size.to_le_bytes());
        }
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Snapshot
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub version: u32,
    pub fingerprint: Fingerprint,
    /// Digest of the normalization rules the keys were built with.
    pub rules_digest: String,
    /// Thresholds the decisions were classified with.
    pub thresholds: Thresholds,
    pub saved_at: DateTime<Utc>,
    pub remote: Vec<KeyedTrack>,
    pub local: Vec<KeyedTrack>,
    pub local_files_seen: usize,
    pub local_files_excluded: usize,
    /// One per remote track, in remote order. Review-tier entries are
    /// still open.
    pub decisions: Vec<MatchDecision>,
}

impl SessionSnapshot {
    pub fn is_valid_for(&self, fingerprint: &Fingerprint) -> bool {
        self.version == SNAPSHOT_VERSION && &self.fingerprint == fingerprint
    }

    /// Keys were built with different rules and must be recomputed.
    pub fn needs_rekey(&self, rules_digest: &str) -> bool {
        self.rules_digest != rules_digest
    }

    /// Stored decisions cannot be reused as they are.
    pub fn needs_reclassify(&self, rules_digest: &str, thresholds: Thresholds) -> bool {
        self.needs_rekey(rules_digest)
            || self.thresholds != thresholds
            || self.decisions.len() != self.remote.len()
    }

    pub fn view(&self) -> SnapshotView<'_> {
        SnapshotView {
            version: self.version,
            fingerprint: &self.fingerprint,
            rules_digest: &self.rules_digest,
            thresholds: self.thresholds,
            saved_at: self.saved_at,
            remote: &self.remote,
            local: &self.local,
            local_files_seen: self.local_files_seen,
            local_files_excluded: self.local_files_excluded,
            decisions: &self.decisions,
        }
    }
}

/// Borrowed form of a snapshot with the same serialized layout. Lets a
/// run checkpoint without cloning its catalogs.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SnapshotView<'a> {
    pub version: u32,
    pub fingerprint: &'a Fingerprint,
    pub rules_digest: &'a str,
    pub thresholds: Thresholds,
    pub saved_at: DateTime<Utc>,
    pub remote: &'a [KeyedTrack],
    pub local: &'a [KeyedTrack],
    pub local_files_seen: usize,
    pub local_files_excluded: usize,
    pub decisions: &'a [MatchDecision],
}

// ============================================================================
// Cache file
// ============================================================================

#[derive(Debug, Clone)]
pub struct SessionCache {
    path: PathBuf,
    force_rescan: bool,
}

impl SessionCache {
    pub fn new(path: impl Into<PathBuf>, force_rescan: bool) -> Self {
        Self {
            path: path.into(),
            force_rescan,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot file without any validity check.
    pub fn try_load(&self) -> Result<Option<SessionSnapshot>> {
        atomic::read_json(&self.path).map_err(|e| SyncError::CacheCorrupt {
            path: self.path.clone(),
            message: e.to_string(),
        })
    }

    /// Snapshot for these inputs, or `None` for a full rebuild.
    pub fn load(&self, fingerprint: &Fingerprint) -> Option<SessionSnapshot> {
        if self.force_rescan {
            tracing::info!("Forced rescan, ignoring session file {}", self.path.display());
            return None;
        }

        match self.try_load() {
            Ok(Some(snapshot)) if snapshot.is_valid_for(fingerprint) => {
                tracing::info!(
                    "Reusing session from {} (saved at {})",
                    self.path.display(),
                    snapshot.saved_at.to_rfc3339()
                );
                Some(snapshot)
            }
            Ok(Some(snapshot)) => {
                tracing::info!(
                    "Catalogs changed since the session saved at {}, rebuilding",
                    snapshot.saved_at.to_rfc3339()
                );
                None
            }
            Ok(None) => {
                tracing::info!("No session file at {}", self.path.display());
                None
            }
            Err(e) => {
                tracing::warn!("{}. Rebuilding", e);
                None
            }
        }
    }

    /// Persist a snapshot. Failures are logged, never returned: the
    /// in-memory result stays authoritative for this run.
    pub fn save(&self, snapshot: &SnapshotView<'_>) -> bool {
        match atomic::write_json(&self.path, snapshot) {
            Ok(()) => {
                tracing::debug!(
                    "Session saved to {} ({} decisions)",
                    self.path.display(),
                    snapshot.decisions.len()
                );
                true
            }
            Err(e) => {
                tracing::warn!("Could not save session to {}: {}", self.path.display(), e);
                false
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
