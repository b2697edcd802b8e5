//! The platform media-library collaborator and a manifest-file implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};

use super::asset::PlatformAsset;

/// Manifests larger than this are rejected.
const MAX_MANIFEST_SIZE: u64 = 64 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("Media library access denied")]
    PermissionDenied,

    #[error("Deletion refused: {0}")]
    DeletionFailed(String),

    #[error("Media library I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid library manifest: {0}")]
    Manifest(String),
}

/// Platform access level. The integer codes are what the durable
/// authorization marker records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationStatus {
    #[default]
    NotDetermined,
    Restricted,
    Denied,
    Authorized,
    Limited,
}

impl AuthorizationStatus {
    pub fn code(self) -> i64 {
        match self {
            AuthorizationStatus::NotDetermined => 0,
            AuthorizationStatus::Restricted => 1,
            AuthorizationStatus::Denied => 2,
            AuthorizationStatus::Authorized => 3,
            AuthorizationStatus::Limited => 4,
        }
    }

    pub fn allows_read(self) -> bool {
        matches!(self, AuthorizationStatus::Authorized | AuthorizationStatus::Limited)
    }
}

/// A library change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LibraryChange {
    /// Identifiers affected since the previous notification
    Incremental {
        inserted: Vec<String>,
        removed: Vec<String>,
        changed: Vec<String>,
    },
    /// Something changed but no diff is available
    Opaque,
}

impl LibraryChange {
    /// The removed identifiers when the change is nothing but removals.
    pub fn removals_only(&self) -> Option<&[String]> {
        match self {
            LibraryChange::Incremental {
                inserted,
                removed,
                changed,
            } if inserted.is_empty() && changed.is_empty() => Some(removed),
            _ => None,
        }
    }
}

/// Enumeration, sizing, deletion and change observation of a media library.
#[async_trait]
pub trait MediaLibrary: Send + Sync {
    fn authorization_status(&self) -> AuthorizationStatus;

    async fn fetch_assets(&self) -> Result<Vec<PlatformAsset>, LibraryError>;

    /// Byte size of the asset's primary resource.
    async fn resource_size(&self, asset: &PlatformAsset) -> Result<u64, LibraryError>;

    /// All-or-nothing deletion request.
    async fn delete_assets(&self, ids: &[String]) -> Result<(), LibraryError>;

    fn changes(&self) -> broadcast::Receiver<LibraryChange>;
}

// ============================================================================
// Manifest Library
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ManifestEntry {
    #[serde(flatten)]
    asset: PlatformAsset,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    size_bytes: Option<u64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Manifest {
    #[serde(default)]
    authorization: AuthorizationStatus,
    #[serde(default)]
    assets: Vec<ManifestEntry>,
}

/// A library described by a JSON file:
///
/// ```json
/// { "authorization": "authorized",
///   "assets": [ { "id": "v1", "kind": "video", "duration_secs": 4.0,
///                 "subtypes": { "screen_recording": true }, "size_bytes": 1048576 } ] }
/// ```
///
/// Deletions rewrite the file and are announced as incremental removals.
pub struct ManifestLibrary {
    path: PathBuf,
    authorization: AuthorizationStatus,
    entries: RwLock<Vec<ManifestEntry>>,
    changes: broadcast::Sender<LibraryChange>,
}

impl ManifestLibrary {
    pub async fn open(path: &Path) -> Result<Self, LibraryError> {
        let metadata = tokio::fs::metadata(path).await?;
        if metadata.len() > MAX_MANIFEST_SIZE {
            return Err(LibraryError::Manifest(format!(
                "{} bytes exceeds {} byte limit",
                metadata.len(),
                MAX_MANIFEST_SIZE
            )));
        }

        let raw = tokio::fs::read(path).await?;
        let manifest: Manifest =
            serde_json::from_slice(&raw).map_err(|e| LibraryError::Manifest(e.to_string()))?;
        tracing::info!(
            path = %path.display(),
            assets = manifest.assets.len(),
            "Loaded library manifest"
        );

        let (changes, _) = broadcast::channel(64);
        Ok(Self {
            path: path.to_path_buf(),
            authorization: manifest.authorization,
            entries: RwLock::new(manifest.assets),
            changes,
        })
    }
}

#[async_trait]
impl MediaLibrary for ManifestLibrary {
    fn authorization_status(&self) -> AuthorizationStatus {
        self.authorization
    }

    async fn fetch_assets(&self) -> Result<Vec<PlatformAsset>, LibraryError> {
        if !self.authorization.allows_read() {
            return Err(LibraryError::PermissionDenied);
        }
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .map(|e| e.asset.clone())
            .collect())
    }

    async fn resource_size(&self, asset: &PlatformAsset) -> Result<u64, LibraryError> {
        self.entries
            .read()
            .await
            .iter()
            .find(|e| e.asset.id == asset.id)
            .and_then(|e| e.size_bytes)
            .ok_or_else(|| LibraryError::Manifest(format!("no size for asset '{}'", asset.id)))
    }

    async fn delete_assets(&self, ids: &[String]) -> Result<(), LibraryError> {
        if !self.authorization.allows_read() {
            return Err(LibraryError::PermissionDenied);
        }

        let mut entries = self.entries.write().await;
        let known: HashSet<&str> = entries.iter().map(|e| e.asset.id.as_str()).collect();
        if let Some(missing) = ids.iter().find(|id| !known.contains(id.as_str())) {
            return Err(LibraryError::DeletionFailed(format!("unknown asset '{missing}'")));
        }

        let remaining: Vec<ManifestEntry> = entries
            .iter()
            .filter(|e| !ids.contains(&e.asset.id))
            .cloned()
            .collect();
        let manifest = Manifest {
            authorization: self.authorization,
            assets: remaining,
        };
        let raw = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| LibraryError::Manifest(e.to_string()))?;
        tokio::fs::write(&self.path, raw)
            .await
            .map_err(|e| LibraryError::DeletionFailed(e.to_string()))?;

        *entries = manifest.assets;
        drop(entries);

        tracing::info!(count = ids.len(), "Deleted assets from manifest");
        let _ = self.changes.send(LibraryChange::Incremental {
            inserted: Vec::new(),
            removed: ids.to_vec(),
            changed: Vec::new(),
        });
        Ok(())
    }

    fn changes(&self) -> broadcast::Receiver<LibraryChange> {
        self.changes.subscribe()
    }
}
