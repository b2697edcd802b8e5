//! Media library scanning into four overlapping category views.
//!
//! [`AssetScanner`] enumerates a [`MediaLibrary`], classifies videos and
//! screenshots into [`FetchResult`] buckets and persists aggregate totals as a
//! [`ScanCache`] so the next launch can show stale numbers immediately.

mod asset;
mod asset_scanner;
mod cache;
mod fetch_result;
mod library;

pub use asset::{Category, MediaAsset, MediaKind, MediaSubtypes, PlatformAsset};
pub use asset_scanner::{AssetScanner, ScanError, ScanEvent, ScanMode, ScanOutcome};
pub use cache::{CategoryStats, ScanCache};
pub use fetch_result::{CategoryBucket, FetchResult};
pub use library::{AuthorizationStatus, LibraryChange, LibraryError, ManifestLibrary, MediaLibrary};
