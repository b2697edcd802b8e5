use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    #[serde(other)]
    Unknown,
}

/// Platform subtype markers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaSubtypes {
    pub screenshot: bool,
    pub screen_recording: bool,
}

/// One entry of the platform media-library enumeration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformAsset {
    /// Stable platform identifier
    pub id: String,
    pub kind: MediaKind,
    #[serde(default)]
    pub duration_secs: f64,
    #[serde(default)]
    pub pixel_width: u32,
    #[serde(default)]
    pub pixel_height: u32,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub subtypes: MediaSubtypes,
}

impl PlatformAsset {
    pub fn is_video(&self) -> bool {
        self.kind == MediaKind::Video
    }

    pub fn is_screenshot(&self) -> bool {
        self.kind == MediaKind::Image && self.subtypes.screenshot
    }

    /// Videos and screenshots are scanned; everything else is ignored.
    pub fn is_of_interest(&self) -> bool {
        self.is_video() || self.is_screenshot()
    }
}

/// Display model for a scanned asset.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaAsset {
    pub id: String,
    pub kind: MediaKind,
    pub duration_secs: f64,
    pub pixel_width: u32,
    pub pixel_height: u32,
    pub created_at: Option<DateTime<Utc>>,
    pub is_screenshot: bool,
    pub is_screen_recording: bool,
    /// Resource size in bytes; 0 when the platform could not report it
    pub size: u64,
    /// Set until the size lookup has finished
    pub is_loading: bool,
    pub is_selected: bool,
}

impl MediaAsset {
    pub fn new(asset: &PlatformAsset, size: u64) -> Self {
        let mut item = Self::pending(asset);
        item.resolve_size(size);
        item
    }

    /// An item whose size has not been looked up yet.
    pub fn pending(asset: &PlatformAsset) -> Self {
        Self {
            id: asset.id.clone(),
            kind: asset.kind,
            duration_secs: asset.duration_secs,
            pixel_width: asset.pixel_width,
            pixel_height: asset.pixel_height,
            created_at: asset.created_at,
            is_screenshot: asset.is_screenshot(),
            is_screen_recording: asset.is_video() && asset.subtypes.screen_recording,
            size: 0,
            is_loading: true,
            is_selected: false,
        }
    }

    pub fn resolve_size(&mut self, size: u64) {
        self.size = size;
        self.is_loading = false;
    }

    pub fn is_video(&self) -> bool {
        self.kind == MediaKind::Video
    }

    pub fn toggle_selection(&mut self) -> bool {
        self.is_selected = !self.is_selected;
        self.is_selected
    }
}

/// The four overlapping views a scan produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    AllVideos,
    ShortVideos,
    ScreenRecordings,
    Screenshots,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::AllVideos,
        Category::ShortVideos,
        Category::ScreenRecordings,
        Category::Screenshots,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Category::AllVideos => "All videos",
            Category::ShortVideos => "Short videos",
            Category::ScreenRecordings => "Screen recordings",
            Category::Screenshots => "Screenshots",
        }
    }
}
