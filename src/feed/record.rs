//! JSON wire records shared by the streaming and polling sources.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::storage::FeedItem;

/// One image record as published by a feed endpoint.
///
/// Endpoints disagree on spelling and on whether numbers arrive as JSON
/// numbers or strings, so every field is optional and leniently decoded.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ImageRecord {
    #[serde(rename = "imageURL", alias = "imageUrl", alias = "image_url")]
    pub image_url: Option<String>,
    pub prompt: Option<String>,
    #[serde(deserialize_with = "lenient_i64")]
    pub width: Option<i64>,
    #[serde(deserialize_with = "lenient_i64")]
    pub height: Option<i64>,
    #[serde(deserialize_with = "lenient_i64")]
    pub seed: Option<i64>,
    pub model: Option<String>,
    pub quality: Option<String>,
    pub status: Option<String>,
    #[serde(deserialize_with = "lenient_bool")]
    pub nsfw: Option<bool>,
    #[serde(deserialize_with = "lenient_bool")]
    pub safe: Option<bool>,
    #[serde(deserialize_with = "lenient_bool")]
    pub enhance: Option<bool>,
    #[serde(deserialize_with = "lenient_bool")]
    pub nologo: Option<bool>,
}

impl ImageRecord {
    pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Convert into a feed item stamped with `received_at` (unix millis).
    /// Records without an image URL carry no identity and are dropped.
    pub fn into_item(self, received_at: i64) -> Option<FeedItem> {
        let image_url = self.image_url.filter(|u| !u.trim().is_empty())?;
        Some(FeedItem {
            image_url,
            prompt: self.prompt,
            width: self.width,
            height: self.height,
            seed: self.seed,
            model: self.model,
            quality: self.quality,
            status: self.status,
            nsfw: self.nsfw,
            safe: self.safe,
            enhance: self.enhance,
            nologo: self.nologo,
            db_id: None,
            db_timestamp: Some(received_at),
        })
    }
}

fn lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Bool(b)) => Some(b),
        Some(Value::Number(n)) => n.as_i64().map(|v| v != 0),
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    })
}
