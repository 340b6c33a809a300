//! Normalized shapes for plugin results
//!
//! Plugin payloads are loosely typed. These helpers map them onto fixed
//! structs, always stamping the owning plugin's name as `platform`.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of media a search or listing targets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    /// Single track
    #[default]
    Music,
    /// Album
    Album,
    /// Artist
    Artist,
    /// Playlist / sheet
    Sheet,
}

impl MediaType {
    /// Name passed to plugins
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Music => "music",
            Self::Album => "album",
            Self::Artist => "artist",
            Self::Sheet => "sheet",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "music" => Ok(Self::Music),
            "album" => Ok(Self::Album),
            "artist" => Ok(Self::Artist),
            "sheet" => Ok(Self::Sheet),
            other => Err(format!("unknown media type: {other}")),
        }
    }
}

/// Playback quality key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    /// Lowest bitrate
    Low,
    /// Default bitrate
    #[default]
    Standard,
    /// High bitrate
    High,
    /// Lossless
    Super,
}

impl Quality {
    /// Name passed to plugins
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Standard => "standard",
            Self::High => "high",
            Self::Super => "super",
        }
    }
}

impl FromStr for Quality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "standard" => Ok(Self::Standard),
            "high" => Ok(Self::High),
            "super" => Ok(Self::Super),
            other => Err(format!("unknown quality: {other}")),
        }
    }
}

/// A track, album, artist or sheet produced by a plugin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaItem {
    /// Plugin-side identifier (or the item's position when absent)
    pub id: String,
    /// Name of the plugin that produced the item
    pub platform: String,
    /// What the item is
    pub kind: MediaType,
    /// Display title
    pub title: String,
    /// Artist, singer or creator
    pub artist: String,
    /// Album title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    /// Cover image URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artwork: Option<String>,
    /// Duration in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    /// Direct playback URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Play count (sheets)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub play_count: Option<u64>,
    /// Number of works (sheets, artists)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub works_num: Option<u64>,
    /// Original payload, handed back to the plugin on follow-up calls
    #[serde(default)]
    pub raw: Value,
}

impl MediaItem {
    /// Normalize one raw payload entry
    #[must_use]
    pub fn from_raw(raw: &Value, platform: &str, kind: MediaType, index: usize) -> Self {
        const TITLE: &[&str] = &["title", "name"];
        const NAME: &[&str] = &["name", "title"];
        const COVER: &[&str] = &["artwork", "coverImg"];

        let (title, artist, artwork) = match kind {
            MediaType::Music | MediaType::Album => (TITLE, &["artist", "singer"][..], COVER),
            MediaType::Artist => (NAME, NAME, &["avatar", "artwork", "coverImg"][..]),
            MediaType::Sheet => (TITLE, &["artist", "creator"][..], COVER),
        };

        Self {
            id: text(raw, &["id"]).unwrap_or_else(|| index.to_string()),
            platform: platform.to_string(),
            kind,
            title: text(raw, title).unwrap_or_default(),
            artist: text(raw, artist).unwrap_or_default(),
            album: text(raw, &["album"]),
            artwork: text(raw, artwork),
            duration: raw.get("duration").and_then(Value::as_f64),
            url: text(raw, &["url"]),
            description: text(raw, &["description"]),
            play_count: raw.get("playCount").and_then(Value::as_u64),
            works_num: raw
                .get("worksNum")
                .or_else(|| raw.get("worksNums"))
                .and_then(Value::as_u64),
            raw: stamp(raw.clone(), platform),
        }
    }

    /// Normalize an array payload, skipping anything that is not an array
    #[must_use]
    pub fn list_from_raw(raw: Option<&Value>, platform: &str, kind: MediaType) -> Vec<Self> {
        raw.and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| Self::from_raw(item, platform, kind, i))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Payload to pass back to the owning plugin
    #[must_use]
    pub fn origin_payload(&self) -> Value {
        if self.raw.is_object() {
            self.raw.clone()
        } else {
            serde_json::to_value(self).unwrap_or(Value::Null)
        }
    }

    /// Key used to collapse duplicate search hits
    #[must_use]
    pub fn dedup_key(&self) -> (String, String) {
        (self.title.to_lowercase(), self.artist.to_lowercase())
    }
}

/// A titled group of items from one plugin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemGroup {
    /// Group heading
    pub title: String,
    /// Plugin that produced the group
    pub platform: String,
    /// Items in the group
    pub data: Vec<MediaItem>,
}

/// One page of a paginated listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    /// Items on this page
    pub data: Vec<T>,
    /// No further pages
    pub is_end: bool,
}

impl Page<MediaItem> {
    /// Read `{ isEnd, data | musicList }` from a plugin payload
    #[must_use]
    pub fn from_raw(raw: &Value, platform: &str, kind: MediaType) -> Self {
        let list = raw.get("data").or_else(|| raw.get("musicList"));
        Self {
            data: MediaItem::list_from_raw(list, platform, kind),
            is_end: raw.get("isEnd").and_then(Value::as_bool).unwrap_or(false),
        }
    }
}

/// Resolved playback source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaSource {
    /// Playable URL
    pub url: String,
    /// Request headers required by the source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    /// User agent taken from the headers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

/// Lyric text returned by a plugin
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Lyric {
    /// LRC text
    pub raw_lrc: Option<String>,
    /// Remote LRC location
    pub lrc: Option<String>,
    /// Translated LRC text
    pub translation: Option<String>,
}

/// First non-empty string (or number, rendered) among `keys`
pub(crate) fn text(raw: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match raw.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Overwrite the payload's `platform` with the owning plugin's name
pub(crate) fn stamp(mut raw: Value, platform: &str) -> Value {
    if let Some(obj) = raw.as_object_mut() {
        obj.insert("platform".to_string(), Value::from(platform));
    }
    raw
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn music_fields_fall_back() {
        let raw = json!({ "id": 7, "name": "Song", "singer": "Band", "coverImg": "c.jpg", "platform": "liar" });
        let item = MediaItem::from_raw(&raw, "A", MediaType::Music, 3);

        assert_eq!(item.id, "7");
        assert_eq!(item.title, "Song");
        assert_eq!(item.artist, "Band");
        assert_eq!(item.artwork.as_deref(), Some("c.jpg"));
        assert_eq!(item.platform, "A");
        assert_eq!(item.raw["platform"], "A");
    }

    #[test]
    fn artist_uses_name_and_avatar() {
        let raw = json!({ "name": "Singer", "avatar": "a.png", "artwork": "x.png" });
        let item = MediaItem::from_raw(&raw, "A", MediaType::Artist, 0);
        assert_eq!(item.title, "Singer");
        assert_eq!(item.artist, "Singer");
        assert_eq!(item.artwork.as_deref(), Some("a.png"));
        assert_eq!(item.id, "0");
    }

    #[test]
    fn sheet_reads_creator_and_counts() {
        let raw = json!({ "title": "Mix", "creator": "dj", "playCount": 10, "worksNums": 4 });
        let item = MediaItem::from_raw(&raw, "A", MediaType::Sheet, 0);
        assert_eq!(item.artist, "dj");
        assert_eq!(item.play_count, Some(10));
        assert_eq!(item.works_num, Some(4));
    }

    #[test]
    fn page_accepts_music_list() {
        let raw = json!({ "isEnd": true, "musicList": [{ "title": "a" }, { "title": "b" }] });
        let page = Page::from_raw(&raw, "A", MediaType::Music);
        assert!(page.is_end);
        assert_eq!(page.data.len(), 2);
        assert_eq!(page.data[1].id, "1");
    }

    #[test]
    fn page_defaults_to_more() {
        let page = Page::from_raw(&json!({ "data": [] }), "A", MediaType::Music);
        assert!(!page.is_end);
    }

    #[test]
    fn dedup_key_ignores_case() {
        let a = MediaItem::from_raw(&json!({ "title": "X", "artist": "Y" }), "A", MediaType::Music, 0);
        let b = MediaItem::from_raw(&json!({ "title": "x", "artist": "y" }), "B", MediaType::Music, 0);
        assert_eq!(a.dedup_key(), b.dedup_key());
    }

    #[test]
    fn parses_media_type_and_quality() {
        assert_eq!("Sheet".parse::<MediaType>().unwrap(), MediaType::Sheet);
        assert!("video".parse::<MediaType>().is_err());
        assert_eq!("super".parse::<Quality>().unwrap(), Quality::Super);
    }
}
