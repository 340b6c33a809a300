//! Aggregated search

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Dispatcher;
use super::item::{MediaItem, MediaType, Page};
use crate::Result;
use crate::plugins::Capability;

/// Search request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchOptions {
    /// Query text
    pub query: String,
    /// 1-based page number
    #[serde(default = "first_page")]
    pub page: u32,
    /// What to search for
    #[serde(default)]
    pub media_type: MediaType,
    /// Restrict the search to one plugin
    #[serde(default)]
    pub plugin: Option<String>,
}

const fn first_page() -> u32 {
    1
}

impl SearchOptions {
    /// First-page music search across all plugins
    #[must_use]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            page: first_page(),
            media_type: MediaType::Music,
            plugin: None,
        }
    }
}

/// Merged search results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    /// Deduplicated hits in plugin order
    pub data: Vec<MediaItem>,
    /// Some plugin has further pages
    pub has_more: bool,
}

impl Dispatcher {
    /// Search every enabled plugin, or only `options.plugin` when set
    ///
    /// In aggregated mode a failing plugin contributes nothing. A targeted
    /// search surfaces that plugin's error.
    ///
    /// # Errors
    ///
    /// Returns error if no plugin can search, or the targeted plugin fails
    pub async fn search(&self, options: &SearchOptions) -> Result<SearchResult> {
        let args = vec![
            Value::from(options.query.clone()),
            Value::from(options.page),
            Value::from(options.media_type.as_str()),
        ];
        let kind = options.media_type;

        if let Some(name) = options.plugin.as_deref() {
            let module = self.route(name, Capability::Search)?;
            let payload = self.call(&module, Capability::Search, args).await?;
            let page = Page::from_raw(&payload, module.name(), kind);
            return Ok(SearchResult {
                data: page.data,
                has_more: !page.is_end,
            });
        }

        let pages = self
            .fan_out(Capability::Search, args, |module, payload| {
                Page::from_raw(&payload, module.name(), kind)
            })
            .await?;

        let has_more = pages.iter().any(|page| !page.is_end);
        let data = dedup(pages.into_iter().flat_map(|page| page.data));

        tracing::debug!(
            query = %options.query,
            page = options.page,
            media_type = %kind,
            hits = data.len(),
            has_more,
            "search complete"
        );
        Ok(SearchResult { data, has_more })
    }
}

/// Keep the first item for each case-insensitive `(title, artist)` pair
fn dedup(items: impl IntoIterator<Item = MediaItem>) -> Vec<MediaItem> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.dedup_key()))
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn item(title: &str, artist: &str, platform: &str) -> MediaItem {
        MediaItem::from_raw(
            &json!({ "title": title, "artist": artist }),
            platform,
            MediaType::Music,
            0,
        )
    }

    #[test]
    fn dedup_keeps_first_occurrence() {
        let merged = dedup(vec![
            item("X", "Y", "A"),
            item("x", "y", "B"),
            item("X", "Z", "B"),
        ]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].platform, "A");
        assert_eq!(merged[1].artist, "Z");
    }

    #[test]
    fn options_default_to_first_music_page() {
        let options: SearchOptions = serde_json::from_value(json!({ "query": "q" })).unwrap();
        assert_eq!(options, SearchOptions::new("q"));
    }
}
