//! Recommended sheets

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Dispatcher;
use super::item::{ItemGroup, MediaItem, MediaType, Page, text};
use crate::plugins::{Capability, Module};
use crate::Result;

/// Sheet tags offered by plugins
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendTags {
    /// Featured tags shown first
    pub pinned: Vec<MediaItem>,
    /// Tag categories
    pub data: Vec<ItemGroup>,
}

impl RecommendTags {
    fn from_raw(module: &Module, payload: &Value) -> Self {
        let pinned = MediaItem::list_from_raw(payload.get("pinned"), module.name(), MediaType::Sheet);
        let data = payload
            .get("data")
            .and_then(Value::as_array)
            .map(|groups| {
                groups
                    .iter()
                    .map(|group| ItemGroup {
                        title: text(group, &["title"]).unwrap_or_default(),
                        platform: module.name().to_string(),
                        data: MediaItem::list_from_raw(
                            group.get("data"),
                            module.name(),
                            MediaType::Sheet,
                        ),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self { pinned, data }
    }

    fn merge(mut self, other: Self) -> Self {
        self.pinned.extend(other.pinned);
        self.data.extend(other.data);
        self
    }
}

impl Dispatcher {
    /// Tags of every enabled plugin, pinned and grouped lists concatenated
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::NoCapableModule`] if no plugin offers tags
    pub async fn sheet_tags(&self) -> Result<RecommendTags> {
        let tags = self
            .fan_out(Capability::GetRecommendSheetTags, Vec::new(), |module, payload| {
                RecommendTags::from_raw(module, &payload)
            })
            .await?;
        Ok(tags.into_iter().fold(RecommendTags::default(), RecommendTags::merge))
    }

    /// Tags of one plugin
    ///
    /// # Errors
    ///
    /// Returns error if the plugin is unknown, lacks the capability, or fails
    pub async fn sheet_tags_of(&self, plugin: &str) -> Result<RecommendTags> {
        let module = self.route(plugin, Capability::GetRecommendSheetTags)?;
        let payload = self
            .call(&module, Capability::GetRecommendSheetTags, Vec::new())
            .await?;
        Ok(RecommendTags::from_raw(&module, &payload))
    }

    /// Pinned sheets of every enabled plugin
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::NoCapableModule`] if no plugin offers tags
    pub async fn pinned_sheets(&self) -> Result<Vec<MediaItem>> {
        Ok(self.sheet_tags().await?.pinned)
    }

    /// Sheets under one tag, routed to the plugin that offered it
    ///
    /// # Errors
    ///
    /// Returns error if the owning plugin is unknown, lacks the capability,
    /// or fails
    pub async fn sheets_by_tag(&self, tag: &MediaItem, page: u32) -> Result<Page<MediaItem>> {
        let module = self.route(&tag.platform, Capability::GetRecommendSheetsByTag)?;
        let payload = self
            .call(
                &module,
                Capability::GetRecommendSheetsByTag,
                vec![tag.origin_payload(), Value::from(page)],
            )
            .await?;
        Ok(Page::from_raw(&payload, module.name(), MediaType::Sheet))
    }

    /// Tracks of a recommended sheet
    ///
    /// A plugin returning nothing yields an empty final page.
    ///
    /// # Errors
    ///
    /// Returns error if the owning plugin is unknown, lacks the capability,
    /// or fails
    pub async fn sheet_detail(&self, sheet: &MediaItem, page: u32) -> Result<Page<MediaItem>> {
        let module = self.route(&sheet.platform, Capability::GetRecommendSheetDetail)?;
        let payload = self
            .call(
                &module,
                Capability::GetRecommendSheetDetail,
                vec![sheet.origin_payload(), Value::from(page)],
            )
            .await?;

        if payload.is_null() {
            return Ok(Page {
                data: Vec::new(),
                is_end: true,
            });
        }
        Ok(Page::from_raw(&payload, module.name(), MediaType::Music))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn tags_merge_pinned_and_groups() {
        let a = Module::builtin("A").build();
        let b = Module::builtin("B").build();

        let merged = RecommendTags::from_raw(
            &a,
            &json!({ "pinned": [{ "id": "p", "title": "Top" }], "data": [{ "title": "Mood", "data": [{ "title": "Calm" }] }] }),
        )
        .merge(RecommendTags::from_raw(
            &b,
            &json!({ "data": [{ "title": "Genre", "data": [] }] }),
        ));

        assert_eq!(merged.pinned.len(), 1);
        assert_eq!(merged.pinned[0].platform, "A");
        assert_eq!(merged.data.len(), 2);
        assert_eq!(merged.data[0].data[0].title, "Calm");
        assert_eq!(merged.data[1].platform, "B");
    }

    #[test]
    fn malformed_payload_is_empty() {
        let a = Module::builtin("A").build();
        let tags = RecommendTags::from_raw(&a, &json!("nope"));
        assert_eq!(tags, RecommendTags::default());
    }
}
