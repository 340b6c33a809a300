//! Chart listings

use serde_json::Value;

use super::Dispatcher;
use super::item::{ItemGroup, MediaItem, MediaType, Page, text};
use crate::plugins::{Capability, Module};
use crate::{Error, Result};

impl Dispatcher {
    /// Chart groups of every enabled plugin, each under its own heading
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoCapableModule`] if no plugin provides charts
    pub async fn top_lists(&self) -> Result<Vec<ItemGroup>> {
        let groups = self
            .fan_out(Capability::GetTopLists, Vec::new(), |module, payload| {
                top_list_groups(module, &payload)
            })
            .await?;
        Ok(groups.into_iter().flatten().collect())
    }

    /// Chart groups of one plugin
    ///
    /// # Errors
    ///
    /// Returns error if the plugin is unknown, lacks charts, or fails
    pub async fn top_lists_of(&self, plugin: &str) -> Result<Vec<ItemGroup>> {
        let module = self.route(plugin, Capability::GetTopLists)?;
        let payload = self.call(&module, Capability::GetTopLists, Vec::new()).await?;
        Ok(top_list_groups(&module, &payload))
    }

    /// Tracks of one chart, routed to the plugin that listed it
    ///
    /// # Errors
    ///
    /// Returns error if the owning plugin is unknown, lacks the capability,
    /// or fails
    pub async fn top_list_detail(&self, chart: &MediaItem, page: u32) -> Result<Page<MediaItem>> {
        let module = self.route(&chart.platform, Capability::GetTopListDetail)?;
        let payload = self
            .call(
                &module,
                Capability::GetTopListDetail,
                vec![chart.origin_payload(), Value::from(page)],
            )
            .await?;
        if payload.is_null() {
            return Err(Error::NotFound(format!("chart {}", chart.id)));
        }
        Ok(Page::from_raw(&payload, module.name(), MediaType::Music))
    }
}

fn top_list_groups(module: &Module, payload: &Value) -> Vec<ItemGroup> {
    let Some(groups) = payload.as_array() else {
        return Vec::new();
    };

    groups
        .iter()
        .enumerate()
        .map(|(group_index, group)| {
            let data = group
                .get("data")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .enumerate()
                        .map(|(i, item)| {
                            let mut chart =
                                MediaItem::from_raw(item, module.name(), MediaType::Sheet, i);
                            if item.get("id").is_none() {
                                chart.id = format!("{group_index}-{i}");
                            }
                            chart
                        })
                        .collect()
                })
                .unwrap_or_default();

            ItemGroup {
                title: text(group, &["title"])
                    .unwrap_or_else(|| format!("{} charts", module.name())),
                platform: module.name().to_string(),
                data,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn groups_get_default_titles_and_ids() {
        let module = Module::builtin("A").build();
        let payload = json!([
            { "title": "Hot", "data": [{ "id": "h1", "title": "Hot 100" }] },
            { "data": [{ "name": "New" }, { "title": "Rising" }] }
        ]);

        let groups = top_list_groups(&module, &payload);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].title, "Hot");
        assert_eq!(groups[0].data[0].id, "h1");
        assert_eq!(groups[1].title, "A charts");
        assert_eq!(groups[1].data[0].title, "New");
        assert_eq!(groups[1].data[1].id, "1-1");
        assert!(groups.iter().all(|g| g.platform == "A"));
    }

    #[test]
    fn non_array_payload_yields_nothing() {
        let module = Module::builtin("A").build();
        assert!(top_list_groups(&module, &json!({ "oops": true })).is_empty());
    }
}
