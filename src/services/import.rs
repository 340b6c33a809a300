//! Import of external sheet and track links

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Dispatcher;
use super::item::{MediaItem, MediaType};
use crate::plugins::{Capability, Module};
use crate::{Error, Result};

/// What an import produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportKind {
    /// A whole sheet (playlist)
    Sheet,
    /// A single track
    Item,
}

impl ImportKind {
    /// Capability that performs this import
    #[must_use]
    pub const fn capability(self) -> Capability {
        match self {
            Self::Sheet => Capability::ImportMusicSheet,
            Self::Item => Capability::ImportMusicItem,
        }
    }
}

/// A plugin able to import, with its input hints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportPlugin {
    /// Plugin display name
    pub name: String,
    /// Hints describing accepted links
    pub hints: Vec<String>,
}

/// Successful import and the plugin that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Imported<T> {
    /// Plugin that resolved the link
    pub plugin: String,
    /// Imported content
    pub data: T,
}

/// Whether `text` could be handed to an importer
///
/// Any URL qualifies, as does any non-blank identifier.
#[must_use]
pub fn is_importable(text: &str) -> bool {
    url::Url::parse(text).is_ok() || !text.trim().is_empty()
}

impl Dispatcher {
    /// Import a sheet with the first plugin that resolves it
    ///
    /// Plugins are tried one at a time in display order; later plugins are
    /// not invoked once one succeeds.
    ///
    /// # Errors
    ///
    /// Returns error if no plugin can import sheets or every plugin fails
    pub async fn import_sheet(&self, link: &str) -> Result<Imported<Vec<MediaItem>>> {
        for module in self.capable(Capability::ImportMusicSheet)? {
            match self.import_sheet_from(&module, link).await {
                Ok(imported) => return Ok(imported),
                Err(e) => {
                    tracing::debug!(plugin = %module.name(), error = %e, "sheet import failed, trying next plugin");
                }
            }
        }
        Err(Error::ImportFailed(format!("no plugin could import sheet {link}")))
    }

    /// Import a single track with the first plugin that resolves it
    ///
    /// # Errors
    ///
    /// Returns error if no plugin can import tracks or every plugin fails
    pub async fn import_item(&self, link: &str) -> Result<Imported<MediaItem>> {
        for module in self.capable(Capability::ImportMusicItem)? {
            match self.import_item_from(&module, link).await {
                Ok(imported) => return Ok(imported),
                Err(e) => {
                    tracing::debug!(plugin = %module.name(), error = %e, "item import failed, trying next plugin");
                }
            }
        }
        Err(Error::ImportFailed(format!("no plugin could import item {link}")))
    }

    /// Import a sheet with one named plugin
    ///
    /// # Errors
    ///
    /// Returns error if the plugin is unknown, cannot import, or finds nothing
    pub async fn import_sheet_with(&self, plugin: &str, link: &str) -> Result<Imported<Vec<MediaItem>>> {
        let module = self.route(plugin, Capability::ImportMusicSheet)?;
        self.import_sheet_from(&module, link).await
    }

    /// Import a single track with one named plugin
    ///
    /// # Errors
    ///
    /// Returns error if the plugin is unknown, cannot import, or finds nothing
    pub async fn import_item_with(&self, plugin: &str, link: &str) -> Result<Imported<MediaItem>> {
        let module = self.route(plugin, Capability::ImportMusicItem)?;
        self.import_item_from(&module, link).await
    }

    /// Enabled plugins able to perform an import, with their hints
    ///
    /// # Errors
    ///
    /// Returns error if metadata cannot be read
    pub fn import_plugins(&self, kind: ImportKind) -> Result<Vec<ImportPlugin>> {
        let modules = self.registry().list_capable(kind.capability())?;
        Ok(modules
            .iter()
            .map(|module| {
                let hints = &module.info().hints;
                ImportPlugin {
                    name: module.name().to_string(),
                    hints: match kind {
                        ImportKind::Sheet => hints.import_music_sheet.clone(),
                        ImportKind::Item => hints.import_music_item.clone(),
                    },
                }
            })
            .collect())
    }

    async fn import_sheet_from(&self, module: &Module, link: &str) -> Result<Imported<Vec<MediaItem>>> {
        let payload = self
            .call(module, Capability::ImportMusicSheet, vec![Value::from(link)])
            .await?;
        let items = MediaItem::list_from_raw(Some(&payload), module.name(), MediaType::Music);
        if items.is_empty() {
            return Err(Error::ImportFailed(format!("{} found no tracks", module.name())));
        }

        tracing::info!(plugin = %module.name(), tracks = items.len(), "sheet imported");
        Ok(Imported {
            plugin: module.name().to_string(),
            data: items,
        })
    }

    async fn import_item_from(&self, module: &Module, link: &str) -> Result<Imported<MediaItem>> {
        let payload = self
            .call(module, Capability::ImportMusicItem, vec![Value::from(link)])
            .await?;
        if !payload.is_object() {
            return Err(Error::ImportFailed(format!("{} found no track", module.name())));
        }

        let item = MediaItem::from_raw(&payload, module.name(), MediaType::Music, 0);
        tracing::info!(plugin = %module.name(), title = %item.title, "item imported");
        Ok(Imported {
            plugin: module.name().to_string(),
            data: item,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn importable_inputs() {
        assert!(is_importable("https://example.com/playlist/1"));
        assert!(is_importable("12345"));
        assert!(!is_importable("   "));
        assert!(!is_importable(""));
    }

    #[test]
    fn kind_maps_to_capability() {
        assert_eq!(ImportKind::Sheet.capability(), Capability::ImportMusicSheet);
        assert_eq!(ImportKind::Item.capability(), Capability::ImportMusicItem);
    }
}
