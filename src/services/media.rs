//! Calls routed to the plugin that produced an item

use std::collections::BTreeMap;

use serde_json::Value;

use super::Dispatcher;
use super::item::{Lyric, MediaItem, MediaSource, MediaType, Page, Quality, text};
use crate::plugins::Capability;
use crate::{Error, Result};

impl Dispatcher {
    /// Resolve a playable source for a track
    ///
    /// Falls back to the item's `qualities[quality].url`, then its `url`, when
    /// the plugin cannot resolve the track or returns nothing.
    ///
    /// # Errors
    ///
    /// Returns error if the owning plugin is unknown or fails, or no URL can
    /// be found
    pub async fn media_source(&self, item: &MediaItem, quality: Quality) -> Result<MediaSource> {
        let module = self
            .registry()
            .lookup_by_name(&item.platform)
            .ok_or_else(|| Error::NotFound(format!("plugin {}", item.platform)))?;

        let fallback = || {
            item.raw
                .get("qualities")
                .and_then(|q| q.get(quality.as_str()))
                .and_then(|q| text(q, &["url"]))
                .or_else(|| item.url.clone())
                .map(|url| MediaSource {
                    url,
                    headers: None,
                    user_agent: None,
                })
                .ok_or_else(|| Error::MediaSource(format!("no url for {}", item.title)))
        };

        if !module.supports(Capability::GetMediaSource) {
            return fallback();
        }

        let payload = self
            .call(
                &module,
                Capability::GetMediaSource,
                vec![item.origin_payload(), Value::from(quality.as_str())],
            )
            .await?;
        if payload.is_null() {
            return fallback();
        }

        let url = text(&payload, &["url"])
            .ok_or_else(|| Error::MediaSource(format!("{} returned no url", module.name())))?;
        let headers: Option<BTreeMap<String, String>> = payload
            .get("headers")
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            });
        let user_agent = headers.as_ref().and_then(|h| {
            h.iter()
                .find(|(k, _)| k.eq_ignore_ascii_case("user-agent"))
                .map(|(_, v)| v.clone())
        });

        tracing::debug!(plugin = %module.name(), quality = quality.as_str(), "media source resolved");
        Ok(MediaSource {
            url,
            headers,
            user_agent,
        })
    }

    /// Lyrics of a track, `None` when the plugin has none
    ///
    /// # Errors
    ///
    /// Returns error if the owning plugin is unknown or fails
    pub async fn lyric(&self, item: &MediaItem) -> Result<Option<Lyric>> {
        let module = self
            .registry()
            .lookup_by_name(&item.platform)
            .ok_or_else(|| Error::NotFound(format!("plugin {}", item.platform)))?;
        if !module.supports(Capability::GetLyric) {
            return Ok(None);
        }

        let payload = self
            .call(&module, Capability::GetLyric, vec![item.origin_payload()])
            .await?;
        match payload {
            Value::Null => Ok(None),
            Value::String(raw_lrc) => Ok(Some(Lyric {
                raw_lrc: Some(raw_lrc),
                ..Lyric::default()
            })),
            other => Ok(Some(serde_json::from_value(other)?)),
        }
    }

    /// Tracks of an album
    ///
    /// # Errors
    ///
    /// Returns error if the owning plugin is unknown, lacks the capability,
    /// or fails
    pub async fn album_info(&self, album: &MediaItem, page: u32) -> Result<Page<MediaItem>> {
        let module = self.route(&album.platform, Capability::GetAlbumInfo)?;
        let payload = self
            .call(
                &module,
                Capability::GetAlbumInfo,
                vec![album.origin_payload(), Value::from(page)],
            )
            .await?;
        Ok(Page::from_raw(&payload, module.name(), MediaType::Music))
    }

    /// Works of an artist, of the requested media type
    ///
    /// # Errors
    ///
    /// Returns error if the owning plugin is unknown, lacks the capability,
    /// or fails
    pub async fn artist_works(
        &self,
        artist: &MediaItem,
        page: u32,
        media_type: MediaType,
    ) -> Result<Page<MediaItem>> {
        let module = self.route(&artist.platform, Capability::GetArtistWorks)?;
        let payload = self
            .call(
                &module,
                Capability::GetArtistWorks,
                vec![
                    artist.origin_payload(),
                    Value::from(page),
                    Value::from(media_type.as_str()),
                ],
            )
            .await?;
        Ok(Page::from_raw(&payload, module.name(), media_type))
    }

    /// Tracks of a user sheet
    ///
    /// # Errors
    ///
    /// Returns error if the owning plugin is unknown, lacks the capability,
    /// or fails
    pub async fn sheet_info(&self, sheet: &MediaItem, page: u32) -> Result<Page<MediaItem>> {
        let module = self.route(&sheet.platform, Capability::GetMusicSheetInfo)?;
        let payload = self
            .call(
                &module,
                Capability::GetMusicSheetInfo,
                vec![sheet.origin_payload(), Value::from(page)],
            )
            .await?;
        Ok(Page::from_raw(&payload, module.name(), MediaType::Music))
    }
}
