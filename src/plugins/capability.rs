//! Capability allow-list
//!
//! Only the names listed here are ever lifted from a module's exports into
//! its capability table. Anything else a script exports is ignored.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A named, optional operation a plugin may implement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Capability {
    /// `search(query, page, mediaType)`
    Search,
    /// `getMediaSource(mediaItem, quality)`
    GetMediaSource,
    /// `getLyric(mediaItem)`
    GetLyric,
    /// `getAlbumInfo(albumItem, page)`
    GetAlbumInfo,
    /// `getArtistWorks(artistItem, page, mediaType)`
    GetArtistWorks,
    /// `getMusicSheetInfo(sheetItem, page)`
    GetMusicSheetInfo,
    /// `importMusicSheet(urlLike)`
    ImportMusicSheet,
    /// `importMusicItem(urlLike)`
    ImportMusicItem,
    /// `getTopLists()`
    GetTopLists,
    /// `getTopListDetail(topListItem, page)`
    GetTopListDetail,
    /// `getRecommendSheetTags()`
    GetRecommendSheetTags,
    /// `getRecommendSheetsByTag(tag, page)`
    GetRecommendSheetsByTag,
    /// `getRecommendSheetDetail(sheet, page)`
    GetRecommendSheetDetail,
}

impl Capability {
    /// Every known capability, in table order
    pub const ALL: [Self; 13] = [
        Self::Search,
        Self::GetMediaSource,
        Self::GetLyric,
        Self::GetAlbumInfo,
        Self::GetArtistWorks,
        Self::GetMusicSheetInfo,
        Self::ImportMusicSheet,
        Self::ImportMusicItem,
        Self::GetTopLists,
        Self::GetTopListDetail,
        Self::GetRecommendSheetTags,
        Self::GetRecommendSheetsByTag,
        Self::GetRecommendSheetDetail,
    ];

    /// Export field name used by module sources
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::GetMediaSource => "getMediaSource",
            Self::GetLyric => "getLyric",
            Self::GetAlbumInfo => "getAlbumInfo",
            Self::GetArtistWorks => "getArtistWorks",
            Self::GetMusicSheetInfo => "getMusicSheetInfo",
            Self::ImportMusicSheet => "importMusicSheet",
            Self::ImportMusicItem => "importMusicItem",
            Self::GetTopLists => "getTopLists",
            Self::GetTopListDetail => "getTopListDetail",
            Self::GetRecommendSheetTags => "getRecommendSheetTags",
            Self::GetRecommendSheetsByTag => "getRecommendSheetsByTag",
            Self::GetRecommendSheetDetail => "getRecommendSheetDetail",
        }
    }

    /// Number of arguments the host passes
    #[must_use]
    pub const fn arity(self) -> usize {
        match self {
            Self::GetTopLists | Self::GetRecommendSheetTags => 0,
            Self::GetLyric | Self::ImportMusicSheet | Self::ImportMusicItem => 1,
            Self::Search | Self::GetArtistWorks => 3,
            Self::GetMediaSource
            | Self::GetAlbumInfo
            | Self::GetMusicSheetInfo
            | Self::GetTopListDetail
            | Self::GetRecommendSheetsByTag
            | Self::GetRecommendSheetDetail => 2,
        }
    }

    /// Resolve an export field name
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == name)
    }

    /// Slot in a capability table
    pub(crate) const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| format!("unknown capability: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_from_name() {
        for cap in Capability::ALL {
            assert_eq!(Capability::from_name(cap.as_str()), Some(cap));
        }
        assert_eq!(Capability::from_name("platform"), None);
    }

    #[test]
    fn table_slots_follow_declaration_order() {
        for (i, cap) in Capability::ALL.into_iter().enumerate() {
            assert_eq!(cap.index(), i);
        }
    }

    #[test]
    fn serde_uses_export_names() {
        let json = serde_json::to_string(&Capability::GetTopListDetail).unwrap();
        assert_eq!(json, "\"getTopListDetail\"");
    }
}
