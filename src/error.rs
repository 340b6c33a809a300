//! Error types for the tuneport plugin runtime

use thiserror::Error;

use crate::plugins::{CallError, Capability, FailureReason};

/// Result type alias for tuneport operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the plugin runtime
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Source text could not be loaded into a mounted module
    #[error("plugin {name:?} failed to load: {reason}")]
    LoadFailed {
        /// Declared platform name (may be empty)
        name: String,
        /// Classified failure
        reason: FailureReason,
    },

    /// A newer version of the same plugin is already installed
    #[error("a newer version of {name} is already installed ({installed} > {incoming})")]
    NewerVersionInstalled {
        /// Plugin display name
        name: String,
        /// Version currently installed
        installed: String,
        /// Version that was rejected
        incoming: String,
    },

    /// Plugin has nowhere to re-fetch its source from
    #[error("plugin {0} has no update source")]
    NoUpdateSource(String),

    /// No enabled, mounted plugin implements the capability
    #[error("no enabled plugin supports {0}")]
    NoCapableModule(Capability),

    /// Named plugin does not implement the capability
    #[error("plugin {plugin} does not support {capability}")]
    Unsupported {
        /// Plugin display name
        plugin: String,
        /// Requested capability
        capability: Capability,
    },

    /// A plugin call failed
    #[error("plugin {plugin} failed: {source}")]
    Call {
        /// Plugin display name
        plugin: String,
        /// Underlying call failure
        #[source]
        source: CallError,
    },

    /// Every candidate plugin failed to import the link
    #[error("import failed: {0}")]
    ImportFailed(String),

    /// Playable source could not be resolved
    #[error("media source unavailable: {0}")]
    MediaSource(String),

    /// Remote source fetch error
    #[error("fetch error: {0}")]
    Fetch(String),

    /// Resource not found
    #[error("not found: {0}")]
    NotFound(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl Error {
    /// Stable machine-readable code for envelopes
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::LoadFailed { .. } => "load_failed",
            Self::NewerVersionInstalled { .. } => "newer_version_installed",
            Self::NoUpdateSource(_) => "no_update_source",
            Self::NoCapableModule(_) => "no_capable_module",
            Self::Unsupported { .. } => "unsupported",
            Self::Call { .. } => "call_failed",
            Self::ImportFailed(_) => "import_failed",
            Self::MediaSource(_) => "media_source",
            Self::Fetch(_) | Self::Http(_) => "fetch",
            Self::NotFound(_) => "not_found",
            Self::Io(_) => "io",
            Self::Serialization(_) | Self::Toml(_) => "serialization",
            Self::Database(_) | Self::Sqlite(_) => "database",
        }
    }
}
