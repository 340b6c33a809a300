//! TOML configuration file loading
//!
//! Supports `~/.config/tuneport/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;
use crate::plugins::SandboxLimits;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct TuneportConfigFile {
    /// Storage locations
    #[serde(default)]
    pub paths: PathsFileConfig,

    /// Host identity
    #[serde(default)]
    pub host: HostFileConfig,

    /// Capability dispatch
    #[serde(default)]
    pub dispatch: DispatchFileConfig,

    /// Plugin loading
    #[serde(default)]
    pub loader: LoaderFileConfig,

    /// Remote source fetching
    #[serde(default)]
    pub fetch: FetchFileConfig,
}

/// Storage locations
#[derive(Debug, Default, Deserialize)]
pub struct PathsFileConfig {
    /// Root data directory
    pub data_dir: Option<String>,
    /// Directory of persisted plugin sources
    pub plugin_dir: Option<String>,
    /// `SQLite` database file
    pub db_path: Option<String>,
}

/// Host identity
#[derive(Debug, Default, Deserialize)]
pub struct HostFileConfig {
    /// Version checked against plugin `appVersion` ranges
    pub version: Option<String>,
}

/// Capability dispatch
#[derive(Debug, Default, Deserialize)]
pub struct DispatchFileConfig {
    /// Per-plugin call timeout
    pub call_timeout_secs: Option<u64>,
}

/// Plugin loading
#[derive(Debug, Default, Deserialize)]
pub struct LoaderFileConfig {
    /// Top-level evaluation timeout
    pub load_timeout_secs: Option<u64>,
    /// Script resource limits
    pub sandbox: Option<SandboxLimits>,
}

/// Remote source fetching
#[derive(Debug, Default, Deserialize)]
pub struct FetchFileConfig {
    /// Download timeout
    pub timeout_secs: Option<u64>,
}

/// Load the TOML config file from the standard path
///
/// Returns `TuneportConfigFile::default()` if the file doesn't exist.
///
/// # Errors
///
/// Returns error if the file exists but cannot be read or parsed
pub fn load_config_file() -> Result<TuneportConfigFile> {
    config_file_path().map_or_else(|| Ok(TuneportConfigFile::default()), |path| {
        load_config_file_at(&path)
    })
}

/// Load a TOML config file from an explicit path
///
/// Returns `TuneportConfigFile::default()` if the file doesn't exist.
///
/// # Errors
///
/// Returns error if the file exists but cannot be read or parsed
pub fn load_config_file_at(path: &Path) -> Result<TuneportConfigFile> {
    if !path.exists() {
        return Ok(TuneportConfigFile::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config: TuneportConfigFile = toml::from_str(&content).inspect_err(|e| {
        tracing::error!(path = %path.display(), error = %e, "failed to parse config file");
    })?;
    tracing::info!(path = %path.display(), "loaded config file");
    Ok(config)
}

/// Return the config file path: `~/.config/tuneport/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("tuneport").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let fc = load_config_file_at(&dir.path().join("nope.toml")).unwrap();
        assert!(fc.paths.data_dir.is_none());
        assert!(fc.dispatch.call_timeout_secs.is_none());
    }

    #[test]
    fn partial_file_overlays() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
            [paths]
            plugin_dir = "/tmp/plugins"

            [dispatch]
            call_timeout_secs = 3

            [loader.sandbox]
            max_operations = 1000
            "#,
        )
        .unwrap();

        let fc = load_config_file_at(&path).unwrap();
        assert_eq!(fc.paths.plugin_dir.as_deref(), Some("/tmp/plugins"));
        assert_eq!(fc.dispatch.call_timeout_secs, Some(3));
        let sandbox = fc.loader.sandbox.unwrap();
        assert_eq!(sandbox.max_operations, 1000);
        assert_eq!(sandbox.max_call_levels, SandboxLimits::default().max_call_levels);
    }

    #[test]
    fn malformed_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[dispatch\ncall_timeout_secs = ").unwrap();

        let err = load_config_file_at(&path).unwrap_err();
        assert!(matches!(err, crate::Error::Toml(_)));
        assert_eq!(err.kind(), "serialization");
    }
}
