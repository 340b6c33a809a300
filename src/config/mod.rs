//! Runtime configuration
//!
//! Values resolve as environment variable, then TOML file, then default.

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use semver::Version;

use crate::plugins::{DEFAULT_CALL_TIMEOUT, DEFAULT_FETCH_TIMEOUT, DEFAULT_LOAD_TIMEOUT, SandboxLimits};
use crate::{Error, Result};

pub use file::TuneportConfigFile;

/// Resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Root data directory
    pub data_dir: PathBuf,
    /// Directory of persisted plugin sources
    pub plugin_dir: PathBuf,
    /// `SQLite` database file
    pub db_path: PathBuf,
    /// Version checked against plugin `appVersion` ranges
    pub host_version: Version,
    /// Per-plugin call timeout
    pub call_timeout: Duration,
    /// Top-level evaluation timeout
    pub load_timeout: Duration,
    /// Source download timeout
    pub fetch_timeout: Duration,
    /// Script resource limits
    pub sandbox: SandboxLimits,
}

/// Default data directory: `~/.local/share/tuneport` on Linux
fn default_data_dir() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from(".local/share/tuneport"),
        |d| d.data_dir().join("tuneport"),
    )
}

impl Config {
    /// Load configuration from the environment and the standard config file
    ///
    /// # Errors
    ///
    /// Returns error if the config file or a configured value is malformed
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file()?;
        Self::resolve(fc, |key| std::env::var(key).ok())
    }

    /// Resolve configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is malformed
    pub fn resolve(fc: TuneportConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let data_dir = env("TUNEPORT_DATA_DIR")
            .or(fc.paths.data_dir)
            .map_or_else(default_data_dir, PathBuf::from);

        let plugin_dir = env("TUNEPORT_PLUGIN_DIR")
            .or(fc.paths.plugin_dir)
            .map_or_else(|| data_dir.join("plugins"), PathBuf::from);

        let db_path = env("TUNEPORT_DB_PATH")
            .or(fc.paths.db_path)
            .map_or_else(|| data_dir.join("tuneport.db"), PathBuf::from);

        let host_version = match env("TUNEPORT_HOST_VERSION").or(fc.host.version) {
            Some(raw) => Version::parse(raw.trim())
                .map_err(|e| Error::Config(format!("invalid host version {raw:?}: {e}")))?,
            None => Version::parse(env!("CARGO_PKG_VERSION"))
                .map_err(|e| Error::Config(e.to_string()))?,
        };

        let call_timeout = seconds(
            "TUNEPORT_CALL_TIMEOUT_SECS",
            &env,
            fc.dispatch.call_timeout_secs,
            DEFAULT_CALL_TIMEOUT,
        )?;
        let load_timeout = seconds(
            "TUNEPORT_LOAD_TIMEOUT_SECS",
            &env,
            fc.loader.load_timeout_secs,
            DEFAULT_LOAD_TIMEOUT,
        )?;
        let fetch_timeout = seconds(
            "TUNEPORT_FETCH_TIMEOUT_SECS",
            &env,
            fc.fetch.timeout_secs,
            DEFAULT_FETCH_TIMEOUT,
        )?;

        Ok(Self {
            data_dir,
            plugin_dir,
            db_path,
            host_version,
            call_timeout,
            load_timeout,
            fetch_timeout,
            sandbox: fc.loader.sandbox.unwrap_or_default(),
        })
    }
}

fn seconds(
    key: &str,
    env: &impl Fn(&str) -> Option<String>,
    file_value: Option<u64>,
    default: Duration,
) -> Result<Duration> {
    let secs = match env(key) {
        Some(raw) => Some(
            raw.trim()
                .parse::<u64>()
                .map_err(|e| Error::Config(format!("{key}={raw:?}: {e}")))?,
        ),
        None => file_value,
    };

    match secs {
        Some(0) => Err(Error::Config(format!("{key} must be greater than zero"))),
        Some(secs) => Ok(Duration::from_secs(secs)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_derive_from_data_dir() {
        let config = Config::resolve(
            TuneportConfigFile::default(),
            env_of(&[("TUNEPORT_DATA_DIR", "/srv/tuneport")]),
        )
        .unwrap();

        assert_eq!(config.plugin_dir, PathBuf::from("/srv/tuneport/plugins"));
        assert_eq!(config.db_path, PathBuf::from("/srv/tuneport/tuneport.db"));
        assert_eq!(config.call_timeout, DEFAULT_CALL_TIMEOUT);
        assert_eq!(config.load_timeout, DEFAULT_LOAD_TIMEOUT);
        assert_eq!(
            config.host_version,
            Version::parse(env!("CARGO_PKG_VERSION")).unwrap()
        );
    }

    #[test]
    fn env_overrides_file() {
        let mut fc = TuneportConfigFile::default();
        fc.dispatch.call_timeout_secs = Some(4);
        fc.host.version = Some("1.0.0".to_string());

        let config = Config::resolve(
            fc,
            env_of(&[
                ("TUNEPORT_CALL_TIMEOUT_SECS", "2"),
                ("TUNEPORT_DATA_DIR", "/d"),
            ]),
        )
        .unwrap();

        assert_eq!(config.call_timeout, Duration::from_secs(2));
        assert_eq!(config.host_version, Version::new(1, 0, 0));
    }

    #[test]
    fn malformed_values_are_rejected() {
        let bad_timeout = Config::resolve(
            TuneportConfigFile::default(),
            env_of(&[("TUNEPORT_LOAD_TIMEOUT_SECS", "soon"), ("TUNEPORT_DATA_DIR", "/d")]),
        );
        assert!(matches!(bad_timeout, Err(Error::Config(_))));

        let zero = Config::resolve(
            TuneportConfigFile::default(),
            env_of(&[("TUNEPORT_FETCH_TIMEOUT_SECS", "0"), ("TUNEPORT_DATA_DIR", "/d")]),
        );
        assert!(matches!(zero, Err(Error::Config(_))));

        let bad_version = Config::resolve(
            TuneportConfigFile::default(),
            env_of(&[("TUNEPORT_HOST_VERSION", "one"), ("TUNEPORT_DATA_DIR", "/d")]),
        );
        assert!(matches!(bad_version, Err(Error::Config(_))));
    }
}
