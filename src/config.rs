//! Settings loading.
//!
//! A single optional TOML file with full defaults, so `txharvest harvest
//! addresses.csv` works with no configuration at all. Secrets (the remote
//! store token) come from the environment, loaded via dotenvy in `main`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::SiteConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("settings file is not valid TOML: {0}")]
    Format(#[from] toml::de::Error),
}

/// Which remote store backend receives merged artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    /// Local directory (development and tests).
    #[default]
    Local,
    /// Yandex Disk REST API; requires `YADISK_TOKEN` in the environment.
    YandexDisk,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub kind: StoreKind,
    /// Root directory for the local backend.
    pub local_root: PathBuf,
}

impl Default for StoreSettings {
    fn default() -> Self {
        StoreSettings {
            kind: StoreKind::Local,
            local_root: PathBuf::from("remote"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySettings {
    /// Live URL each candidate is probed against.
    pub probe_url: String,
    /// How many vetted proxies to hand to the pool.
    pub count: usize,
}

impl Default for ProxySettings {
    fn default() -> Self {
        ProxySettings {
            probe_url: "https://etherscan.io/".to_string(),
            count: 16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub headless: bool,
    /// Extra Chrome arguments appended at launch.
    pub chrome_args: Vec<String>,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        BrowserSettings {
            headless: true,
            chrome_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    /// Everything lives under here: cache file, worker workspaces, and the
    /// local store root when it is relative.
    pub data_dir: Option<PathBuf>,
    pub site: SiteConfig,
    pub store: StoreSettings,
    pub proxy: ProxySettings,
    pub browser: BrowserSettings,
    /// Column of the address source file holding the address.
    pub address_column: Option<String>,
}

pub const DEFAULT_ADDRESS_COLUMN: &str = "account";

impl Settings {
    /// Load settings from `path`, or defaults when no file is given and the
    /// default location does not exist.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(explicit) => explicit.to_path_buf(),
            None => {
                let default = PathBuf::from("txharvest.toml");
                if !default.exists() {
                    return Ok(Settings::default());
                }
                default
            }
        };
        let raw = std::fs::read_to_string(&path)?;
        Ok(toml::from_str(&raw)?)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("harvest"))
    }

    pub fn cache_path(&self) -> PathBuf {
        self.data_dir().join("resume_cache.json")
    }

    pub fn work_root(&self) -> PathBuf {
        self.data_dir().join("work")
    }

    pub fn address_column(&self) -> &str {
        self.address_column
            .as_deref()
            .unwrap_or(DEFAULT_ADDRESS_COLUMN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_when_no_file() {
        let settings = Settings::load(None).unwrap();
        assert_eq!(settings.store.kind, StoreKind::Local);
        assert_eq!(settings.address_column(), "account");
        assert_eq!(
            settings.cache_path(),
            PathBuf::from("harvest/resume_cache.json")
        );
    }

    #[test]
    fn partial_file_overlays_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
data_dir = "/tmp/tx"
address_column = "wallet"

[store]
kind = "yandex_disk"

[site]
download_timeout_secs = 45
"#
        )
        .unwrap();
        file.flush().unwrap();

        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.store.kind, StoreKind::YandexDisk);
        assert_eq!(settings.address_column(), "wallet");
        assert_eq!(settings.site.download_timeout_secs, 45);
        // Untouched settings keep their defaults.
        assert_eq!(settings.site.element_timeout_secs, 10);
        assert_eq!(settings.proxy.count, 16);
        assert_eq!(
            settings.cache_path(),
            PathBuf::from("/tmp/tx/resume_cache.json")
        );
    }
}
