//! Deployment configuration.
//!
//! A deployment is a cache generation name plus the manifest of URLs to
//! prefetch. Two presets ship built in, one per deployed variant of the
//! worker; either can be overridden by a JSON file at
//! `~/.config/precache/config.json` or an explicit path.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::models::{CacheGeneration, Manifest};
use crate::net::http::DEFAULT_REQUEST_TIMEOUT_SECS;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "precache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const UHOUES_ORIGIN: &str = "https://uhoues.streamlit.app";

const UHOUES_MANIFEST: [&str; 4] = [
    "/",
    "https://uhoues.streamlit.app/",
    "https://img.icons8.com/color/192/000000/home--v1.png",
    "https://img.icons8.com/color/512/000000/home--v1.png",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    /// `uhoues-v1.0`
    Uhoues,
    /// `uhoues-v1`, the earlier generation name
    UhouesLegacy,
}

impl Preset {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "uhoues" | "uhoues-v1.0" => Some(Preset::Uhoues),
            "uhoues-legacy" | "uhoues-v1" => Some(Preset::UhouesLegacy),
            _ => None,
        }
    }

    pub fn generation_name(&self) -> &'static str {
        match self {
            Preset::Uhoues => "uhoues-v1.0",
            Preset::UhouesLegacy => "uhoues-v1",
        }
    }
}

fn default_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub generation: CacheGeneration,
    pub manifest: Manifest,
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub best_effort: bool,
}

impl Config {
    pub fn preset(preset: Preset) -> Self {
        Self {
            generation: CacheGeneration::from_static(preset.generation_name()),
            manifest: Manifest::from_static(&UHOUES_MANIFEST),
            origin: Some(UHOUES_ORIGIN.to_string()),
            cache_dir: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            best_effort: false,
        }
    }

    /// Load from `path` if given, else from the default config file if it
    /// exists, else fall back to the `uhoues-v1.0` preset.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_file(path),
            None => match Self::config_path() {
                Ok(path) if path.exists() => Self::load_file(&path),
                _ => Ok(Self::preset(Preset::Uhoues)),
            },
        }
    }

    fn load_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// `~/.config/precache/config.json`
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.cache_dir {
            return Ok(dir.clone());
        }
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn origin_url(&self) -> Result<Option<Url>> {
        self.origin
            .as_deref()
            .map(|o| Url::parse(o).with_context(|| format!("Invalid origin: {}", o)))
            .transpose()
    }
}
