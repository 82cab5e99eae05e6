//! Configuration
//!
//! Defaults, optionally overlaid by a JSON file, then by `DECKFORGE_*`
//! environment variables (a `.env` file is honoured when present).

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::card::RarityThresholds;
use crate::themes::ThemeTable;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("environment variable {key}={value} is not valid")]
    InvalidOverride { key: String, value: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub text_api_url: String,
    pub text_model: String,
    pub image_api_url: String,
    pub image_model: String,
    /// Resolution requested from the image service, not the card size
    pub artwork_size: [u32; 2],
    pub request_timeout_secs: u64,
    pub templates_dir: PathBuf,
    pub rasterizer: PathBuf,
    pub placeholder_image: Option<PathBuf>,
    /// 1 runs slots sequentially
    pub workers: usize,
    pub rarity: RarityThresholds,
    pub themes: ThemeTable,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            text_api_url: "https://text.pollinations.ai/openai".to_string(),
            text_model: "openai".to_string(),
            image_api_url: "https://image.pollinations.ai/prompt".to_string(),
            image_model: "flux".to_string(),
            artwork_size: [512, 512],
            request_timeout_secs: 30,
            templates_dir: PathBuf::from("templates"),
            rasterizer: PathBuf::from("wkhtmltoimage"),
            placeholder_image: None,
            workers: 1,
            rarity: RarityThresholds::default(),
            themes: ThemeTable::default(),
        }
    }
}

impl Config {
    /// Defaults, then `path` if given, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Applies `DECKFORGE_*` overrides looked up through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("DECKFORGE_TEXT_API_URL") {
            self.text_api_url = v;
        }
        if let Some(v) = lookup("DECKFORGE_IMAGE_API_URL") {
            self.image_api_url = v;
        }
        if let Some(v) = lookup("DECKFORGE_TIMEOUT_SECS") {
            self.request_timeout_secs = parse_override("DECKFORGE_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("DECKFORGE_TEMPLATES_DIR") {
            self.templates_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("DECKFORGE_RASTERIZER") {
            self.rasterizer = PathBuf::from(v);
        }
        if let Some(v) = lookup("DECKFORGE_WORKERS") {
            self.workers = parse_override("DECKFORGE_WORKERS", &v)?;
        }
        if let Some(v) = lookup("DECKFORGE_PLACEHOLDER_IMAGE") {
            self.placeholder_image = Some(PathBuf::from(v));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid("requestTimeoutSecs must be positive".into()));
        }
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.artwork_size[0] == 0 || self.artwork_size[1] == 0 {
            return Err(ConfigError::Invalid("artworkSize must be non-zero".into()));
        }
        if !self.rarity.is_ordered() {
            return Err(ConfigError::Invalid("rarity thresholds must be ascending".into()));
        }
        self.themes.check().map_err(ConfigError::Invalid)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn parse_override<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}
