//! Settings configuration
//!
//! Manages user-configurable settings for the translator.
//! Default values are defined in `config/default.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use ilotoki_engine::model::{Fetcher, InferenceParams, ModelAsset, ModelStore, registry};
use ilotoki_engine::{Language, OutputNormalization};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Default configuration TOML embedded from config/default.toml
const DEFAULT_CONFIG_TOML: &str = include_str!("../../config/default.toml");

const USER_AGENT: &str = concat!("ilotoki/", env!("CARGO_PKG_VERSION"));

/// Configuration settings for the translator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Which model to use and where to keep it
    pub model: ModelSettings,
    /// Parameters applied when the model is loaded
    pub inference: InferenceSettings,
    /// Initial translation form
    pub translation: TranslationSettings,
}

/// Model selection and storage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelSettings {
    /// Model variant id (optional, defaults to registry default)
    pub variant: Option<String>,
    /// Directory holding the model file (optional, defaults to data_dir/models)
    pub models_dir: Option<String>,
    /// Download URL override (optional, defaults to the registry URL)
    pub url: Option<String>,
    /// Connect timeout for downloads in seconds (0 = none)
    pub connect_timeout_secs: u64,
}

/// llama.cpp session parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceSettings {
    /// Sampling temperature (0 = greedy)
    pub temperature: f32,
    /// Keep the conversation between translations
    pub store_chats: bool,
    /// Context window in tokens
    pub n_ctx: u32,
    /// Number of threads for llama.cpp inference (0 = all cores, llama.cpp default)
    pub n_threads: u32,
    /// Upper bound on generated tokens per translation
    pub max_new_tokens: usize,
}

/// Starting values of the translation form
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationSettings {
    /// Language on the other side of Toki Pona
    pub language: Language,
    /// Translate from Toki Pona (true) or into it (false)
    pub from_toki_pona: bool,
    /// Strip leading/trailing whitespace from model output
    pub trim_output: bool,
}

impl Default for Settings {
    fn default() -> Self {
        toml::from_str(DEFAULT_CONFIG_TOML).expect("embedded default.toml must be valid")
    }
}

/// Recursively merge `overlay` TOML values on top of `base`.
fn merge_toml(base: &mut toml::Value, overlay: &toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, value) in overlay_table {
                if let Some(base_value) = base_table.get_mut(key) {
                    merge_toml(base_value, value);
                } else {
                    base_table.insert(key.clone(), value.clone());
                }
            }
        }
        (base, _) => {
            *base = overlay.clone();
        }
    }
}

/// Parse user TOML content merged on top of default.toml.
fn parse_with_defaults(user_content: &str) -> Result<Settings> {
    let mut base: toml::Value = toml::from_str(DEFAULT_CONFIG_TOML)?;
    let user: toml::Value = toml::from_str(user_content)?;
    merge_toml(&mut base, &user);
    let settings: Settings = base.try_into()?;
    Ok(settings)
}

/// Get the project directories for ilotoki.
fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("one", "larkin", "ilotoki")
}

impl Settings {
    /// Get the data directory path
    pub fn data_dir() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.data_dir().to_path_buf())
    }

    /// Get the configuration directory path
    pub fn config_dir() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the configuration file path
    pub fn config_file() -> Option<PathBuf> {
        Self::config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Directory the model file is stored in.
    ///
    /// Default: `~/.local/share/ilotoki/models/`
    pub fn models_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.model.models_dir {
            return Ok(PathBuf::from(dir));
        }
        Self::data_dir()
            .map(|dir| dir.join("models"))
            .context("Could not determine data directory; set model.models_dir")
    }

    pub fn model_store(&self) -> Result<ModelStore> {
        Ok(ModelStore::new(self.models_dir()?))
    }

    /// The configured model variant, with the URL override applied.
    pub fn model_asset(&self) -> Result<ModelAsset> {
        let asset =
            ModelAsset::from_variant_id(self.model.variant.as_deref()).with_context(|| {
                format!(
                    "model.variant must be one of: {}",
                    registry().all_variant_ids().join(", ")
                )
            })?;
        Ok(match &self.model.url {
            Some(url) => asset.with_url(url),
            None => asset,
        })
    }

    /// Downloader with the configured connect timeout.
    pub fn fetcher(&self) -> Result<Fetcher> {
        let mut builder = reqwest::Client::builder().user_agent(USER_AGENT);
        if self.model.connect_timeout_secs > 0 {
            builder =
                builder.connect_timeout(Duration::from_secs(self.model.connect_timeout_secs));
        }
        let client = builder.build().context("Failed to build HTTP client")?;
        Ok(Fetcher::with_client(client))
    }

    pub fn inference_params(&self) -> InferenceParams {
        InferenceParams {
            temperature: self.inference.temperature,
            store_chats: self.inference.store_chats,
            n_ctx: self.inference.n_ctx,
            n_threads: self.inference.n_threads,
            max_new_tokens: self.inference.max_new_tokens,
            ..InferenceParams::default()
        }
    }

    pub fn normalization(&self) -> OutputNormalization {
        if self.translation.trim_output {
            OutputNormalization::Trim
        } else {
            OutputNormalization::Verbatim
        }
    }

    /// Load settings from the default configuration file.
    /// Falls back to embedded default.toml if the config file does not exist.
    pub fn load() -> Result<Self> {
        let Some(config_file) = Self::config_file() else {
            warn!("Could not determine config directory, using defaults");
            return Ok(Self::default());
        };

        if !config_file.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }

        debug!("Loading config from {:?}", config_file);
        Self::load_from(&config_file)
    }

    /// Load settings from a specific file, merged on top of defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        parse_with_defaults(&content)
            .with_context(|| format!("Invalid config {}", path.display()))
    }

    /// Save settings to the default configuration file
    pub fn save(&self) -> Result<()> {
        let Some(config_file) = Self::config_file() else {
            anyhow::bail!("Could not determine config directory");
        };
        debug!("Saving config to {:?}", config_file);
        self.save_to(&config_file)
    }

    /// Save settings to a specific file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}
