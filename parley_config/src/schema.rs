use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use parley_core::SurfaceProfile;
use tracing::{debug, info};

const CONFIG_DIR: &str = "parley";
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub provider: ProviderConfig,
    /// Surfaces defined or overridden by the user, keyed by name.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub surfaces: HashMap<String, SurfaceProfile>,
    #[serde(default = "Config::default_surface")]
    pub default_surface: String,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProviderConfig {
    pub api_key: String,
    #[serde(default = "ProviderConfig::default_base_url")]
    pub base_url: String,
    #[serde(default = "ProviderConfig::default_model")]
    pub model: String,
    /// Model used for compaction summaries. Falls back to `model`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_model: Option<String>,
    #[serde(default = "ProviderConfig::default_retry_delays")]
    pub retry_delays_secs: Vec<u64>,
}

impl ProviderConfig {
    fn default_base_url() -> String {
        "https://open.bigmodel.cn/api/paas/v4".to_string()
    }

    fn default_model() -> String {
        "glm-4-flash".to_string()
    }

    fn default_retry_delays() -> Vec<u64> {
        vec![2, 4]
    }

    #[must_use]
    pub fn summary_model(&self) -> &str {
        self.summary_model.as_deref().unwrap_or(&self.model)
    }

    #[must_use]
    pub fn retry_delays(&self) -> Vec<Duration> {
        self.retry_delays_secs
            .iter()
            .map(|secs| Duration::from_secs(*secs))
            .collect()
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct DatabaseConfig {
    /// SQLite file for transcripts. Defaults to `~/parley/transcripts.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Config {
    fn default_surface() -> String {
        "companion".to_string()
    }

    pub fn config_dir() -> anyhow::Result<PathBuf> {
        Ok(dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Cannot find home directory"))?
            .join(CONFIG_DIR))
    }

    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_dir()?.join(CONFIG_FILE);

        if !config_path.exists() {
            anyhow::bail!(
                "Config file not found at: {}. Please run 'parley init' to create config.",
                config_path.display()
            );
        }

        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Invalid config at {}: {e}", path.display()))?;

        // Reject bad compaction settings now rather than on first chat.
        for name in config.surface_names() {
            config.surface(&name)?;
        }
        config.surface(&config.default_surface)?;

        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Resolve a surface: the config's entry when present, otherwise a
    /// built-in profile.
    pub fn surface(&self, name: &str) -> anyhow::Result<SurfaceProfile> {
        let profile = match self.surfaces.get(name) {
            Some(profile) => SurfaceProfile {
                name: name.to_string(),
                ..profile.clone()
            },
            None => SurfaceProfile::builtin(name).ok_or_else(|| {
                anyhow::anyhow!(
                    "Unknown surface '{name}'. Available: {}",
                    self.surface_names().join(", ")
                )
            })?,
        };

        if let Some(compaction) = &profile.compaction {
            compaction
                .validate()
                .map_err(|e| anyhow::anyhow!("Surface '{name}': {e}"))?;
        }
        Ok(profile)
    }

    /// Configured surfaces plus the built-ins, sorted.
    #[must_use]
    pub fn surface_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.surfaces.keys().cloned().collect();
        for builtin in ["companion", "tutor"] {
            if !self.surfaces.contains_key(builtin) {
                names.push(builtin.to_string());
            }
        }
        names.sort();
        names
    }

    pub fn database_path(&self) -> anyhow::Result<PathBuf> {
        match &self.database.path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::config_dir()?.join("transcripts.db")),
        }
    }

    pub fn ensure_config_dir() -> anyhow::Result<PathBuf> {
        let config_dir = Self::config_dir()?;
        std::fs::create_dir_all(&config_dir)?;
        Ok(config_dir)
    }

    pub fn create_config() -> anyhow::Result<PathBuf> {
        let config_dir = Self::ensure_config_dir()?;
        let config_path = config_dir.join(CONFIG_FILE);

        if config_path.exists() {
            anyhow::bail!(
                "Config file already exists at: {}. Please edit it directly.",
                config_path.display()
            );
        }

        std::fs::write(&config_path, Self::template())?;
        info!("Created config file at: {}", config_path.display());
        Ok(config_path)
    }

    #[must_use]
    pub const fn template() -> &'static str {
        r#"{
  "provider": {
    "api_key": "your-api-key-here",
    "base_url": "https://open.bigmodel.cn/api/paas/v4",
    "model": "glm-4-flash",
    "summary_model": "glm-4-flash",
    "retry_delays_secs": [2, 4]
  },
  "default_surface": "companion",
  "surfaces": {
    "tutor": {
      "system_prompt": "You are an expert tutor. Explain step by step, check understanding, and keep answers focused on the subject.",
      "greeting": "Hi! What subject are we working on today?",
      "temperature": 0.5,
      "compaction": {
        "threshold": 16,
        "retain_tail": 6
      }
    }
  },
  "logging": {
    "level": "info"
  }
}"#
    }
}
