use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::core::state::CharacterAttributes;
use crate::services::export::ExportConfig;
use crate::services::generation::gemini::GeminiConfig;
use crate::services::scheduler::DEFAULT_CONCURRENCY;

const CONFIG_FILE: &str = "config.yml";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_output")]
    pub output_folder: String,

    #[serde(default = "default_build")]
    pub build_folder: String,

    #[serde(default)]
    pub unattended: bool,

    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    pub generation: GenerationConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub export: ExportConfig,

    #[serde(default)]
    pub character: Option<CharacterAttributes>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_retry_count")]
    pub retry_count: usize,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_seconds: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    pub gemini: Option<GeminiConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
        }
    }
}

fn default_output() -> String {
    "output".to_string()
}
fn default_build() -> String {
    "build".to_string()
}
fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}
fn default_provider() -> String {
    "gemini".to_string()
}
fn default_retry_count() -> usize {
    2
}
fn default_retry_delay() -> u64 {
    3
}
fn default_request_timeout() -> u64 {
    120
}
fn default_cache_enabled() -> bool {
    true
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("{} not found. Please create one.", path.display());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = serde_yaml_ng::from_str(content)?;
        if config.concurrency == 0 {
            anyhow::bail!("concurrency must be at least 1");
        }
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let content = serde_yaml_ng::to_string(self)?;
        fs::write(CONFIG_FILE, content).context("Failed to write config.yml")?;
        Ok(())
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.output_folder)?;
        fs::create_dir_all(&self.build_folder)?;
        Ok(())
    }

    pub fn cache_folder(&self) -> String {
        Path::new(&self.build_folder)
            .join("cache")
            .to_string_lossy()
            .to_string()
    }
}
