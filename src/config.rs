//! Application configuration.
//!
//! Loaded from a TOML secrets file (`secret.toml` unless `SNAPCODE_CONFIG`
//! points elsewhere). A missing file or missing keys fall back to defaults;
//! empty API keys are passed through and rejected by the services upstream.
//! `OCR_API_KEY`, `LLM_API_KEY` and `BIND_ADDR` override the file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

pub const DEFAULT_CONFIG_PATH: &str = "secret.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// OCR.space API key.
    pub apikey: String,
    /// LLM API key.
    pub api_key: String,
    pub server: ServerConfig,
    pub ocr: OcrConfig,
    pub llm: LlmConfig,
    pub sandbox: SandboxConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_string(),
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}

/// OCR.space request settings. Optional fields are only sent when set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    pub endpoint: String,
    pub language: Option<String>,
    /// OCR.space engine number (1, 2 or 3).
    pub engine: Option<u8>,
    pub scale: Option<bool>,
    pub detect_orientation: Option<bool>,
    pub timeout_secs: Option<u64>,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.ocr.space/parse/image".to_string(),
            language: None,
            engine: None,
            scale: None,
            detect_orientation: None,
            timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub endpoint: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout_secs: Option<u64>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://openrouter.ai/api/v1/chat/completions".to_string(),
            model: "google/gemini-2.0-flash-001".to_string(),
            max_tokens: 4096,
            timeout_secs: None,
        }
    }
}

/// How corrected code is run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub interpreter: String,
    pub args: Vec<String>,
    /// Extension of the snippet file handed to the interpreter.
    pub file_extension: String,
    pub timeout_secs: u64,
    pub max_output_bytes: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
            args: vec!["-I".to_string()],
            file_extension: "py".to_string(),
            timeout_secs: 10,
            max_output_bytes: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub idle_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 3600,
        }
    }
}

impl AppConfig {
    /// Load from `SNAPCODE_CONFIG` (or `secret.toml`) and apply env overrides.
    pub fn load() -> Result<Self> {
        let path = std::env::var("SNAPCODE_CONFIG")
            .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = Self::load_from_file(Path::new(&path))?;
        config.apply_env();
        Ok(config)
    }

    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!("Config file {:?} not found, using defaults (API keys empty)", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {:?}", path))?;
        let config = Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config: {:?}", path))?;

        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    fn apply_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Override file values with whatever `lookup` returns for
    /// `OCR_API_KEY`, `LLM_API_KEY` and `BIND_ADDR`.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("OCR_API_KEY") {
            self.apikey = key;
        }
        if let Some(key) = lookup("LLM_API_KEY") {
            self.api_key = key;
        }
        if let Some(bind) = lookup("BIND_ADDR") {
            self.server.bind = bind;
        }
    }

    pub fn ocr_api_key(&self) -> &str {
        &self.apikey
    }

    pub fn llm_api_key(&self) -> &str {
        &self.api_key
    }
}
