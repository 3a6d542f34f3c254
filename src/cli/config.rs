use std::path::Path;
use std::time::Duration;

use anyhow::{Context as _, Result};
use serde::Deserialize;

use crate::engine::types::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};

pub const DEFAULT_ENGINE_URL: &str = "http://localhost:8000/api";
pub const DEFAULT_TIMEOUT_S: u64 = 30;
const CONFIG_FILE: &str = "procflow.yaml";

/// Configuration loaded from `procflow.yaml`.
/// Every field is optional; flags and environment take precedence.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ProcflowConfig {
    pub engine_url: Option<String>,
    pub api_token: Option<String>,
    pub timeout_s: Option<u64>,
    pub page_size: Option<u32>,
}

impl ProcflowConfig {
    /// Load configuration from a YAML file.
    ///
    /// - If `path` is `Some`, load that specific file (error if missing).
    /// - If `path` is `None`, auto-detect `procflow.yaml` in cwd; return defaults if absent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file_path = match path {
            Some(p) => {
                if !p.exists() {
                    anyhow::bail!("Config file not found: {}", p.display());
                }
                p.to_path_buf()
            }
            None => {
                let default_path = Path::new(CONFIG_FILE);
                if !default_path.exists() {
                    return Ok(Self::default());
                }
                default_path.to_path_buf()
            }
        };

        let contents = std::fs::read_to_string(&file_path)
            .with_context(|| format!("Failed to read config file: {}", file_path.display()))?;

        let config: ProcflowConfig = serde_yml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", file_path.display()))?;

        Ok(config)
    }

    /// Merge explicit settings over this file's values and fill defaults.
    pub fn resolve(&self, overrides: Overrides) -> Settings {
        let page_size = overrides
            .page_size
            .or(self.page_size)
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);

        Settings {
            engine_url: overrides
                .engine_url
                .or_else(|| self.engine_url.clone())
                .unwrap_or_else(|| DEFAULT_ENGINE_URL.to_string()),
            api_token: overrides.api_token.or_else(|| self.api_token.clone()),
            timeout: Duration::from_secs(
                overrides
                    .timeout_s
                    .or(self.timeout_s)
                    .unwrap_or(DEFAULT_TIMEOUT_S),
            ),
            page_size,
        }
    }
}

/// Values given on the command line or through the environment.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub engine_url: Option<String>,
    pub api_token: Option<String>,
    pub timeout_s: Option<u64>,
    pub page_size: Option<u32>,
}

/// Fully resolved client settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub engine_url: String,
    pub api_token: Option<String>,
    pub timeout: Duration,
    pub page_size: u32,
}
