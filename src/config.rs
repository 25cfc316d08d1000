use crate::error::AppError;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub lookups: LookupConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_concurrent_requests: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LookupConfig {
    pub timeout_ms: u64,
    pub rdap_base_url: String,
    /// Path to a public suffix list file. The built-in list is used when unset.
    pub public_suffix_list: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub blocklist_path: String,
    pub redis_url: Option<String>,
    pub feedback_key_prefix: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_concurrent_requests: 1000,
        }
    }
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            rdap_base_url: "https://rdap.org".to_string(),
            public_suffix_list: None,
        }
    }
}

impl LookupConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: "model/netra-model.json".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            blocklist_path: "blocked_sites.txt".to_string(),
            redis_url: None,
            feedback_key_prefix: "netra:feedback".to_string(),
        }
    }
}

impl Config {
    /// Layers `netra.toml` (optional) under `NETRA__*` environment variables.
    pub fn load() -> Result<Self, AppError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("netra").required(false))
            .add_source(
                config::Environment::with_prefix("NETRA")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
