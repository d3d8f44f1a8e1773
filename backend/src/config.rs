use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

const DEFAULT_CONFIG_PATH: &str = "config/service.yaml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("Invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub model_path: PathBuf,
    pub results_dir: PathBuf,
    pub result_ttl_secs: u64,
    pub max_upload_bytes: usize,
    pub require_model: bool,
    pub workers: Option<usize>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            model_path: PathBuf::from("ml_zentro/zentro_rf_pipeline.json"),
            results_dir: std::env::temp_dir().join("credit-risk-results"),
            result_ttl_secs: 3600,
            max_upload_bytes: 10 * 1024 * 1024,
            require_model: true,
            workers: None,
        }
    }
}

impl ServiceConfig {
    /// Load the YAML file named by `CONFIG_PATH` (if it exists), then apply
    /// environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = if Path::new(&path).exists() {
            Self::from_file(&path)?
        } else {
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        Self::from_yaml(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }

    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(raw)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("PORT") {
            self.port = parse_value("PORT", port)?;
        }
        if let Some(path) = lookup("MODEL_PATH") {
            self.model_path = PathBuf::from(path);
        }
        if let Some(dir) = lookup("RESULTS_DIR") {
            self.results_dir = PathBuf::from(dir);
        }
        if let Some(ttl) = lookup("RESULT_TTL_SECS") {
            self.result_ttl_secs = parse_value("RESULT_TTL_SECS", ttl)?;
        }
        if let Some(limit) = lookup("MAX_UPLOAD_BYTES") {
            self.max_upload_bytes = parse_value("MAX_UPLOAD_BYTES", limit)?;
        }
        if let Some(require) = lookup("REQUIRE_MODEL") {
            self.require_model = parse_value("REQUIRE_MODEL", require)?;
        }
        if let Some(workers) = lookup("WORKERS") {
            self.workers = Some(parse_value("WORKERS", workers)?);
        }
        Ok(())
    }

    pub fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_secs)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_value<T: FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue { key, value })
}
