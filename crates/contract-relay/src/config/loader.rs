use std::path::{Path, PathBuf};

use crate::config::schema::WorkerConfig;
use crate::error::ConfigError;

pub const ENV_BUCKET_NAME: &str = "RELAY_BUCKET_NAME";
pub const ENV_NOTIFICATION_URL: &str = "RELAY_NOTIFICATION_URL";
pub const ENV_OUTPUT_DIR: &str = "RELAY_OUTPUT_DIR";
pub const ENV_WORKER_COUNT: &str = "RELAY_WORKER_COUNT";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Yaml,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ConfigFormat::Json,
            _ => ConfigFormat::Yaml,
        }
    }
}

/// Loads the worker configuration from a file, applies environment
/// overrides and validates the result.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<WorkerConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut config = parse_config(&content, ConfigFormat::from_path(path))?;
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    validate_config(&config)?;
    Ok(config)
}

/// Builds the configuration from defaults and the environment alone.
pub fn load_config_from_env() -> Result<WorkerConfig, ConfigError> {
    let mut config = WorkerConfig::default();
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    validate_config(&config)?;
    Ok(config)
}

pub fn load_config_from_str(content: &str, format: ConfigFormat) -> Result<WorkerConfig, ConfigError> {
    let config = parse_config(content, format)?;
    validate_config(&config)?;
    Ok(config)
}

fn parse_config(content: &str, format: ConfigFormat) -> Result<WorkerConfig, ConfigError> {
    let config = match format {
        ConfigFormat::Json => serde_json::from_str(content)?,
        ConfigFormat::Yaml => serde_yaml::from_str(content)?,
    };
    Ok(config)
}

/// Environment values win over file values. Empty values are ignored.
pub fn apply_env_overrides<F>(config: &mut WorkerConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let lookup = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(bucket) = lookup(ENV_BUCKET_NAME) {
        config.bucket_name = bucket.trim().to_string();
    }
    if let Some(url) = lookup(ENV_NOTIFICATION_URL) {
        config.notification.url = Some(url.trim().to_string());
    }
    if let Some(dir) = lookup(ENV_OUTPUT_DIR) {
        config.output_directory = PathBuf::from(dir.trim());
    }
    if let Some(count) = lookup(ENV_WORKER_COUNT) {
        config.worker_count = count
            .trim()
            .parse()
            .map_err(|e: std::num::ParseIntError| ConfigError::InvalidEnv {
                name: ENV_WORKER_COUNT.to_string(),
                reason: e.to_string(),
            })?;
    }

    Ok(())
}

pub fn validate_config(config: &WorkerConfig) -> Result<(), ConfigError> {
    // A worker without a destination bucket cannot produce evidence keys
    if config.bucket_name.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: format!(
                "bucket_name is required (set it in the config file or via {})",
                ENV_BUCKET_NAME
            ),
        });
    }

    if config.worker_count == 0 {
        return Err(ConfigError::Validation {
            message: "worker_count must be at least 1".to_string(),
        });
    }

    if config.queue.max_receive_count == 0 {
        return Err(ConfigError::Validation {
            message: "queue.max_receive_count must be at least 1".to_string(),
        });
    }

    if config.queue.visibility_timeout() <= config.queue.invocation_timeout() {
        return Err(ConfigError::Validation {
            message: format!(
                "queue.visibility_timeout_secs ({}) must exceed queue.invocation_timeout_secs ({})",
                config.queue.visibility_timeout_secs, config.queue.invocation_timeout_secs
            ),
        });
    }

    if config.notification.max_attempts == 0 {
        return Err(ConfigError::Validation {
            message: "notification.max_attempts must be at least 1".to_string(),
        });
    }

    if config.extraction.passes.is_empty() {
        return Err(ConfigError::Validation {
            message: "extraction.passes must name at least one pass".to_string(),
        });
    }

    if config.extraction.evidence_concurrency == 0 {
        return Err(ConfigError::Validation {
            message: "extraction.evidence_concurrency must be at least 1".to_string(),
        });
    }

    Ok(())
}
