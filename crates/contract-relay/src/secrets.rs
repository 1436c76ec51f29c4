//! Model-access credential resolution.
//!
//! The credential is resolved once at startup from the first configured
//! source, in priority order:
//!
//! 1. **Direct value** - for local runs (`credential: { value: "sk-..." }`)
//! 2. **File reference** - mounted secrets (`credential: { file: /run/secrets/model_key }`)
//! 3. **Env var reference** - platform-injected (`credential: { env: MODEL_API_KEY }`)

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No secret source provided (need one of: direct value, file path, or env var name)")]
    NoSourceProvided,

    #[error("Failed to read secret from file '{path}': {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },
}

pub type Result<T> = std::result::Result<T, SecretError>;

/// Where the model-access credential comes from.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CredentialSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<String>,
}

impl CredentialSource {
    pub fn from_env_var(name: &str) -> Self {
        Self {
            env: Some(name.to_string()),
            ..Self::default()
        }
    }

    /// Resolves the credential, `None` when no source is configured.
    pub fn resolve(&self) -> Result<Option<SecretString>> {
        resolve_secret_optional(
            self.value.as_deref(),
            self.file.as_deref(),
            self.env.as_deref(),
        )
    }
}

/// Resolves a secret from the first non-empty source: direct value, then
/// file contents, then environment variable.
pub fn resolve_secret(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<SecretString> {
    if let Some(value) = direct {
        if !value.is_empty() {
            return Ok(SecretString::from(value.to_string()));
        }
    }

    if let Some(path) = file_path {
        if !path.is_empty() {
            let expanded = expand_home(path);
            return match fs::read_to_string(&expanded) {
                Ok(content) => Ok(SecretString::from(content.trim().to_string())),
                Err(e) => Err(SecretError::FileReadError {
                    path: expanded,
                    source: e,
                }),
            };
        }
    }

    if let Some(var_name) = env_var {
        if !var_name.is_empty() {
            return match std::env::var(var_name) {
                // Trim: env vars injected from files often carry a trailing newline
                Ok(value) => Ok(SecretString::from(value.trim())),
                Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
                    name: var_name.to_string(),
                }),
                Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
                    name: var_name.to_string(),
                }),
            };
        }
    }

    Err(SecretError::NoSourceProvided)
}

/// Like [`resolve_secret`], but a missing source is `Ok(None)` instead of an error.
pub fn resolve_secret_optional(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<Option<SecretString>> {
    match resolve_secret(direct, file_path, env_var) {
        Ok(secret) => Ok(Some(secret)),
        Err(SecretError::NoSourceProvided) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Expands a leading `~` to the current user's home directory.
/// `~user/path` is not supported.
fn expand_home(path: &str) -> String {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            let home = home.to_string_lossy();
            if path == "~" {
                return home.into_owned();
            }
            return path.replacen('~', &home, 1);
        }
    }
    path.to_string()
}
