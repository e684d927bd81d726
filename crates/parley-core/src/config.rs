//! Runtime configuration.
//!
//! Credential key material is loaded from environment variables; the secret
//! is redacted in Debug output.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;

use crate::capability::InitOptions;

pub const SDK_KEY_VAR: &str = "PARLEY_SDK_KEY";
pub const SDK_SECRET_VAR: &str = "PARLEY_SDK_SECRET";
pub const TOKEN_TTL_VAR: &str = "PARLEY_TOKEN_TTL_SECONDS";

pub const DEFAULT_TOKEN_TTL_SECONDS: u64 = 2 * 60 * 60;
pub const MIN_TOKEN_TTL_SECONDS: u64 = 30 * 60;
pub const MAX_TOKEN_TTL_SECONDS: u64 = 48 * 60 * 60;

pub const DEFAULT_LOCALE: &str = "en-US";
pub const DEFAULT_REGION: &str = "Global";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid token TTL configuration: {0}")]
    InvalidTokenTtl(String),
}

#[derive(Clone)]
pub struct CredentialConfig {
    pub app_key: String,
    pub app_secret: SecretString,
    pub token_ttl: Duration,
}

impl fmt::Debug for CredentialConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialConfig")
            .field("app_key", &self.app_key)
            .field("app_secret", &"[REDACTED]")
            .field("token_ttl", &self.token_ttl)
            .finish()
    }
}

impl CredentialConfig {
    pub fn new(app_key: impl Into<String>, app_secret: SecretString) -> Self {
        Self {
            app_key: app_key.into(),
            app_secret,
            token_ttl: Duration::from_secs(DEFAULT_TOKEN_TTL_SECONDS),
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let app_key = vars
            .get(SDK_KEY_VAR)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar(SDK_KEY_VAR.to_string()))?
            .clone();

        let app_secret = vars
            .get(SDK_SECRET_VAR)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar(SDK_SECRET_VAR.to_string()))?
            .clone();

        let ttl_seconds = if let Some(value_str) = vars.get(TOKEN_TTL_VAR) {
            let value: u64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidTokenTtl(format!(
                    "{TOKEN_TTL_VAR} must be a valid positive integer, got '{value_str}': {e}"
                ))
            })?;

            if !(MIN_TOKEN_TTL_SECONDS..=MAX_TOKEN_TTL_SECONDS).contains(&value) {
                return Err(ConfigError::InvalidTokenTtl(format!(
                    "{TOKEN_TTL_VAR} must be between {MIN_TOKEN_TTL_SECONDS} and {MAX_TOKEN_TTL_SECONDS}, got {value}"
                )));
            }

            value
        } else {
            DEFAULT_TOKEN_TTL_SECONDS
        };

        Ok(Self {
            app_key,
            app_secret: SecretString::from(app_secret),
            token_ttl: Duration::from_secs(ttl_seconds),
        })
    }
}

/// Parameters for initializing a conferencing client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    pub locale: String,
    pub region: String,
    pub init: InitOptions,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            locale: DEFAULT_LOCALE.to_string(),
            region: DEFAULT_REGION.to_string(),
            init: InitOptions::default(),
        }
    }
}
