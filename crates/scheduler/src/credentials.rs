//! Platform credential lookup

use std::collections::HashMap;

use async_trait::async_trait;
use leadflow_core_types::Credentials;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("no credentials configured for platform '{platform}'")]
    NotFound { platform: String },

    #[error("credential backend failure: {0}")]
    Backend(String),
}

/// Supplies the login for a platform. Implementations must never log the
/// password.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn credentials(&self, platform: &str) -> Result<Credentials, CredentialError>;
}

/// Fixed credentials per platform.
#[derive(Clone, Debug, Default)]
pub struct StaticCredentialProvider {
    entries: HashMap<String, Credentials>,
}

impl StaticCredentialProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, platform: impl Into<String>, credentials: Credentials) -> Self {
        self.entries.insert(platform.into(), credentials);
        self
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn credentials(&self, platform: &str) -> Result<Credentials, CredentialError> {
        self.entries
            .get(platform)
            .cloned()
            .ok_or_else(|| CredentialError::NotFound {
                platform: platform.to_string(),
            })
    }
}

/// Reads `<PREFIX>_<PLATFORM>_USERNAME` and `<PREFIX>_<PLATFORM>_PASSWORD`.
///
/// The platform is upper-cased and every non-alphanumeric character becomes
/// `_`, so `acme-life` looks up `LEADFLOW_ACME_LIFE_USERNAME`.
#[derive(Clone, Debug)]
pub struct EnvCredentialProvider {
    prefix: String,
}

impl EnvCredentialProvider {
    pub const DEFAULT_PREFIX: &'static str = "LEADFLOW";

    pub fn new() -> Self {
        Self::with_prefix(Self::DEFAULT_PREFIX)
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn variable(&self, platform: &str, suffix: &str) -> String {
        let platform: String = platform
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("{}_{}_{}", self.prefix, platform, suffix)
    }
}

impl Default for EnvCredentialProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialProvider for EnvCredentialProvider {
    async fn credentials(&self, platform: &str) -> Result<Credentials, CredentialError> {
        let username = std::env::var(self.variable(platform, "USERNAME"));
        let password = std::env::var(self.variable(platform, "PASSWORD"));
        match (username, password) {
            (Ok(username), Ok(password)) => Ok(Credentials::new(username, password)),
            _ => Err(CredentialError::NotFound {
                platform: platform.to_string(),
            }),
        }
    }
}
