//! # Configuration
//!
//! Backend credentials and request policy for the sync layer. Settings come
//! from a YAML file, the environment, or both; credentials missing from the
//! file are filled in from `SUPABASE_URL` / `SUPABASE_ANON_KEY`, or from the
//! `NEXT_PUBLIC_` prefixed names older deployments still export.
//!
//! A configuration without credentials is valid: the engine built from it is
//! inert and answers every operation with a configuration error.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

pub const URL_ENV: &str = "SUPABASE_URL";
pub const ANON_KEY_ENV: &str = "SUPABASE_ANON_KEY";
/// Read when the unprefixed name is unset
pub const PUBLIC_URL_ENV: &str = "NEXT_PUBLIC_SUPABASE_URL";
pub const PUBLIC_ANON_KEY_ENV: &str = "NEXT_PUBLIC_SUPABASE_ANON_KEY";

/// Written as the file reference of documents whose upload is handled elsewhere
pub const DEFAULT_DOCUMENT_PLACEHOLDER_URL: &str = "https://placeholder.com/document.pdf";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub url: Option<String>,
    pub anon_key: Option<String>,
}

impl BackendConfig {
    pub fn new(url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            anon_key: Some(anon_key.into()),
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            url: lookup(URL_ENV).or_else(|| lookup(PUBLIC_URL_ENV)),
            anon_key: lookup(ANON_KEY_ENV).or_else(|| lookup(PUBLIC_ANON_KEY_ENV)),
        }
    }

    /// Both the URL and the anonymous key are present and non-blank
    pub fn is_configured(&self) -> bool {
        let present = |value: &Option<String>| value.as_deref().is_some_and(|v| !v.trim().is_empty());
        present(&self.url) && present(&self.anon_key)
    }

    fn fill_missing_from(&mut self, other: BackendConfig) {
        if self.url.is_none() {
            self.url = other.url;
        }
        if self.anon_key.is_none() {
            self.anon_key = other.anon_key;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub backend: BackendConfig,
    /// Upper bound for any single remote call
    pub request_timeout_ms: u64,
    /// Extra attempts for queries that timed out or could not reach the backend
    pub query_retries: u32,
    pub retry_backoff_ms: u64,
    pub document_placeholder_url: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            request_timeout_ms: 10_000,
            query_retries: 2,
            retry_backoff_ms: 250,
            document_placeholder_url: DEFAULT_DOCUMENT_PLACEHOLDER_URL.to_string(),
        }
    }
}

impl SyncConfig {
    pub fn with_backend(backend: BackendConfig) -> Self {
        Self {
            backend,
            ..Self::default()
        }
    }

    pub fn from_env() -> Self {
        let config = Self::with_backend(BackendConfig::from_env());
        if !config.backend.is_configured() {
            warn!("{} / {} not set; sync layer will be inert", URL_ENV, ANON_KEY_ENV);
        }
        config
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: SyncConfig = serde_yaml::from_str(yaml).context("invalid sync configuration")?;
        Ok(config)
    }

    /// Read a YAML file, then let the environment supply missing credentials
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let mut config = Self::from_yaml_str(&yaml)?;
        config.backend.fill_missing_from(BackendConfig::from_env());

        info!(
            "Loaded sync configuration from {} (configured: {})",
            path.display(),
            config.backend.is_configured()
        );
        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}
