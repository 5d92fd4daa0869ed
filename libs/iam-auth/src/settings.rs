//! File and environment based configuration for [`AuthClient`](crate::AuthClient).
//!
//! Sources, lowest to highest priority:
//! 1. Built-in defaults
//! 2. Optional YAML file
//! 3. Environment variables prefixed with `IAM_AUTH_` (nested keys use `__`)
//!
//! Durations are humantime strings (`"30s"`, `"5m"`).

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::{AuthConfig, ClientAuthMethod};
use crate::error::AuthError;
use crate::retry::RetryPolicy;
use crate::secret::SecretString;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "IAM_AUTH_";

/// Serializable shape of [`AuthConfig`].
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    pub tenant_id: Option<String>,
    pub client_id: String,
    #[serde(skip_serializing)]
    pub client_secret: SecretString,
    pub token_url: Option<String>,
    pub issuer_url: Option<String>,
    pub scopes: Vec<String>,
    pub auth_method: ClientAuthMethod,
    pub timeout: String,
    pub max_retries: u32,
    /// Backoff before the first retry.
    pub base_delay: String,
    /// Cap for the exponential backoff.
    pub max_delay: String,
    pub multiplier: f64,
    /// Apply ±10% random jitter to backoff delays.
    pub jitter: bool,
    pub safety_margin: String,
    pub default_ttl: String,
    pub extra_headers: BTreeMap<String, String>,
    /// Accept `http://` endpoints (local mock servers only).
    pub allow_insecure_http: bool,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            tenant_id: None,
            client_id: String::new(),
            client_secret: SecretString::default(),
            token_url: None,
            issuer_url: None,
            scopes: Vec::new(),
            auth_method: ClientAuthMethod::default(),
            timeout: "30s".to_owned(),
            max_retries: 2,
            base_delay: "500ms".to_owned(),
            max_delay: "30s".to_owned(),
            multiplier: 2.0,
            jitter: true,
            safety_margin: "30s".to_owned(),
            default_ttl: "5m".to_owned(),
            extra_headers: BTreeMap::new(),
            allow_insecure_http: false,
        }
    }
}

impl std::fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSettings")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret)
            .field("token_url", &self.token_url)
            .field("issuer_url", &self.issuer_url)
            .field("scopes", &self.scopes)
            .finish_non_exhaustive()
    }
}

impl AuthSettings {
    /// Load settings from defaults, an optional YAML file and the environment.
    ///
    /// # Errors
    ///
    /// Returns a `Configuration` error if a source cannot be read or a value
    /// has the wrong type.
    pub fn load(path: Option<&Path>) -> Result<Self, AuthError> {
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            tracing::debug!(path = %path.display(), "loading auth settings file");
            figment = figment.merge(Yaml::file(path));
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        figment
            .extract()
            .map_err(|e| AuthError::configuration(format!("invalid auth settings: {e}")))
    }

    /// Convert into a validated [`AuthConfig`].
    ///
    /// # Errors
    ///
    /// Returns a `Configuration` error for unparsable URLs or durations, or
    /// when [`AuthConfig::validate`] rejects the result.
    pub fn into_config(self) -> Result<AuthConfig, AuthError> {
        let http_config = self.allow_insecure_http.then(|| iam_http::HttpClientConfig {
            transport: iam_http::TransportSecurity::AllowInsecureHttp,
            ..iam_http::HttpClientConfig::default()
        });

        let config = AuthConfig {
            tenant_id: self.tenant_id,
            client_id: self.client_id,
            client_secret: self.client_secret,
            token_url: parse_url(self.token_url.as_deref(), "token_url")?,
            issuer_url: parse_url(self.issuer_url.as_deref(), "issuer_url")?,
            scopes: self.scopes,
            auth_method: self.auth_method,
            timeout: parse_duration(&self.timeout, "timeout")?,
            max_retries: self.max_retries,
            safety_margin: parse_duration(&self.safety_margin, "safety_margin")?,
            default_ttl: parse_duration(&self.default_ttl, "default_ttl")?,
            extra_headers: self.extra_headers.into_iter().collect(),
            http_config,
            retry: RetryPolicy {
                base_delay: parse_duration(&self.base_delay, "base_delay")?,
                max_delay: parse_duration(&self.max_delay, "max_delay")?,
                multiplier: self.multiplier,
                jitter: self.jitter,
                ..RetryPolicy::default()
            },
        };
        config.validate()?;
        Ok(config)
    }
}

fn parse_url(raw: Option<&str>, field: &str) -> Result<Option<Url>, AuthError> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            Url::parse(s)
                .map_err(|e| AuthError::configuration(format!("{field}: invalid URL: {e}")))
        })
        .transpose()
}

fn parse_duration(raw: &str, field: &str) -> Result<Duration, AuthError> {
    humantime::parse_duration(raw.trim())
        .map_err(|e| AuthError::configuration(format!("{field}: invalid duration '{raw}': {e}")))
}
