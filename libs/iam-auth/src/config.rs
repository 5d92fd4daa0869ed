use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::AuthError;
use crate::redact::REDACTED;
use crate::retry::RetryPolicy;
use crate::secret::SecretString;

/// How client credentials are sent to the token endpoint.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientAuthMethod {
    /// `client_id` and `client_secret` as form fields (RFC 6749 §2.3.1).
    #[default]
    Form,
    /// `Authorization: Basic base64(client_id:client_secret)`.
    Basic,
}

/// Configuration for the client-credentials [`AuthClient`](crate::AuthClient).
///
/// Exactly one of [`token_url`](Self::token_url) or
/// [`issuer_url`](Self::issuer_url) must be set. The config is validated once
/// when the client is built and never changes afterwards.
///
/// `Debug` is manually implemented to redact the secret and header values.
#[derive(Clone)]
pub struct AuthConfig {
    /// Tenant the credentials belong to (diagnostics only).
    pub tenant_id: Option<String>,

    pub client_id: String,

    /// Redacted in `Debug` output, never logged.
    pub client_secret: SecretString,

    /// Direct token endpoint URL (mutually exclusive with `issuer_url`).
    pub token_url: Option<Url>,

    /// OIDC issuer; the token endpoint is resolved from
    /// `{issuer_url}/.well-known/openid-configuration` on first use.
    pub issuer_url: Option<Url>,

    /// Requested scopes. Order and duplicates do not matter.
    pub scopes: Vec<String>,

    pub auth_method: ClientAuthMethod,

    /// Per-request timeout for token endpoint calls (default: 30 s).
    pub timeout: Duration,

    /// Retries after the first attempt in `get_token_with_retry` (default: 2).
    pub max_retries: u32,

    /// Cached tokens expiring within this window are refreshed (default: 30 s).
    pub safety_margin: Duration,

    /// Lifetime assumed when the token response omits `expires_in` (default: 5 min).
    pub default_ttl: Duration,

    /// Extra headers attached to every token request (vendor quirks).
    pub extra_headers: Vec<(String, String)>,

    /// Backoff parameters; `max_attempts` is derived from `max_retries`.
    pub retry: RetryPolicy,

    /// Override for the HTTP client configuration. When `None`,
    /// [`HttpClientConfig::token_endpoint()`](iam_http::HttpClientConfig::token_endpoint)
    /// is used for token calls and the default config for API calls.
    pub http_config: Option<iam_http::HttpClientConfig>,
}

impl AuthConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns a `Configuration` error if credentials are empty, the endpoint
    /// choice is ambiguous or missing, an endpoint is not `https` (plain
    /// `http` is accepted only when the HTTP config allows insecure
    /// transport), the timeout is zero, or the retry policy is invalid.
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.client_id.trim().is_empty() {
            return Err(AuthError::configuration("client_id must not be empty"));
        }
        if self.client_secret.is_empty() {
            return Err(AuthError::configuration("client_secret must not be empty"));
        }
        match (&self.token_url, &self.issuer_url) {
            (Some(_), Some(_)) => {
                return Err(AuthError::configuration(
                    "token_url and issuer_url are mutually exclusive",
                ));
            }
            (None, None) => {
                return Err(AuthError::configuration(
                    "one of token_url or issuer_url must be set",
                ));
            }
            (Some(url), None) => self.check_scheme(url, "token_url")?,
            (None, Some(url)) => self.check_scheme(url, "issuer_url")?,
        }
        if self.timeout.is_zero() {
            return Err(AuthError::configuration("timeout must be greater than zero"));
        }
        self.retry_policy().validate()
    }

    /// Reject non-https URLs unless insecure HTTP is explicitly allowed.
    pub(crate) fn check_scheme(&self, url: &Url, field: &str) -> Result<(), AuthError> {
        match url.scheme() {
            "https" => Ok(()),
            "http" if self.allows_insecure_http() => Ok(()),
            scheme => Err(AuthError::configuration(format!(
                "{field} must use https, got '{scheme}://'"
            ))),
        }
    }

    fn allows_insecure_http(&self) -> bool {
        self.http_config
            .as_ref()
            .is_some_and(|c| c.transport.allows_http())
    }

    /// Retry policy used by `get_token_with_retry`.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries.saturating_add(1),
            ..self.retry.clone()
        }
    }

    /// HTTP config for token endpoint and discovery calls.
    pub(crate) fn token_http_config(&self) -> iam_http::HttpClientConfig {
        let mut config = self
            .http_config
            .clone()
            .unwrap_or_else(iam_http::HttpClientConfig::token_endpoint);
        config.request_timeout = self.timeout;
        config
    }

    /// HTTP config for authenticated API calls.
    pub(crate) fn api_http_config(&self) -> iam_http::HttpClientConfig {
        self.http_config.clone().unwrap_or_default()
    }

    /// Space-joined scope parameter, or `None` when no scopes are requested.
    pub(crate) fn scope_param(&self) -> Option<String> {
        let scopes = normalize_scopes(&self.scopes);
        if scopes.is_empty() {
            None
        } else {
            Some(scopes.join(" "))
        }
    }
}

/// Trim scopes, drop empty entries and duplicates, keep first-seen order.
#[must_use]
pub fn normalize_scopes<S: AsRef<str>>(scopes: &[S]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(scopes.len());
    for scope in scopes {
        let scope = scope.as_ref().trim();
        if !scope.is_empty() && !out.iter().any(|s| s == scope) {
            out.push(scope.to_owned());
        }
    }
    out
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redacted_headers: Vec<_> = self
            .extra_headers
            .iter()
            .map(|(k, _)| (k.as_str(), REDACTED))
            .collect();
        f.debug_struct("AuthConfig")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &REDACTED)
            .field("token_url", &self.token_url)
            .field("issuer_url", &self.issuer_url)
            .field("scopes", &self.scopes)
            .field("auth_method", &self.auth_method)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("safety_margin", &self.safety_margin)
            .field("default_ttl", &self.default_ttl)
            .field("extra_headers", &redacted_headers)
            .field("retry", &self.retry)
            .field("http_config", &self.http_config)
            .finish()
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            tenant_id: None,
            client_id: String::new(),
            client_secret: SecretString::new(String::new()),
            token_url: None,
            issuer_url: None,
            scopes: Vec::new(),
            auth_method: ClientAuthMethod::default(),
            timeout: Duration::from_secs(30),
            max_retries: 2,
            safety_margin: Duration::from_secs(30),
            default_ttl: Duration::from_secs(5 * 60),
            extra_headers: Vec::new(),
            retry: RetryPolicy::default(),
            http_config: None,
        }
    }
}
