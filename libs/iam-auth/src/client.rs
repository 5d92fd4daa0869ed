use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::Instrument;
use url::Url;

use crate::builder_ext::HttpClientBuilderExt;
use crate::classify;
use crate::config::AuthConfig;
use crate::discovery::discover_token_endpoint;
use crate::error::AuthError;
use crate::retry::RetryPolicy;
use crate::source::TokenSource;
use crate::token::Token;

/// Token cache guarded by [`Inner::state`].
struct CacheState {
    token: Option<Token>,
    /// Outcome of the most recent failed fetch, handed to callers that were
    /// waiting on that fetch.
    last_failure: Option<AuthError>,
    /// Token endpoint, resolved via discovery on first use when needed.
    endpoint: Option<Url>,
}

struct Inner {
    config: AuthConfig,
    source: TokenSource,
    state: Mutex<CacheState>,
    /// Completed token requests (success or failure).
    fetches: AtomicU64,
}

/// `OAuth2` client-credentials authentication client.
///
/// Acquires tokens lazily, caches them until they come within the safety
/// margin of expiry, and hands out HTTP clients that attach
/// `Authorization: Bearer <token>` to every request.
///
/// Concurrent [`get_token`](Self::get_token) calls facing an empty or stale
/// cache are coalesced: the cache lock is held across the token request, so
/// only one request reaches the token endpoint and every waiting caller gets
/// its result (the same token, or the same error).
///
/// `AuthClient` is `Clone + Send + Sync`; clones share one cache.
///
/// ```ignore
/// let client = AuthClient::new(config)?;
/// let api = client.http_client_with_retry()?;
/// let resp = api.get("https://iam.example.com/v1/groups").send().await?;
/// ```
#[derive(Clone)]
pub struct AuthClient {
    inner: Arc<Inner>,
}

impl fmt::Debug for AuthClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthClient")
            .field("tenant_id", &self.inner.config.tenant_id)
            .field("client_id", &self.inner.config.client_id)
            .finish_non_exhaustive()
    }
}

impl AuthClient {
    /// Create a client. No network call is made until a token is needed.
    ///
    /// Must be called inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns a `Configuration` error if the config is invalid or the
    /// internal HTTP client cannot be built.
    pub fn new(config: AuthConfig) -> Result<Self, AuthError> {
        config.validate()?;
        let source = TokenSource::new(&config)?;

        tracing::debug!(
            tenant_id = config.tenant_id.as_deref().unwrap_or("-"),
            client_id = %config.client_id,
            discovery = config.issuer_url.is_some(),
            "OAuth2 auth client configured"
        );

        let state = CacheState {
            token: None,
            last_failure: None,
            endpoint: config.token_url.clone(),
        };

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                source,
                state: Mutex::new(state),
                fetches: AtomicU64::new(0),
            }),
        })
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.inner.config
    }

    /// Return a valid token, fetching a new one if the cache is empty or the
    /// cached token is within the safety margin of expiry.
    ///
    /// No internal retry; see [`get_token_with_retry`](Self::get_token_with_retry).
    /// Dropping the future aborts an in-flight request and releases the lock.
    ///
    /// # Errors
    ///
    /// Returns the classified [`AuthError`] of the token request.
    pub async fn get_token(&self) -> Result<Token, AuthError> {
        let observed = self.inner.fetches.load(Ordering::Acquire);
        let mut state = self.inner.state.lock().await;

        if let Some(token) = state
            .token
            .as_ref()
            .filter(|t| t.is_fresh_at(OffsetDateTime::now_utc(), self.inner.config.safety_margin))
        {
            tracing::trace!("token cache hit");
            return Ok(token.clone());
        }

        // A fetch finished while we waited for the lock and failed: share its
        // error instead of hitting the endpoint again.
        if self.inner.fetches.load(Ordering::Acquire) != observed
            && let Some(err) = state.last_failure.as_ref()
        {
            return Err(err.clone());
        }

        tracing::debug!("token cache miss");
        self.fetch_locked(&mut state).await
    }

    /// [`get_token`](Self::get_token) driven by the configured [`RetryPolicy`].
    ///
    /// # Errors
    ///
    /// Returns the last error once the policy stops retrying.
    pub async fn get_token_with_retry(&self) -> Result<Token, AuthError> {
        self.retry_policy().retry(|| self.get_token()).await
    }

    /// Effective retry policy (see [`AuthConfig::retry_policy`]).
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        self.inner.config.retry_policy()
    }

    /// Local validity check: `now < expires_at`. No network call.
    ///
    /// # Errors
    ///
    /// Never fails today; the `Result` is kept for remote introspection.
    #[allow(clippy::unnecessary_wraps, clippy::unused_self)]
    pub fn validate_token(&self, token: &Token) -> Result<bool, AuthError> {
        Ok(token.is_valid_at(OffsetDateTime::now_utc()))
    }

    /// Currently cached token, without any network call.
    pub async fn cached_token(&self) -> Option<Token> {
        self.inner.state.lock().await.token.clone()
    }

    /// Drop the cached token; the next [`get_token`](Self::get_token) fetches.
    pub async fn invalidate(&self) {
        let mut state = self.inner.state.lock().await;
        if state.token.take().is_some() {
            tracing::debug!("cached token invalidated");
        }
    }

    /// Fetch a new token even if the cached one is still fresh.
    ///
    /// # Errors
    ///
    /// Returns the classified [`AuthError`] of the token request. The cached
    /// token is left untouched on failure.
    pub async fn force_refresh(&self) -> Result<Token, AuthError> {
        let mut state = self.inner.state.lock().await;
        self.fetch_locked(&mut state).await
    }

    /// Replace a token a downstream API rejected.
    ///
    /// If another caller already swapped in a different fresh token, that one
    /// is returned without a new request.
    pub(crate) async fn refresh_rejected(&self, rejected: &Token) -> Result<Token, AuthError> {
        let mut state = self.inner.state.lock().await;

        if let Some(current) = state.token.as_ref()
            && !current.same_credential(rejected)
            && current.is_fresh_at(OffsetDateTime::now_utc(), self.inner.config.safety_margin)
        {
            return Ok(current.clone());
        }

        state.token = None;
        self.fetch_locked(&mut state).await
    }

    /// [`refresh_rejected`](Self::refresh_rejected) driven by the configured
    /// [`RetryPolicy`].
    pub(crate) async fn refresh_rejected_with_retry(
        &self,
        rejected: &Token,
    ) -> Result<Token, AuthError> {
        self.retry_policy().retry(|| self.refresh_rejected(rejected)).await
    }

    /// HTTP client attaching `Authorization: Bearer <token>` to every request.
    ///
    /// Tokens are acquired through [`get_token_with_retry`](Self::get_token_with_retry).
    /// Must be called inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns a `Configuration` error if the HTTP client cannot be built.
    pub fn http_client(&self) -> Result<iam_http::HttpClient, AuthError> {
        iam_http::HttpClientBuilder::with_config(self.inner.config.api_http_config())
            .with_auth_client(self.clone())
            .build()
            .map_err(|e| classify::from_http_error(e, "API client").with_retryable(false))
    }

    /// Like [`http_client`](Self::http_client), but a 401 response forces one
    /// token refresh and replays the request once. The replayed response is
    /// returned as is, whatever its status.
    ///
    /// # Errors
    ///
    /// Returns a `Configuration` error if the HTTP client cannot be built.
    pub fn http_client_with_retry(&self) -> Result<iam_http::HttpClient, AuthError> {
        iam_http::HttpClientBuilder::with_config(self.inner.config.api_http_config())
            .with_auth_client_retry(self.clone())
            .build()
            .map_err(|e| classify::from_http_error(e, "API client").with_retryable(false))
    }

    /// Run one token request while holding the cache lock and record its outcome.
    async fn fetch_locked(&self, state: &mut CacheState) -> Result<Token, AuthError> {
        let config = &self.inner.config;
        let span = tracing::info_span!(
            "oauth2_token_request",
            tenant_id = config.tenant_id.as_deref().unwrap_or("-"),
            client_id = %config.client_id
        );

        let result = async {
            let endpoint = self.resolve_endpoint(state).await?;
            self.inner.source.request_token(&endpoint).await
        }
        .instrument(span.clone())
        .await;

        self.inner.fetches.fetch_add(1, Ordering::AcqRel);
        let _entered = span.enter();

        match result {
            Ok(token) => {
                tracing::info!(
                    expires_at = %token.expires_at(),
                    scope = token.scope().unwrap_or(""),
                    "acquired access token"
                );
                state.token = Some(token.clone());
                state.last_failure = None;
                Ok(token)
            }
            Err(err) => {
                tracing::warn!(
                    kind = %err.kind(),
                    retryable = err.is_retryable(),
                    error = %err,
                    "token request failed"
                );
                state.last_failure = Some(err.clone());
                Err(err)
            }
        }
    }

    async fn resolve_endpoint(&self, state: &mut CacheState) -> Result<Url, AuthError> {
        if let Some(ref endpoint) = state.endpoint {
            return Ok(endpoint.clone());
        }

        let issuer = self
            .inner
            .config
            .issuer_url
            .as_ref()
            .ok_or_else(|| AuthError::configuration("one of token_url or issuer_url must be set"))?;

        let endpoint = discover_token_endpoint(self.inner.source.http_client(), issuer).await?;
        self.inner
            .config
            .check_scheme(&endpoint, "discovered token_endpoint")?;

        tracing::info!(token_endpoint = %endpoint, "resolved token endpoint via OIDC discovery");
        state.endpoint = Some(endpoint.clone());
        Ok(endpoint)
    }
}
