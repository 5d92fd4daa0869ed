use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use thiserror::Error;

use crate::redact::redact;

type SharedSource = Arc<dyn std::error::Error + Send + Sync>;

/// Failure category of an [`AuthError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum AuthErrorKind {
    /// Invalid client configuration (missing credentials, bad URL).
    Configuration,
    /// OIDC discovery endpoint unreachable or document malformed.
    Discovery,
    /// The authorization server rejected the client credentials or request.
    Credentials,
    /// No HTTP response: connect failure, timeout, 408.
    Network,
    /// 5xx from the authorization server.
    ServerError,
    /// 429 from the authorization server.
    RateLimit,
    /// A downstream API rejected a freshly acquired token.
    TokenExpired,
    /// Anything else (malformed token response, unexpected status).
    Unknown,
}

impl AuthErrorKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Discovery => "discovery",
            Self::Credentials => "credentials",
            Self::Network => "network",
            Self::ServerError => "server_error",
            Self::RateLimit => "rate_limit",
            Self::TokenExpired => "token_expired",
            Self::Unknown => "unknown",
        }
    }

    /// Whether errors of this kind are worth retrying by default.
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(
            self,
            Self::Network | Self::ServerError | Self::RateLimit | Self::TokenExpired
        )
    }
}

impl fmt::Display for AuthErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by every fallible [`AuthClient`](crate::AuthClient) operation.
///
/// The message is redacted at construction, so `Display` never exposes
/// secrets or tokens. Errors are cheap to clone; concurrent callers waiting on
/// the same token request all receive a copy of the same error.
#[derive(Clone, Error)]
#[error("{kind} error: {message}")]
pub struct AuthError {
    kind: AuthErrorKind,
    message: String,
    #[source]
    source: Option<SharedSource>,
    retryable: bool,
    retry_after: Option<Duration>,
    status: Option<StatusCode>,
    oauth_error: Option<String>,
}

impl AuthError {
    /// Create an error with the kind's default retryability.
    pub fn new(kind: AuthErrorKind, message: impl AsRef<str>) -> Self {
        Self {
            kind,
            message: redact(message.as_ref()).into_owned(),
            source: None,
            retryable: kind.is_transient(),
            retry_after: None,
            status: None,
            oauth_error: None,
        }
    }

    pub fn configuration(message: impl AsRef<str>) -> Self {
        Self::new(AuthErrorKind::Configuration, message)
    }

    pub fn discovery(message: impl AsRef<str>) -> Self {
        Self::new(AuthErrorKind::Discovery, message)
    }

    pub fn credentials(message: impl AsRef<str>) -> Self {
        Self::new(AuthErrorKind::Credentials, message)
    }

    pub fn network(message: impl AsRef<str>) -> Self {
        Self::new(AuthErrorKind::Network, message)
    }

    pub fn server_error(message: impl AsRef<str>) -> Self {
        Self::new(AuthErrorKind::ServerError, message)
    }

    /// Rate-limit error honouring the server's cooldown.
    pub fn rate_limit(message: impl AsRef<str>, retry_after: Duration) -> Self {
        Self::new(AuthErrorKind::RateLimit, message).with_retry_after(retry_after)
    }

    pub fn token_expired(message: impl AsRef<str>) -> Self {
        Self::new(AuthErrorKind::TokenExpired, message)
    }

    pub fn unknown(message: impl AsRef<str>) -> Self {
        Self::new(AuthErrorKind::Unknown, message)
    }

    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    #[must_use]
    pub(crate) fn with_boxed_source(
        mut self,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        self.source = Some(Arc::from(source));
        self
    }

    #[must_use]
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    #[must_use]
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn with_oauth_error(mut self, code: impl Into<String>) -> Self {
        self.oauth_error = Some(code.into());
        self
    }

    #[must_use]
    pub fn kind(&self) -> AuthErrorKind {
        self.kind
    }

    /// Redacted human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// Server-specified cooldown, if any.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    /// HTTP status that produced the error, when there was a response.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// OAuth `error` code from the response body (`invalid_client`, ...).
    #[must_use]
    pub fn oauth_error(&self) -> Option<&str> {
        self.oauth_error.as_deref()
    }
}

/// Source errors are rendered through [`redact`] as well.
impl fmt::Debug for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = self.source.as_ref().map(|s| redact(&s.to_string()).into_owned());
        f.debug_struct("AuthError")
            .field("kind", &self.kind)
            .field("message", &self.message)
            .field("source", &source)
            .field("retryable", &self.retryable)
            .field("retry_after", &self.retry_after)
            .field("status", &self.status)
            .field("oauth_error", &self.oauth_error)
            .finish()
    }
}
