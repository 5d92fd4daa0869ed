use std::fmt;
use std::time::Duration;

use http::HeaderValue;
use serde::Deserialize;
use time::OffsetDateTime;

use crate::secret::SecretString;

/// Upper bound applied to `expires_in` so expiry arithmetic cannot overflow.
const MAX_LIFETIME: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// An `OAuth2` access token with its absolute expiry.
///
/// A token is usable only while `now < expires_at`. `Debug` never prints the
/// access token itself.
#[derive(Clone)]
pub struct Token {
    access_token: SecretString,
    token_type: String,
    issued_at: OffsetDateTime,
    expires_at: OffsetDateTime,
    scope: Option<String>,
}

impl Token {
    /// Create a bearer token valid for `lifetime` from `issued_at`.
    pub fn new(
        access_token: impl Into<SecretString>,
        issued_at: OffsetDateTime,
        lifetime: Duration,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: "Bearer".to_owned(),
            issued_at,
            expires_at: expiry_after(issued_at, lifetime),
            scope: None,
        }
    }

    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    #[must_use]
    pub fn access_token(&self) -> &SecretString {
        &self.access_token
    }

    #[must_use]
    pub fn token_type(&self) -> &str {
        &self.token_type
    }

    #[must_use]
    pub fn issued_at(&self) -> OffsetDateTime {
        self.issued_at
    }

    #[must_use]
    pub fn expires_at(&self) -> OffsetDateTime {
        self.expires_at
    }

    /// Scope granted by the server, if it reported one.
    #[must_use]
    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    /// `now < expires_at`, without any safety margin.
    #[must_use]
    pub fn is_valid_at(&self, now: OffsetDateTime) -> bool {
        now < self.expires_at
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        !self.is_valid_at(OffsetDateTime::now_utc())
    }

    /// Whether the cache may still hand this token out at `now`.
    ///
    /// Tokens expiring within `margin` count as expired. The margin is capped
    /// to half the token's lifetime so short-lived tokens are still reused.
    pub(crate) fn is_fresh_at(&self, now: OffsetDateTime, margin: Duration) -> bool {
        let lifetime = self.expires_at - self.issued_at;
        let margin = time::Duration::try_from(margin).unwrap_or(time::Duration::MAX);
        let effective = margin.min(lifetime / 2);
        match self.expires_at.checked_sub(effective) {
            Some(refresh_at) => now < refresh_at,
            None => false,
        }
    }

    /// Same credential as `other` (used to detect a concurrent refresh).
    pub(crate) fn same_credential(&self, other: &Self) -> bool {
        self.access_token.expose() == other.access_token.expose()
    }

    /// `Bearer <token>` header value, marked sensitive.
    ///
    /// # Errors
    ///
    /// Returns an error if the token contains bytes not allowed in a header.
    pub fn authorization_header(&self) -> Result<HeaderValue, http::header::InvalidHeaderValue> {
        let raw = zeroize::Zeroizing::new(format!("Bearer {}", self.access_token.expose()));
        let mut value = HeaderValue::from_str(&raw)?;
        value.set_sensitive(true);
        Ok(value)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &self.access_token)
            .field("token_type", &self.token_type)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .finish()
    }
}

fn expiry_after(issued_at: OffsetDateTime, lifetime: Duration) -> OffsetDateTime {
    let lifetime =
        time::Duration::try_from(lifetime.min(MAX_LIFETIME)).unwrap_or(time::Duration::ZERO);
    issued_at.checked_add(lifetime).unwrap_or(issued_at)
}

/// Deserialized token endpoint response.
///
/// **Intentionally `Deserialize`-only** so an access token cannot be
/// serialized into logs or error messages by accident.
#[derive(Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// OAuth error body (`{"error": ..., "error_description": ...}`).
#[derive(Debug, Deserialize)]
pub struct OAuthErrorBody {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn at(secs: i64) -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH + time::Duration::seconds(secs)
    }

    #[test]
    fn expiry_is_issued_plus_lifetime() {
        let token = Token::new("tok", at(1000), Duration::from_secs(3600));
        assert_eq!(token.expires_at(), at(4600));
        assert_eq!(token.token_type(), "Bearer");
        assert!(token.is_valid_at(at(4599)));
        assert!(!token.is_valid_at(at(4600)));
    }

    #[test]
    fn safety_margin_applies_to_long_lived_tokens() {
        let token = Token::new("tok", at(0), Duration::from_secs(3600));
        let margin = Duration::from_secs(30);
        assert!(token.is_fresh_at(at(3569), margin));
        assert!(!token.is_fresh_at(at(3570), margin));
    }

    #[test]
    fn safety_margin_capped_for_short_lived_tokens() {
        // 20 s lifetime with a 30 s margin would never be fresh; capped to 10 s.
        let token = Token::new("tok", at(0), Duration::from_secs(20));
        let margin = Duration::from_secs(30);
        assert!(token.is_fresh_at(at(9), margin));
        assert!(!token.is_fresh_at(at(10), margin));
    }

    #[test]
    fn one_second_token_is_stale_two_seconds_later() {
        let token = Token::new("tok-A", at(0), Duration::from_secs(1));
        assert!(!token.is_fresh_at(at(2), Duration::from_secs(30)));
    }

    #[test]
    fn zero_lifetime_is_never_fresh() {
        let token = Token::new("tok", at(0), Duration::ZERO);
        assert!(!token.is_fresh_at(at(0), Duration::from_secs(30)));
    }

    #[test]
    fn huge_lifetime_does_not_overflow() {
        let token = Token::new("tok", OffsetDateTime::now_utc(), Duration::from_secs(u64::MAX));
        assert!(!token.is_expired());
    }

    #[test]
    fn debug_hides_access_token() {
        let token = Token::new("super-secret-token", at(0), Duration::from_secs(60))
            .with_scope("iam:read");
        let dbg = format!("{token:?}");
        assert!(!dbg.contains("super-secret-token"), "{dbg}");
        assert!(dbg.contains("iam:read"));
    }

    #[test]
    fn authorization_header_is_sensitive() {
        let token = Token::new("tok-1", at(0), Duration::from_secs(60));
        let value = token.authorization_header().unwrap();
        assert_eq!(value.to_str().unwrap(), "Bearer tok-1");
        assert!(value.is_sensitive());
    }

    #[test]
    fn token_response_fields() {
        let json = r#"{
            "access_token": "tok",
            "expires_in": 3600,
            "token_type": "Bearer",
            "scope": "iam:read",
            "refresh_token": "rt"
        }"#;
        let r: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(r.access_token, "tok");
        assert_eq!(r.expires_in, Some(3600));
        assert_eq!(r.token_type.as_deref(), Some("Bearer"));
        assert_eq!(r.scope.as_deref(), Some("iam:read"));

        let minimal: TokenResponse = serde_json::from_str(r#"{"access_token":"tok"}"#).unwrap();
        assert!(minimal.expires_in.is_none());
        assert!(minimal.token_type.is_none());
    }

    #[test]
    fn oauth_error_body() {
        let body: OAuthErrorBody =
            serde_json::from_str(r#"{"error":"invalid_client","error_description":"bad"}"#)
                .unwrap();
        assert_eq!(body.error, "invalid_client");
        assert_eq!(body.error_description.as_deref(), Some("bad"));
    }
}
