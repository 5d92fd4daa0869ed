use std::time::Duration;

use base64::{Engine as _, engine::general_purpose};
use http::header::{ACCEPT, AUTHORIZATION};
use time::OffsetDateTime;
use url::Url;
use zeroize::Zeroizing;

use crate::classify;
use crate::config::{AuthConfig, ClientAuthMethod};
use crate::error::AuthError;
use crate::secret::SecretString;
use crate::token::{Token, TokenResponse};

const CONTEXT: &str = "token endpoint";

/// Performs client-credentials token requests over an [`iam_http::HttpClient`].
///
/// Holds no token state; caching and coalescing live in
/// [`AuthClient`](crate::AuthClient).
pub struct TokenSource {
    client: iam_http::HttpClient,
    client_id: String,
    client_secret: SecretString,
    /// Pre-joined scopes, or `None` when the scope list is empty.
    scopes: Option<String>,
    auth_method: ClientAuthMethod,
    extra_headers: Vec<(String, String)>,
    default_ttl: Duration,
}

impl TokenSource {
    /// Build a token source from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns a `Configuration` error if the HTTP client cannot be built.
    pub(crate) fn new(config: &AuthConfig) -> Result<Self, AuthError> {
        let client = iam_http::HttpClientBuilder::with_config(config.token_http_config())
            .build()
            .map_err(|e| classify::from_http_error(e, CONTEXT).with_retryable(false))?;

        Ok(Self {
            client,
            client_id: config.client_id.trim().to_owned(),
            client_secret: config.client_secret.clone(),
            scopes: config.scope_param(),
            auth_method: config.auth_method,
            extra_headers: config.extra_headers.clone(),
            default_ttl: config.default_ttl,
        })
    }

    pub(crate) fn http_client(&self) -> &iam_http::HttpClient {
        &self.client
    }

    /// Exchange the client credentials for a new access token.
    ///
    /// Sends exactly one request. Dropping the future aborts it.
    ///
    /// # Errors
    ///
    /// Returns the classified [`AuthError`] for transport failures, non-2xx
    /// responses, malformed bodies and non-bearer token types.
    pub(crate) async fn request_token(&self, endpoint: &Url) -> Result<Token, AuthError> {
        let mut fields: Vec<(&str, &str)> = vec![("grant_type", "client_credentials")];

        if let Some(ref scope) = self.scopes {
            fields.push(("scope", scope));
        }

        // Form auth: credentials in the body; the temporary copy is scrubbed on drop.
        let secret_expose;
        if self.auth_method == ClientAuthMethod::Form {
            secret_expose = Zeroizing::new(self.client_secret.expose().to_owned());
            fields.push(("client_id", &self.client_id));
            fields.push(("client_secret", &secret_expose));
        }

        let mut builder = self
            .client
            .post(endpoint.as_str())
            .header(ACCEPT.as_str(), "application/json");

        if self.auth_method == ClientAuthMethod::Basic {
            let credentials = Zeroizing::new(format!(
                "{}:{}",
                self.client_id,
                self.client_secret.expose()
            ));
            let encoded = Zeroizing::new(general_purpose::STANDARD.encode(credentials.as_bytes()));
            let header_value = Zeroizing::new(format!("Basic {}", &*encoded));
            builder = builder.header(AUTHORIZATION.as_str(), &header_value);
        }

        for (name, value) in &self.extra_headers {
            builder = builder.header(name, value);
        }

        let issued_at = OffsetDateTime::now_utc();
        let response = builder
            .form(fields.as_slice())
            .map_err(|e| classify::from_http_error(e, CONTEXT))?
            .send()
            .await
            .map_err(|e| classify::from_http_error(e, CONTEXT))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response.retry_after();
            // An oversized or unreadable error body must not hide the status.
            let body = response.error_body().await;
            return Err(classify::from_status(
                status,
                retry_after,
                body.as_deref(),
                CONTEXT,
            ));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| classify::from_http_error(e, CONTEXT))?;

        let parsed: TokenResponse = serde_json::from_slice(&body).map_err(|e| {
            AuthError::unknown(format!("{CONTEXT} returned a malformed token response: {e}"))
                .with_status(status)
        })?;

        self.build_token(parsed, issued_at)
    }

    fn build_token(
        &self,
        response: TokenResponse,
        issued_at: OffsetDateTime,
    ) -> Result<Token, AuthError> {
        if response.access_token.is_empty() {
            return Err(AuthError::unknown(format!(
                "{CONTEXT} returned an empty access_token"
            )));
        }
        if let Some(ref tt) = response.token_type
            && !tt.eq_ignore_ascii_case("bearer")
        {
            return Err(AuthError::unknown(format!(
                "{CONTEXT} returned unsupported token type '{tt}'"
            )));
        }

        let lifetime = response
            .expires_in
            .map_or(self.default_ttl, Duration::from_secs);
        let token = Token::new(response.access_token, issued_at, lifetime);
        Ok(match response.scope {
            Some(scope) => token.with_scope(scope),
            None => token,
        })
    }
}
