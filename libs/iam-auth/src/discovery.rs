use serde::Deserialize;
use url::Url;

use crate::classify::describe_http_error;
use crate::error::AuthError;

/// Minimal subset of the `OpenID` Connect discovery document.
///
/// Only `token_endpoint` is required; all other fields are ignored.
#[derive(Deserialize)]
struct OidcDiscoveryDoc {
    token_endpoint: String,
}

/// Resolve the token endpoint from an OIDC issuer URL.
///
/// Fetches `{issuer_url}/.well-known/openid-configuration` and extracts the
/// `token_endpoint` field.
///
/// # Errors
///
/// Returns a `Discovery` error (never retryable) if the document cannot be
/// fetched, the status is not 2xx, the body is malformed or the endpoint is
/// not a valid URL.
pub async fn discover_token_endpoint(
    client: &iam_http::HttpClient,
    issuer_url: &Url,
) -> Result<Url, AuthError> {
    let base = issuer_url.as_str().trim_end_matches('/');
    let discovery_url = format!("{base}/.well-known/openid-configuration");
    tracing::debug!(url = %discovery_url, "resolving token endpoint via OIDC discovery");

    let doc: OidcDiscoveryDoc = client
        .get(&discovery_url)
        .send()
        .await
        .map_err(|e| discovery_error(&e))?
        .json()
        .await
        .map_err(|e| discovery_error(&e))?;

    Url::parse(&doc.token_endpoint).map_err(|e| {
        AuthError::discovery(format!(
            "invalid token_endpoint URL in discovery document: {e}"
        ))
    })
}

fn discovery_error(e: &iam_http::HttpError) -> AuthError {
    let err = AuthError::discovery(describe_http_error(e, "OIDC discovery"));
    match e {
        iam_http::HttpError::HttpStatus { status, .. } => err.with_status(*status),
        _ => err,
    }
}
