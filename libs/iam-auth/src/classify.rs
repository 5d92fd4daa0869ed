//! Mapping of HTTP outcomes onto [`AuthError`] kinds.

use std::time::Duration;

use http::StatusCode;
use iam_http::HttpError;

use crate::error::AuthError;
use crate::redact::redact;
use crate::token::OAuthErrorBody;

/// Cooldown assumed for a 429 without a usable `Retry-After` header.
pub const DEFAULT_RATE_LIMIT_COOLDOWN: Duration = Duration::from_secs(60);

/// Describe an [`HttpError`] with a context prefix.
///
/// `HttpStatus` errors include only the status code; response bodies are
/// excluded so server diagnostics do not leak into messages.
#[must_use]
pub fn describe_http_error(e: &HttpError, prefix: &str) -> String {
    match e {
        HttpError::HttpStatus { status, .. } => format!("{prefix} HTTP {status}"),
        HttpError::Json(err) => format!("{prefix} JSON parse failed: {err}"),
        HttpError::Timeout(duration) => {
            format!("{prefix} request timed out after {}ms", duration.as_millis())
        }
        HttpError::Transport(err) => format!("{prefix} transport error: {err}"),
        HttpError::BodyTooLarge { limit, actual } => {
            format!("{prefix} response too large: limit {limit} bytes, got {actual} bytes")
        }
        HttpError::Tls(err) => format!("{prefix} TLS error: {err}"),
        HttpError::RequestBuild(err) => format!("{prefix} request build failed: {err}"),
        HttpError::InvalidHeaderName(err) => format!("{prefix} invalid header name: {err}"),
        HttpError::InvalidHeaderValue(_) => format!("{prefix} invalid header value"),
        HttpError::FormEncode(err) => format!("{prefix} form encode error: {err}"),
        HttpError::Overloaded => format!("{prefix} request rejected: service overloaded"),
        HttpError::ServiceClosed => format!("{prefix} service unavailable"),
        HttpError::InvalidUri { url, reason, .. } => {
            format!("{prefix} invalid URL '{url}': {reason}")
        }
        HttpError::InvalidScheme { scheme, reason } => {
            format!("{prefix} invalid scheme '{scheme}': {reason}")
        }
        HttpError::Auth(err) => format!("{prefix} authentication failed: {err}"),
        _ => format!("{prefix} request failed"),
    }
}

/// Classify an [`HttpError`] raised while talking to the token endpoint.
///
/// Failures without an HTTP response are `Network` (TLS failures are not
/// retryable); request construction problems are `Configuration`; an
/// [`AuthError`] carried through an auth layer is returned as is.
#[must_use]
pub fn from_http_error(err: HttpError, prefix: &str) -> AuthError {
    let message = describe_http_error(&err, prefix);
    match err {
        HttpError::Auth(inner) => match inner.downcast::<AuthError>() {
            Ok(auth) => *auth,
            Err(other) => AuthError::unknown(message).with_boxed_source(other),
        },
        HttpError::HttpStatus {
            status,
            retry_after,
            ..
        } => from_status(status, retry_after, None, prefix),
        HttpError::Timeout(_) | HttpError::Overloaded => AuthError::network(message),
        HttpError::Transport(source) => AuthError::network(message).with_boxed_source(source),
        HttpError::Tls(source) => AuthError::network(message)
            .with_retryable(false)
            .with_boxed_source(source),
        HttpError::RequestBuild(_)
        | HttpError::InvalidHeaderName(_)
        | HttpError::InvalidHeaderValue(_)
        | HttpError::FormEncode(_)
        | HttpError::InvalidUri { .. }
        | HttpError::InvalidScheme { .. } => AuthError::configuration(message),
        _ => AuthError::unknown(message),
    }
}

/// Classify a non-2xx token endpoint response.
///
/// `body` is the raw response body; when it is an OAuth error document, its
/// `error` code is kept and the (redacted) description is added to the
/// message.
#[must_use]
pub fn from_status(
    status: StatusCode,
    retry_after: Option<Duration>,
    body: Option<&[u8]>,
    prefix: &str,
) -> AuthError {
    let oauth = body.and_then(|b| serde_json::from_slice::<OAuthErrorBody>(b).ok());
    let mut message = format!("{prefix} HTTP {status}");
    if let Some(ref o) = oauth {
        message.push_str(": ");
        message.push_str(&o.error);
        if let Some(ref desc) = o.error_description {
            message.push_str(" (");
            message.push_str(&redact(desc));
            message.push(')');
        }
    }

    let err = match status.as_u16() {
        400 | 401 | 403 => AuthError::credentials(message),
        408 => AuthError::network(message),
        429 => AuthError::rate_limit(
            message,
            retry_after.unwrap_or(DEFAULT_RATE_LIMIT_COOLDOWN),
        ),
        500..=599 => AuthError::server_error(message),
        _ => AuthError::unknown(message),
    };

    let err = err.with_status(status);
    match oauth {
        Some(o) => err.with_oauth_error(o.error),
        None => err,
    }
}

/// Classify a response from a downstream API called with an issued token.
///
/// Returns `None` for success and redirect statuses. A 401 means the API
/// rejected the token even after re-authentication and maps to
/// `TokenExpired`; other statuses follow the token endpoint table.
#[must_use]
pub fn from_downstream_status(
    status: StatusCode,
    retry_after: Option<Duration>,
) -> Option<AuthError> {
    if status.is_success() || status.is_redirection() || status.is_informational() {
        return None;
    }
    if status == StatusCode::UNAUTHORIZED {
        return Some(
            AuthError::token_expired(format!("API HTTP {status}")).with_status(status),
        );
    }
    Some(from_status(status, retry_after, None, "API"))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::error::AuthErrorKind;

    fn classify(status: u16, body: &str) -> AuthError {
        from_status(
            StatusCode::from_u16(status).unwrap(),
            None,
            Some(body.as_bytes()),
            "token endpoint",
        )
    }

    #[test]
    fn invalid_client_is_credentials() {
        let err = classify(401, r#"{"error":"invalid_client"}"#);
        assert_eq!(err.kind(), AuthErrorKind::Credentials);
        assert!(!err.is_retryable());
        assert_eq!(err.oauth_error(), Some("invalid_client"));
        assert_eq!(err.status(), Some(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn bad_request_and_forbidden_are_credentials() {
        for (status, code) in [
            (400, "invalid_scope"),
            (400, "invalid_request"),
            (400, "invalid_grant"),
            (403, "unauthorized_client"),
        ] {
            let err = classify(status, &format!(r#"{{"error":"{code}"}}"#));
            assert_eq!(err.kind(), AuthErrorKind::Credentials, "{status} {code}");
            assert!(!err.is_retryable());
        }
    }

    #[test]
    fn rate_limit_uses_retry_after_or_default() {
        let err = from_status(
            StatusCode::TOO_MANY_REQUESTS,
            Some(Duration::from_secs(60)),
            None,
            "token endpoint",
        );
        assert_eq!(err.kind(), AuthErrorKind::RateLimit);
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(60)));

        let err = from_status(StatusCode::TOO_MANY_REQUESTS, None, None, "token endpoint");
        assert_eq!(err.retry_after(), Some(DEFAULT_RATE_LIMIT_COOLDOWN));
    }

    #[test]
    fn server_errors_are_retryable() {
        for status in [500, 502, 503, 504] {
            let err = classify(status, r#"{"error":"server_error"}"#);
            assert_eq!(err.kind(), AuthErrorKind::ServerError);
            assert!(err.is_retryable());
        }
    }

    #[test]
    fn request_timeout_is_network() {
        let err = classify(408, "");
        assert_eq!(err.kind(), AuthErrorKind::Network);
        assert!(err.is_retryable());
    }

    #[test]
    fn other_statuses_are_unknown() {
        let err = classify(404, "not json");
        assert_eq!(err.kind(), AuthErrorKind::Unknown);
        assert!(!err.is_retryable());
        assert!(err.oauth_error().is_none());
    }

    #[test]
    fn description_is_redacted() {
        let err = classify(
            401,
            r#"{"error":"invalid_client","error_description":"client_secret=s1 is wrong"}"#,
        );
        assert!(!err.message().contains("s1 "), "{}", err.message());
        assert!(err.message().contains("invalid_client"));
    }

    #[test]
    fn transport_and_timeout_are_network() {
        let err = from_http_error(
            HttpError::Transport(Box::new(std::io::Error::other("connection refused"))),
            "token endpoint",
        );
        assert_eq!(err.kind(), AuthErrorKind::Network);
        assert!(err.is_retryable());

        let err = from_http_error(HttpError::Timeout(Duration::from_secs(5)), "token endpoint");
        assert_eq!(err.kind(), AuthErrorKind::Network);
        assert!(err.message().contains("5000ms"));
    }

    #[test]
    fn tls_failure_is_not_retryable() {
        let err = from_http_error(
            HttpError::Tls(Box::new(std::io::Error::other("bad certificate"))),
            "token endpoint",
        );
        assert_eq!(err.kind(), AuthErrorKind::Network);
        assert!(!err.is_retryable());
    }

    #[test]
    fn invalid_scheme_is_configuration() {
        let err = from_http_error(
            HttpError::InvalidScheme {
                scheme: "http".into(),
                reason: "HTTPS required".into(),
            },
            "token endpoint",
        );
        assert_eq!(err.kind(), AuthErrorKind::Configuration);
    }

    #[test]
    fn auth_layer_error_is_unwrapped() {
        let inner = AuthError::credentials("token endpoint HTTP 401 Unauthorized");
        let err = from_http_error(HttpError::Auth(Box::new(inner)), "API");
        assert_eq!(err.kind(), AuthErrorKind::Credentials);
        assert_eq!(err.message(), "token endpoint HTTP 401 Unauthorized");
    }

    #[test]
    fn status_error_without_body_excludes_preview() {
        let err = HttpError::HttpStatus {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body_preview: "secret stack trace".into(),
            retry_after: None,
        };
        assert_eq!(
            describe_http_error(&err, "OIDC discovery"),
            "OIDC discovery HTTP 500 Internal Server Error"
        );
    }

    #[test]
    fn downstream_statuses() {
        assert!(from_downstream_status(StatusCode::OK, None).is_none());
        assert!(from_downstream_status(StatusCode::NO_CONTENT, None).is_none());

        let err = from_downstream_status(StatusCode::UNAUTHORIZED, None).unwrap();
        assert_eq!(err.kind(), AuthErrorKind::TokenExpired);
        assert!(err.is_retryable());

        let err = from_downstream_status(StatusCode::SERVICE_UNAVAILABLE, None).unwrap();
        assert_eq!(err.kind(), AuthErrorKind::ServerError);

        let err = from_downstream_status(StatusCode::NOT_FOUND, None).unwrap();
        assert_eq!(err.kind(), AuthErrorKind::Unknown);
    }
}
