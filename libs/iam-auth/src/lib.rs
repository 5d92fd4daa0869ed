#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! `OAuth2` client-credentials authentication for the IAM provider.
//!
//! [`AuthClient`] acquires access tokens from a token endpoint (configured
//! directly or resolved via OIDC discovery), caches them until they come
//! within a safety margin of expiry, and coalesces concurrent refreshes into
//! a single request. It hands out [`iam_http::HttpClient`]s that attach
//! `Authorization: Bearer <token>` to every request, optionally refreshing
//! once and replaying a request answered with 401.
//!
//! Failures are reported as [`AuthError`], classified into an
//! [`AuthErrorKind`] with a retryable flag and an optional retry-after hint
//! that [`RetryPolicy`] honours. Secrets never appear in `Debug` output,
//! error messages or logs (see [`redact()`]).
//!
//! # Example
//!
//! ```ignore
//! use iam_auth::{AuthClient, AuthConfig};
//!
//! let client = AuthClient::new(AuthConfig {
//!     client_id: "svc".into(),
//!     client_secret: "secret".into(),
//!     token_url: Some("https://auth.example.com/oauth2/token".parse()?),
//!     scopes: vec!["iam:read".into()],
//!     ..Default::default()
//! })?;
//!
//! let api = client.http_client_with_retry()?;
//! let groups = api.get("https://iam.example.com/v1/groups").send().await?;
//! ```

mod builder_ext;
pub mod classify;
mod client;
mod config;
mod discovery;
mod error;
mod layer;
pub mod redact;
mod retry;
mod secret;
pub mod settings;
mod source;
mod token;

pub use builder_ext::HttpClientBuilderExt;
pub use client::AuthClient;
pub use config::{AuthConfig, ClientAuthMethod, normalize_scopes};
pub use error::{AuthError, AuthErrorKind};
pub use layer::{BearerAuthLayer, BearerAuthService, ReauthLayer, ReauthService};
pub use redact::{REDACTED, redact};
pub use retry::RetryPolicy;
pub use secret::SecretString;
pub use settings::AuthSettings;
pub use token::Token;
