#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! HTTP client used by the IAM provider.
//!
//! A hyper-based client with:
//! - TLS via rustls (HTTPS only unless explicitly relaxed for mock servers)
//! - Connection pooling
//! - Per-request timeouts
//! - User-Agent injection
//! - An optional auth layer hook (see [`HttpClientBuilder::with_auth_layer`])
//! - Size-bounded body reading
//!
//! `send()` follows reqwest semantics: every HTTP status is returned as
//! `Ok(HttpResponse)`; only transport, timeout and TLS failures are `Err`.
//!
//! # Example
//!
//! ```ignore
//! use iam_http::HttpClient;
//!
//! let client = HttpClient::builder()
//!     .timeout(std::time::Duration::from_secs(10))
//!     .build()?;
//!
//! let groups: Vec<Group> = client
//!     .get("https://iam.example.com/v1/groups")
//!     .send()
//!     .await?
//!     .json()
//!     .await?;
//! ```

mod builder;
mod client;
mod config;
mod error;
mod request;
mod response;
mod tls;

pub use builder::{HttpClientBuilder, InnerService};
pub use client::HttpClient;
pub use config::{DEFAULT_USER_AGENT, HttpClientConfig, TlsRootConfig, TransportSecurity};
pub use error::{HttpError, InvalidUriKind};
pub use request::RequestBuilder;
pub use response::{ERROR_BODY_PREVIEW_LIMIT, HttpResponse, ResponseBody, parse_retry_after};
