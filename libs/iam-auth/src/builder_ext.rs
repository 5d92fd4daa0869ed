use tower::ServiceExt;

use crate::client::AuthClient;
use crate::layer::{BearerAuthLayer, ReauthLayer};

/// Extension trait for adding bearer auth to [`iam_http::HttpClientBuilder`].
///
/// # Example
///
/// ```ignore
/// use iam_auth::HttpClientBuilderExt;
///
/// let auth = AuthClient::new(config)?;
/// let client = HttpClientBuilder::new()
///     .with_auth_client_retry(auth)
///     .build()?;
/// ```
pub trait HttpClientBuilderExt {
    /// Add `Authorization: Bearer <token>` injection to the HTTP client.
    #[must_use]
    fn with_auth_client(self, client: AuthClient) -> Self;

    /// Same as [`with_auth_client`](Self::with_auth_client), plus one token
    /// refresh and replay when a request is answered with 401.
    #[must_use]
    fn with_auth_client_retry(self, client: AuthClient) -> Self;
}

impl HttpClientBuilderExt for iam_http::HttpClientBuilder {
    fn with_auth_client(self, client: AuthClient) -> Self {
        let layer = BearerAuthLayer::new(client);
        self.with_auth_layer(move |svc| {
            tower::ServiceBuilder::new()
                .layer(layer)
                .service(svc)
                .boxed_clone()
        })
    }

    fn with_auth_client_retry(self, client: AuthClient) -> Self {
        let layer = ReauthLayer::new(client);
        self.with_auth_layer(move |svc| {
            tower::ServiceBuilder::new()
                .layer(layer)
                .service(svc)
                .boxed_clone()
        })
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::config::AuthConfig;
    use crate::secret::SecretString;
    use httpmock::prelude::*;
    use url::Url;

    fn auth_client(server: &MockServer) -> AuthClient {
        let token_url = format!("http://localhost:{}/token", server.port());
        AuthClient::new(AuthConfig {
            token_url: Some(Url::parse(&token_url).unwrap()),
            client_id: "test-client".into(),
            client_secret: SecretString::new("test-secret"),
            http_config: Some(iam_http::HttpClientConfig::for_testing()),
            ..Default::default()
        })
        .unwrap()
    }

    fn token_json(token: &str, expires_in: u64) -> String {
        format!(r#"{{"access_token":"{token}","expires_in":{expires_in},"token_type":"Bearer"}}"#)
    }

    #[tokio::test]
    async fn with_auth_client_injects_header() {
        let oauth_server = MockServer::start();
        let _token_mock = oauth_server.mock(|when, then| {
            when.method(POST).path("/token");
            then.status(200)
                .header("content-type", "application/json")
                .body(token_json("tok-builder-ext", 3600));
        });

        let api_server = MockServer::start();
        let api_mock = api_server.mock(|when, then| {
            when.method(GET)
                .path("/api/data")
                .header("authorization", "Bearer tok-builder-ext");
            then.status(200).body(r#"{"ok":true}"#);
        });

        let client = iam_http::HttpClientBuilder::new()
            .allow_insecure_http()
            .with_auth_client(auth_client(&oauth_server))
            .build()
            .unwrap();

        let resp = client
            .get(&format!("http://localhost:{}/api/data", api_server.port()))
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status(), http::StatusCode::OK);
        api_mock.assert();
    }

    #[tokio::test]
    async fn without_auth_client_no_header() {
        let api_server = MockServer::start();
        let auth_mock = api_server.mock(|when, then| {
            when.method(GET)
                .path("/api/data")
                .header_exists("authorization");
            then.status(200).body("authed");
        });
        let fallback_mock = api_server.mock(|when, then| {
            when.method(GET).path("/api/data");
            then.status(200).body("no-auth");
        });

        let client = iam_http::HttpClientBuilder::new()
            .allow_insecure_http()
            .build()
            .unwrap();

        let _resp = client
            .get(&format!("http://localhost:{}/api/data", api_server.port()))
            .send()
            .await
            .unwrap();

        assert_eq!(auth_mock.calls(), 0);
        fallback_mock.assert();
    }

    #[tokio::test]
    async fn with_auth_client_retry_replays_body() {
        let oauth_server = MockServer::start();
        let token_mock = oauth_server.mock(|when, then| {
            when.method(POST).path("/token");
            then.status(200).body(token_json("tok", 3600));
        });

        let api_server = MockServer::start();
        let api_mock = api_server.mock(|when, then| {
            when.method(POST)
                .path("/api/items")
                .header("authorization", "Bearer tok")
                .body(r#"{"name":"x"}"#);
            then.status(401);
        });

        let client = iam_http::HttpClientBuilder::new()
            .allow_insecure_http()
            .with_auth_client_retry(auth_client(&oauth_server))
            .build()
            .unwrap();

        let resp = client
            .post(&format!("http://localhost:{}/api/items", api_server.port()))
            .json(&serde_json::json!({"name": "x"}))
            .unwrap()
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status(), http::StatusCode::UNAUTHORIZED);
        api_mock.assert_calls(2);
        token_mock.assert_calls(2);
    }
}
