use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use http::header::AUTHORIZATION;
use http::{Request, Response, StatusCode};
use http_body_util::Full;
use iam_http::HttpError;
use tower::{Layer, Service, ServiceExt};

use crate::client::AuthClient;
use crate::error::AuthError;
use crate::token::Token;

type BoxFuture<T> = Pin<Box<dyn Future<Output = Result<T, HttpError>> + Send>>;

/// Tower layer that sets `Authorization: Bearer <token>` on outbound requests.
///
/// The token comes from [`AuthClient::get_token_with_retry`], so it is fetched
/// or refreshed on demand and transient token endpoint failures are retried
/// under the client's [`RetryPolicy`](crate::RetryPolicy). A token failure
/// that outlasts the policy surfaces as [`HttpError::Auth`] carrying the
/// [`AuthError`].
#[derive(Clone, Debug)]
pub struct BearerAuthLayer {
    client: AuthClient,
}

impl BearerAuthLayer {
    #[must_use]
    pub fn new(client: AuthClient) -> Self {
        Self { client }
    }
}

impl<S> Layer<S> for BearerAuthLayer {
    type Service = BearerAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        BearerAuthService {
            inner,
            client: self.client.clone(),
        }
    }
}

/// Created by [`BearerAuthLayer`].
#[derive(Clone, Debug)]
pub struct BearerAuthService<S> {
    inner: S,
    client: AuthClient,
}

impl<S, B, ResBody> Service<Request<B>> for BearerAuthService<S>
where
    S: Service<Request<B>, Response = Response<ResBody>, Error = HttpError>
        + Clone
        + Send
        + 'static,
    S::Future: Send,
    B: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = HttpError;
    type Future = BoxFuture<Response<ResBody>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<B>) -> Self::Future {
        let client = self.client.clone();

        // Clone-swap pattern (Tower Service contract).
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let token = client.get_token_with_retry().await.map_err(auth_error)?;
            attach(&mut req, &token)?;
            inner.call(req).await
        })
    }
}

/// Like [`BearerAuthLayer`], but a `401 Unauthorized` response triggers one
/// forced token refresh and one replay of the request.
///
/// The replay's response is returned whatever its status, so a request is
/// sent at most twice. Concurrent requests rejected with the same token share
/// a single refresh. Token acquisition follows the client's retry policy, as
/// in [`BearerAuthLayer`].
#[derive(Clone, Debug)]
pub struct ReauthLayer {
    client: AuthClient,
}

impl ReauthLayer {
    #[must_use]
    pub fn new(client: AuthClient) -> Self {
        Self { client }
    }
}

impl<S> Layer<S> for ReauthLayer {
    type Service = ReauthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ReauthService {
            inner,
            client: self.client.clone(),
        }
    }
}

/// Created by [`ReauthLayer`].
#[derive(Clone, Debug)]
pub struct ReauthService<S> {
    inner: S,
    client: AuthClient,
}

impl<S, ResBody> Service<Request<Full<Bytes>>> for ReauthService<S>
where
    S: Service<Request<Full<Bytes>>, Response = Response<ResBody>, Error = HttpError>
        + Clone
        + Send
        + 'static,
    S::Future: Send,
    ResBody: Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = HttpError;
    type Future = BoxFuture<Response<ResBody>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Full<Bytes>>) -> Self::Future {
        let client = self.client.clone();

        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let token = client.get_token_with_retry().await.map_err(auth_error)?;
            let replay = req.clone();

            let resp = send(&mut inner, req, &token).await?;
            if resp.status() != StatusCode::UNAUTHORIZED {
                return Ok(resp);
            }
            drop(resp);

            tracing::debug!(
                uri = %replay.uri(),
                "request rejected with 401; refreshing token once"
            );
            let fresh = client
                .refresh_rejected_with_retry(&token)
                .await
                .map_err(auth_error)?;
            send(&mut inner, replay, &fresh).await
        })
    }
}

async fn send<S, ResBody>(
    inner: &mut S,
    mut req: Request<Full<Bytes>>,
    token: &Token,
) -> Result<Response<ResBody>, HttpError>
where
    S: Service<Request<Full<Bytes>>, Response = Response<ResBody>, Error = HttpError>,
{
    attach(&mut req, token)?;
    inner.ready().await?.call(req).await
}

fn attach<B>(req: &mut Request<B>, token: &Token) -> Result<(), HttpError> {
    let value = token
        .authorization_header()
        .map_err(HttpError::InvalidHeaderValue)?;
    req.headers_mut().insert(AUTHORIZATION, value);
    Ok(())
}

fn auth_error(err: AuthError) -> HttpError {
    HttpError::Auth(Box::new(err))
}
