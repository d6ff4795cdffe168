//! HTTP execution layer behind the router

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};
use tracing::{debug, instrument};

use crate::error::{Result, RotatorError};

/// Sends a fully rewritten request and buffers the response
#[async_trait]
pub trait HttpExecutor: Send + Sync {
    async fn execute(&self, request: Request<Bytes>) -> Result<Response<Bytes>>;
}

/// `HttpExecutor` backed by a shared `reqwest::Client`
///
/// Redirects are relayed to the caller instead of being followed, so a
/// redirect to another host never bypasses the gateway.
#[derive(Debug, Clone)]
pub struct ReqwestExecutor {
    client: reqwest::Client,
}

impl ReqwestExecutor {
    pub fn new(connect_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| RotatorError::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpExecutor for ReqwestExecutor {
    #[instrument(skip(self, request), fields(method = %request.method(), uri = %request.uri()))]
    async fn execute(&self, request: Request<Bytes>) -> Result<Response<Bytes>> {
        let request = reqwest::Request::try_from(request)?;
        let response = self.client.execute(request).await?;

        let status = response.status();
        let version = response.version();
        let headers = response.headers().clone();
        let body = response.bytes().await?;
        debug!(status = status.as_u16(), bytes = body.len(), "Response received");

        let mut translated = Response::builder().status(status).version(version);
        if let Some(map) = translated.headers_mut() {
            *map = headers;
        }
        Ok(translated.body(body)?)
    }
}
