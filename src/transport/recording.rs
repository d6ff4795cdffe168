//! Recording `HttpExecutor` for tests
//!
//! Compiled for this crate's tests and, for downstream tests, with the
//! `testing` feature.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Request, Response, StatusCode};
use parking_lot::Mutex;

use super::executor::HttpExecutor;
use crate::error::Result;

/// A request as it reached a `RecordingExecutor`
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: http::Method,
    pub uri: http::Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// `HttpExecutor` that records requests and answers with a canned response
#[derive(Debug)]
pub struct RecordingExecutor {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    delay: Option<Duration>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl RecordingExecutor {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_header(mut self, name: &'static str, value: &'static str) -> Self {
        self.headers
            .append(name, http::HeaderValue::from_static(value));
        self
    }

    /// Hold every response for `delay` before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

impl Default for RecordingExecutor {
    fn default() -> Self {
        Self::new(StatusCode::OK, Bytes::new())
    }
}

#[async_trait]
impl HttpExecutor for RecordingExecutor {
    async fn execute(&self, request: Request<Bytes>) -> Result<Response<Bytes>> {
        let (parts, body) = request.into_parts();
        self.requests.lock().push(RecordedRequest {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body,
        });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut response = Response::builder().status(self.status);
        if let Some(map) = response.headers_mut() {
            *map = self.headers.clone();
        }
        Ok(response.body(self.body.clone())?)
    }
}
