//! Per-request routing through the pool's ready endpoints

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::{HeaderValue, HOST};
use http::{Request, Response, Uri, Version};
use tokio::time::timeout;
use tracing::{debug, instrument};

use super::executor::HttpExecutor;
use super::headers::translate_response_headers;
use super::selector::RandomSelector;
use crate::error::{Result, RotatorError};
use crate::gateway::{GatewayPool, STAGE_NAME};
use crate::models::Endpoint;

#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Upper bound on one execution, response body included
    pub request_timeout: Duration,
    /// Upper bound on opening a connection to a gateway
    pub connect_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// HTTP transport spreading requests for the site over the pool's gateways
pub struct GatewayTransport {
    pool: Arc<GatewayPool>,
    executor: Arc<dyn HttpExecutor>,
    selector: RandomSelector,
    config: TransportConfig,
}

impl GatewayTransport {
    pub fn new(
        pool: Arc<GatewayPool>,
        executor: Arc<dyn HttpExecutor>,
        selector: RandomSelector,
        config: TransportConfig,
    ) -> Self {
        Self {
            pool,
            executor,
            selector,
            config,
        }
    }

    pub fn pool(&self) -> &Arc<GatewayPool> {
        &self.pool
    }

    /// Send `request` through one ready gateway picked at random.
    ///
    /// The request URI must be absolute and target the pool's site. Nothing is
    /// sent when it does not, or when no gateway is ready. Dropping the
    /// returned future cancels the in-flight call.
    #[instrument(skip_all, fields(method = %request.method(), uri = %request.uri()))]
    pub async fn dispatch(&self, request: Request<Bytes>) -> Result<Response<Bytes>> {
        let site = self.pool.site();
        if !site.matches(request.uri()) {
            return Err(RotatorError::SiteMismatch {
                expected: site.to_string(),
                actual: request.uri().to_string(),
            });
        }

        let ready = self.pool.ready_set();
        let endpoint = self.selector.select(&ready)?;
        let request = self.rewrite(request, &endpoint)?;
        debug!(region = %endpoint.region, target = %request.uri(), "Routing request");

        let response = timeout(self.config.request_timeout, self.executor.execute(request))
            .await
            .map_err(|_| RotatorError::RequestTimeout)??;

        let (mut parts, body) = response.into_parts();
        parts.headers = translate_response_headers(std::mem::take(&mut parts.headers));
        Ok(Response::from_parts(parts, body))
    }

    /// Point `request` at `endpoint`'s stage, keeping path and query
    fn rewrite(&self, request: Request<Bytes>, endpoint: &Endpoint) -> Result<Request<Bytes>> {
        let (mut parts, body) = request.into_parts();

        let mut target = format!(
            "https://{}/{}/{}",
            endpoint.invoke_host,
            STAGE_NAME,
            parts.uri.path().trim_start_matches('/')
        );
        if let Some(query) = parts.uri.query() {
            target.push('?');
            target.push_str(query);
        }

        parts.uri = target
            .parse::<Uri>()
            .map_err(|e| RotatorError::InvalidRequest(format!("Invalid target URI: {}", e)))?;
        parts.version = Version::HTTP_11;

        parts.headers.remove(HOST);
        let host = HeaderValue::from_str(&endpoint.invoke_host)
            .map_err(|e| RotatorError::InvalidRequest(format!("Invalid invoke host: {}", e)))?;
        parts.headers.insert(HOST, host);
        self.selector.apply_forwarded_for(&mut parts.headers);

        Ok(Request::from_parts(parts, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{MemoryGatewayApi, PoolOptions, ProvisionConfig, RegionProvisioner};
    use crate::models::{Region, Site};
    use crate::transport::headers::RELAY_FORWARDED_FOR;
    use crate::transport::RecordingExecutor;
    use http::StatusCode;
    use std::collections::HashSet;
    use std::net::Ipv4Addr;

    const HOSTS: &[&str] = &[
        "aaa111.execute-api.us-east-1.amazonaws.com",
        "bbb222.execute-api.eu-west-1.amazonaws.com",
    ];

    fn pool() -> Arc<GatewayPool> {
        Arc::new(GatewayPool::new(
            Site::parse("https://example.com").unwrap(),
            vec![Region::from("us-east-1"), Region::from("eu-west-1")],
            RegionProvisioner::new(Arc::new(MemoryGatewayApi::new()), ProvisionConfig::default()),
            PoolOptions::default(),
        ))
    }

    async fn started_transport(executor: Arc<RecordingExecutor>) -> GatewayTransport {
        let pool = pool();
        pool.start_with_endpoints(HOSTS).await.unwrap();
        GatewayTransport::new(pool, executor, RandomSelector::seeded(11), TransportConfig::default())
    }

    fn get(uri: &str) -> Request<Bytes> {
        Request::get(uri).body(Bytes::new()).unwrap()
    }

    #[tokio::test]
    async fn test_rewrites_path_and_query() {
        let executor = Arc::new(RecordingExecutor::default());
        let transport = started_transport(executor.clone()).await;

        let response = transport
            .dispatch(get("https://example.com/path/to?q=1&r=two"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let sent = &executor.requests()[0];
        let host = sent.uri.host().unwrap();
        assert!(HOSTS.contains(&host));
        assert_eq!(sent.uri.scheme_str(), Some("https"));
        assert_eq!(sent.uri.path(), "/ProxyStage/path/to");
        assert_eq!(sent.uri.query(), Some("q=1&r=two"));
        assert_eq!(sent.headers[HOST], host);
        assert_eq!(sent.headers.get_all(HOST).iter().count(), 1);
    }

    #[tokio::test]
    async fn test_root_path_maps_to_stage_root() {
        let executor = Arc::new(RecordingExecutor::default());
        let transport = started_transport(executor.clone()).await;

        transport.dispatch(get("https://example.com")).await.unwrap();

        assert_eq!(executor.requests()[0].uri.path(), "/ProxyStage/");
    }

    #[tokio::test]
    async fn test_host_header_replaced_and_body_kept() {
        let executor = Arc::new(RecordingExecutor::default());
        let transport = started_transport(executor.clone()).await;
        let request = Request::post("https://example.com/submit")
            .header(HOST, "example.com")
            .header("content-type", "application/json")
            .body(Bytes::from_static(b"{\"a\":1}"))
            .unwrap();

        transport.dispatch(request).await.unwrap();

        let sent = &executor.requests()[0];
        assert_eq!(sent.method, http::Method::POST);
        assert_ne!(sent.headers[HOST], "example.com");
        assert_eq!(sent.headers["content-type"], "application/json");
        assert_eq!(sent.body.as_ref(), b"{\"a\":1}");
    }

    #[tokio::test]
    async fn test_generated_forwarded_for_varies() {
        let executor = Arc::new(RecordingExecutor::default());
        let transport = started_transport(executor.clone()).await;

        for _ in 0..25 {
            transport.dispatch(get("https://example.com/")).await.unwrap();
        }

        let values: HashSet<String> = executor
            .requests()
            .iter()
            .map(|r| {
                let value = r.headers[&RELAY_FORWARDED_FOR].to_str().unwrap().to_string();
                assert!(value.parse::<Ipv4Addr>().is_ok(), "not an IPv4 address: {}", value);
                value
            })
            .collect();
        assert!(values.len() > 1);
    }

    #[tokio::test]
    async fn test_explicit_forwarded_for_relayed() {
        let executor = Arc::new(RecordingExecutor::default());
        let transport = started_transport(executor.clone()).await;
        let request = Request::get("https://example.com/")
            .header("x-forwarded-for", "192.0.2.55")
            .body(Bytes::new())
            .unwrap();

        transport.dispatch(request).await.unwrap();

        assert_eq!(executor.requests()[0].headers[&RELAY_FORWARDED_FOR], "192.0.2.55");
    }

    #[tokio::test]
    async fn test_site_mismatch_makes_no_call() {
        let executor = Arc::new(RecordingExecutor::default());
        let transport = started_transport(executor.clone()).await;

        for uri in ["https://other.example/path", "http://example.com/", "/relative"] {
            let err = transport.dispatch(get(uri)).await.unwrap_err();
            assert!(matches!(err, RotatorError::SiteMismatch { .. }), "{}", uri);
        }
        assert_eq!(executor.request_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_ready_set_makes_no_call() {
        let executor = Arc::new(RecordingExecutor::default());
        let transport = GatewayTransport::new(
            pool(),
            executor.clone(),
            RandomSelector::seeded(1),
            TransportConfig::default(),
        );

        let err = transport.dispatch(get("https://example.com/")).await.unwrap_err();

        assert!(matches!(err, RotatorError::NoEndpointsAvailable));
        assert_eq!(executor.request_count(), 0);
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let executor = Arc::new(RecordingExecutor::default().with_delay(Duration::from_secs(5)));
        let pool = pool();
        pool.start_with_endpoints(HOSTS).await.unwrap();
        let transport = GatewayTransport::new(
            pool,
            executor,
            RandomSelector::seeded(1),
            TransportConfig {
                request_timeout: Duration::from_millis(20),
                ..TransportConfig::default()
            },
        );

        let err = transport.dispatch(get("https://example.com/")).await.unwrap_err();
        assert!(matches!(err, RotatorError::RequestTimeout));
    }

    #[tokio::test]
    async fn test_response_headers_translated() {
        let executor = Arc::new(
            RecordingExecutor::new(StatusCode::NOT_FOUND, "missing")
                .with_header("x-amzn-requestid", "r-1")
                .with_header("x-amzn-remapped-server", "nginx")
                .with_header("content-type", "text/plain"),
        );
        let transport = started_transport(executor).await;

        let response = transport.dispatch(get("https://example.com/nope")).await.unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()["server"], "nginx");
        assert_eq!(response.headers()["content-type"], "text/plain");
        assert!(!response.headers().contains_key("x-amzn-requestid"));
        assert_eq!(response.body().as_ref(), b"missing");
    }
}
