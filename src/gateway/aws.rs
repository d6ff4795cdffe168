//! API Gateway REST control plane over signed HTTPS calls

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};
use url::Url;

use super::api::{ApiError, ApiResult, GatewayApi, GatewaySpec, GatewaySummary, RELAY_FORWARDED_FOR};
use super::sigv4::{self, SigningRequest};
use super::Credentials;
use crate::error::{Result, RotatorError};
use crate::models::Region;

const SERVICE: &str = "apigateway";
const PAGE_LIMIT: &str = "500";
const PROXY_PATH_PART: &str = "{proxy+}";

#[derive(Debug, Deserialize)]
struct RestApi {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(rename = "createdDate", default)]
    created_date: Option<f64>,
}

impl From<RestApi> for GatewaySummary {
    fn from(api: RestApi) -> Self {
        GatewaySummary {
            id: api.id,
            name: api.name,
            created_at: api
                .created_date
                .and_then(|secs| DateTime::<Utc>::from_timestamp(secs as i64, 0)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RestApiPage {
    #[serde(rename = "item", default)]
    items: Vec<RestApi>,
    #[serde(default)]
    position: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Resource {
    id: String,
    #[serde(default)]
    path: String,
}

#[derive(Debug, Deserialize)]
struct ResourcePage {
    #[serde(rename = "item", default)]
    items: Vec<Resource>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(alias = "Message", default)]
    message: String,
}

/// `GatewayApi` backed by the AWS API Gateway REST API
pub struct AwsGatewayApi {
    client: Client,
    credentials: Credentials,
    endpoint_override: Option<Url>,
}

impl AwsGatewayApi {
    pub fn new(credentials: Credentials) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| RotatorError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            credentials,
            endpoint_override: None,
        })
    }

    /// Send every control-plane call to `url` instead of the regional AWS endpoint
    pub fn with_endpoint_url(mut self, url: Url) -> Self {
        self.endpoint_override = Some(url);
        self
    }

    fn base_url(&self, region: &Region) -> String {
        match &self.endpoint_override {
            Some(url) => url.as_str().trim_end_matches('/').to_string(),
            None => format!("https://{}.{}.amazonaws.com", SERVICE, region),
        }
    }

    fn host(&self, region: &Region) -> String {
        match &self.endpoint_override {
            Some(url) => match (url.host_str(), url.port()) {
                (Some(host), Some(port)) => format!("{}:{}", host, port),
                (Some(host), None) => host.to_string(),
                _ => String::new(),
            },
            None => format!("{}.{}.amazonaws.com", SERVICE, region),
        }
    }

    async fn send(
        &self,
        region: &Region,
        method: Method,
        path: &str,
        query: &[(String, String)],
        body: Option<Value>,
    ) -> ApiResult<Bytes> {
        let body = match body {
            Some(value) => serde_json::to_vec(&value)
                .map_err(|e| ApiError::Transport(format!("Failed to encode body: {}", e)))?,
            None => Vec::new(),
        };

        let host = self.host(region);
        let signed = sigv4::sign(
            &self.credentials,
            region.as_str(),
            SERVICE,
            &SigningRequest {
                method: method.as_str(),
                host: &host,
                path,
                query,
                body: &body,
            },
            Utc::now(),
        );

        let url = format!("{}{}", self.base_url(region), path);
        debug!("{} {}", method, url);

        let mut builder = self
            .client
            .request(method, &url)
            .query(query)
            .header("authorization", signed.authorization)
            .header("x-amz-date", signed.amz_date)
            .header("accept", "application/json");
        if let Some(token) = signed.security_token {
            builder = builder.header("x-amz-security-token", token);
        }
        if !body.is_empty() {
            builder = builder.header("content-type", "application/json").body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        let status = response.status();
        let error_type = response
            .headers()
            .get("x-amzn-errortype")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(':').next().unwrap_or(v).to_string());
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        if status.is_success() {
            return Ok(bytes);
        }

        let message = serde_json::from_slice::<ErrorBody>(&bytes)
            .unwrap_or_default()
            .message;
        Err(classify(status.as_u16(), error_type, message))
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        region: &Region,
        method: Method,
        path: &str,
        query: &[(String, String)],
        body: Option<Value>,
    ) -> ApiResult<T> {
        let bytes = self.send(region, method, path, query, body).await?;
        serde_json::from_slice(&bytes).map_err(|e| ApiError::Rejected {
            code: "InvalidResponse".to_string(),
            message: e.to_string(),
        })
    }

    /// Route every method on `resource_id` through an HTTP proxy integration to `uri`
    async fn wire_proxy(
        &self,
        region: &Region,
        api_id: &str,
        resource_id: &str,
        uri: &str,
    ) -> ApiResult<()> {
        let relay_header = format!("method.request.header.{}", RELAY_FORWARDED_FOR);
        let method_path = format!("/restapis/{}/resources/{}/methods/ANY", api_id, resource_id);

        let mut method_params = serde_json::Map::new();
        method_params.insert("method.request.path.proxy".to_string(), Value::Bool(true));
        method_params.insert(relay_header.clone(), Value::Bool(true));

        let method = self
            .send(
                region,
                Method::PUT,
                &method_path,
                &[],
                Some(json!({
                    "authorizationType": "NONE",
                    "requestParameters": method_params,
                })),
            )
            .await;
        match method {
            Ok(_) => {}
            // Left by an earlier, interrupted setup; the integration below is overwritten.
            Err(ApiError::Rejected { code, .. }) if code == "ConflictException" => {
                debug!(resource_id, "Method already exists");
            }
            Err(e) => return Err(e),
        }

        self.send(
            region,
            Method::PUT,
            &format!("{}/integration", method_path),
            &[],
            Some(json!({
                "type": "HTTP_PROXY",
                "httpMethod": "ANY",
                "uri": uri,
                "connectionType": "INTERNET",
                "requestParameters": {
                    "integration.request.path.proxy": "method.request.path.proxy",
                    "integration.request.header.X-Forwarded-For": relay_header,
                },
            })),
        )
        .await?;

        Ok(())
    }

    /// Add the proxy resources and deploy the stage. Steps already done by an
    /// earlier attempt are reused, so this can run again on the same API.
    async fn build_gateway(&self, region: &Region, api_id: &str, spec: &GatewaySpec) -> ApiResult<()> {
        let resources: ResourcePage = self
            .send_json(region, Method::GET, &format!("/restapis/{}/resources", api_id), &[], None)
            .await?;
        let root_id = resources
            .items
            .iter()
            .find(|r| r.path == "/")
            .or_else(|| resources.items.first())
            .map(|r| r.id.clone())
            .ok_or_else(|| ApiError::Rejected {
                code: "InvalidResponse".to_string(),
                message: "REST API has no root resource".to_string(),
            })?;

        let proxy_path = format!("/{}", PROXY_PATH_PART);
        let existing = resources.items.into_iter().find(|r| r.path == proxy_path);
        let proxy_resource: Resource = match existing {
            Some(existing) => existing,
            None => {
                self.send_json(
                    region,
                    Method::POST,
                    &format!("/restapis/{}/resources/{}", api_id, root_id),
                    &[],
                    Some(json!({ "pathPart": PROXY_PATH_PART })),
                )
                .await?
            }
        };

        self.wire_proxy(region, api_id, &root_id, &spec.target).await?;
        self.wire_proxy(
            region,
            api_id,
            &proxy_resource.id,
            &format!("{}/{{proxy}}", spec.target),
        )
        .await?;

        self.send(
            region,
            Method::POST,
            &format!("/restapis/{}/deployments", api_id),
            &[],
            Some(json!({ "stageName": spec.stage })),
        )
        .await?;

        Ok(())
    }
}

#[async_trait]
impl GatewayApi for AwsGatewayApi {
    #[instrument(skip(self), fields(region = %region))]
    async fn list_gateways(&self, region: &Region) -> ApiResult<Vec<GatewaySummary>> {
        let mut gateways = Vec::new();
        let mut position: Option<String> = None;

        loop {
            let mut query = vec![("limit".to_string(), PAGE_LIMIT.to_string())];
            if let Some(position) = &position {
                query.push(("position".to_string(), position.clone()));
            }

            let page: RestApiPage = self
                .send_json(region, Method::GET, "/restapis", &query, None)
                .await?;
            gateways.extend(page.items.into_iter().map(GatewaySummary::from));

            match page.position {
                Some(next) if !next.is_empty() => position = Some(next),
                _ => break,
            }
        }

        Ok(gateways)
    }

    #[instrument(skip(self, spec), fields(region = %region, name = %spec.name))]
    async fn create_gateway(
        &self,
        region: &Region,
        spec: &GatewaySpec,
    ) -> ApiResult<GatewaySummary> {
        let created: RestApi = self
            .send_json(
                region,
                Method::POST,
                "/restapis",
                &[],
                Some(json!({
                    "name": spec.name,
                    "endpointConfiguration": { "types": ["REGIONAL"] },
                })),
            )
            .await?;

        let summary = GatewaySummary::from(created);
        if let Err(e) = self.build_gateway(region, &summary.id, spec).await {
            warn!(gateway_id = %summary.id, error = %e, "Gateway created but its setup failed");
            return Err(ApiError::Incomplete {
                gateway: summary,
                reason: e.to_string(),
            });
        }

        Ok(summary)
    }

    #[instrument(skip(self, spec), fields(region = %region))]
    async fn complete_gateway(
        &self,
        region: &Region,
        gateway_id: &str,
        spec: &GatewaySpec,
    ) -> ApiResult<()> {
        self.build_gateway(region, gateway_id, spec).await
    }

    async fn stage_deployed(&self, region: &Region, gateway_id: &str, stage: &str) -> ApiResult<bool> {
        match self
            .send(
                region,
                Method::GET,
                &format!("/restapis/{}/stages/{}", gateway_id, stage),
                &[],
                None,
            )
            .await
        {
            Ok(_) => Ok(true),
            Err(ApiError::NotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self), fields(region = %region))]
    async fn delete_gateway(&self, region: &Region, gateway_id: &str) -> ApiResult<()> {
        self.send(
            region,
            Method::DELETE,
            &format!("/restapis/{}", gateway_id),
            &[],
            None,
        )
        .await
        .map(|_| ())
    }
}

/// Map an error response onto the control-plane error taxonomy
fn classify(status: u16, error_type: Option<String>, message: String) -> ApiError {
    match error_type.as_deref() {
        Some("NotFoundException") => ApiError::NotFound,
        Some("TooManyRequestsException") => ApiError::Throttled(message),
        Some("UnrecognizedClientException") => ApiError::RegionDisabled,
        Some(code) => ApiError::Rejected {
            code: code.to_string(),
            message,
        },
        None => match status {
            404 => ApiError::NotFound,
            429 => ApiError::Throttled(message),
            _ => ApiError::Rejected {
                code: format!("HTTP{}", status),
                message,
            },
        },
    }
}
