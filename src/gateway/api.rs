//! Control-plane contract for regional gateways

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{Endpoint, Region};

/// Stage every gateway is deployed to; requests are routed under `/{STAGE_NAME}/`
pub const STAGE_NAME: &str = "ProxyStage";

/// Header the gateway maps onto the origin's `X-Forwarded-For`
pub const RELAY_FORWARDED_FOR: &str = "X-My-X-Forwarded-For";

/// Control-plane failure, classified so callers can decide on retry and idempotence
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("not found")]
    NotFound,

    #[error("throttled: {0}")]
    Throttled(String),

    /// The account has not opted into the region
    #[error("region not enabled for this account")]
    RegionDisabled,

    #[error("{code}: {message}")]
    Rejected { code: String, message: String },

    /// The outcome of the call is unknown (connection reset, timeout)
    #[error("transport error: {0}")]
    Transport(String),

    /// The gateway exists but was not fully wired and deployed
    #[error("gateway {} left partially configured: {reason}", .gateway.id)]
    Incomplete {
        gateway: GatewaySummary,
        reason: String,
    },
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// A gateway as reported by the control plane
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewaySummary {
    pub id: String,
    pub name: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// What to create: a wildcard HTTP proxy to `target`, deployed to `stage`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewaySpec {
    pub name: String,
    pub target: String,
    pub stage: String,
}

/// Remote provisioning API, keyed by region
///
/// Implementations are expected to be eventually consistent: a gateway
/// returned by `create_gateway` may not be invokable until
/// `stage_deployed` reports true.
#[async_trait]
pub trait GatewayApi: Send + Sync {
    /// List every gateway in the region, following pagination
    async fn list_gateways(&self, region: &Region) -> ApiResult<Vec<GatewaySummary>>;

    /// Create and deploy a gateway
    ///
    /// When the gateway is created but a later setup step fails, the error is
    /// `ApiError::Incomplete` and the gateway is left in place.
    async fn create_gateway(&self, region: &Region, spec: &GatewaySpec)
        -> ApiResult<GatewaySummary>;

    /// Wire the proxy resources of an existing gateway and deploy its stage.
    /// Running it on a gateway that is already set up redeploys it.
    async fn complete_gateway(&self, region: &Region, gateway_id: &str, spec: &GatewaySpec)
        -> ApiResult<()>;

    /// Whether the gateway's stage is deployed and invokable
    async fn stage_deployed(&self, region: &Region, gateway_id: &str, stage: &str)
        -> ApiResult<bool>;

    /// Delete a gateway. Deleting a missing gateway yields `ApiError::NotFound`.
    async fn delete_gateway(&self, region: &Region, gateway_id: &str) -> ApiResult<()>;

    /// Host requests for this gateway are sent to
    fn invoke_host(&self, region: &Region, gateway_id: &str) -> String {
        Endpoint::aws_invoke_host(gateway_id, region)
    }
}
