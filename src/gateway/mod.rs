//! Gateway provisioning
//!
//! This module owns the remote side of the rotator:
//! - the control-plane contract (`GatewayApi`), its AWS implementation and an
//!   in-memory one for tests (`testing` feature)
//! - per-region create/find/delete with readiness polling
//! - the pool of regional endpoints and its published ready set

pub mod api;
pub mod aws;
pub mod credentials;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod pool;
pub mod provisioner;
mod sigv4;

pub use api::{ApiError, ApiResult, GatewayApi, GatewaySpec, GatewaySummary, STAGE_NAME};
pub use aws::AwsGatewayApi;
pub use credentials::Credentials;
#[cfg(any(test, feature = "testing"))]
pub use memory::MemoryGatewayApi;
pub use pool::{GatewayPool, PoolOptions, ReadySet, ShutdownReport};
pub use provisioner::{DeleteOutcome, ProvisionConfig, RegionProvisioner};
