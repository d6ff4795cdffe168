//! IP Rotator - outbound IP rotation through API Gateway
//!
//! Provisions a pool of AWS API Gateway REST APIs relaying to one site, one
//! per region, and spreads requests for that site across them so the origin
//! sees a different source address from request to request.
//!
//! ## Features
//!
//! - Concurrent per-region provisioning with readiness polling and cleanup
//! - Reuse of gateways left by earlier runs, or forced re-creation
//! - Random endpoint selection and forwarded-for randomisation per request
//! - Scoped use (`IpRotator::scoped`, `GatewayLease`) that always tears the pool down
//! - Local HTTP listener for tools that cannot embed the crate
//!
//! The `testing` feature exposes `gateway::MemoryGatewayApi` and
//! `transport::RecordingExecutor` for tests of code built on the crate.

pub mod config;
pub mod error;
pub mod gateway;
pub mod models;
pub mod rotator;
pub mod server;
pub mod transport;

pub use config::Config;
pub use error::{Result, RotatorError};
pub use models::{Region, RegionPreset, Site, ALL_REGIONS, DEFAULT_REGIONS, EXTRA_REGIONS};
pub use rotator::{GatewayLease, IpRotator, IpRotatorBuilder};
pub use server::RotatorServer;
