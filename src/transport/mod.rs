//! Request routing through the gateway pool
//!
//! `GatewayTransport` is the part callers send requests to. Each request is
//! checked against the site, pointed at a random ready gateway, given a
//! forwarded-for address, executed and stripped of gateway headers.

pub mod executor;
pub mod headers;
#[cfg(any(test, feature = "testing"))]
pub mod recording;
pub mod router;
pub mod selector;

pub use executor::{HttpExecutor, ReqwestExecutor};
#[cfg(any(test, feature = "testing"))]
pub use recording::{RecordedRequest, RecordingExecutor};
pub use router::{GatewayTransport, TransportConfig};
pub use selector::RandomSelector;
