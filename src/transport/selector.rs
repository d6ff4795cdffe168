//! Random endpoint selection

use std::net::Ipv4Addr;
use std::sync::Arc;

use http::HeaderMap;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::headers;
use crate::error::{Result, RotatorError};
use crate::gateway::ReadySet;
use crate::models::Endpoint;

/// Picks a ready endpoint uniformly at random for every request.
///
/// Holds the router's only source of randomness, so a seeded selector makes
/// endpoint choice and generated addresses reproducible.
pub struct RandomSelector {
    rng: Mutex<StdRng>,
}

impl RandomSelector {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    pub fn with_rng(rng: StdRng) -> Self {
        Self {
            rng: Mutex::new(rng),
        }
    }

    pub fn select(&self, ready: &ReadySet) -> Result<Arc<Endpoint>> {
        let mut rng = self.rng.lock();
        ready.choose(&mut *rng).ok_or(RotatorError::NoEndpointsAvailable)
    }

    pub fn apply_forwarded_for(&self, map: &mut HeaderMap) {
        headers::apply_forwarded_for(map, &mut *self.rng.lock());
    }

    pub fn random_ipv4(&self) -> Ipv4Addr {
        headers::random_ipv4(&mut *self.rng.lock())
    }
}

impl Default for RandomSelector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Region;
    use chrono::Utc;
    use std::collections::HashSet;

    fn create_test_endpoint(id: &str, region: &str) -> Endpoint {
        let region = Region::from(region);
        Endpoint {
            invoke_host: Endpoint::aws_invoke_host(id, &region),
            region,
            remote_id: id.to_string(),
            name: "https://example.com - IP Rotate API".to_string(),
            created_at: Utc::now(),
            ready: true,
        }
    }

    #[test]
    fn test_select_from_empty_set() {
        let selector = RandomSelector::seeded(1);
        let result = selector.select(&ReadySet::default());
        assert!(matches!(result, Err(RotatorError::NoEndpointsAvailable)));
    }

    #[test]
    fn test_select_covers_every_endpoint() {
        let selector = RandomSelector::seeded(42);
        let ready = ReadySet::new(vec![
            create_test_endpoint("aaa", "us-east-1"),
            create_test_endpoint("bbb", "us-west-2"),
            create_test_endpoint("ccc", "eu-west-1"),
        ]);

        let mut seen = HashSet::new();
        for _ in 0..200 {
            seen.insert(selector.select(&ready).unwrap().remote_id.clone());
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn test_not_ready_endpoints_are_never_selected() {
        let selector = RandomSelector::seeded(3);
        let mut pending = create_test_endpoint("pending", "us-east-1");
        pending.ready = false;
        let ready = ReadySet::new(vec![pending, create_test_endpoint("live", "us-east-2")]);

        for _ in 0..50 {
            assert_eq!(selector.select(&ready).unwrap().remote_id, "live");
        }
    }

    #[test]
    fn test_seeded_selectors_agree() {
        let a = RandomSelector::seeded(9);
        let b = RandomSelector::seeded(9);
        for _ in 0..10 {
            assert_eq!(a.random_ipv4(), b.random_ipv4());
        }
    }
}
