//! In-process control plane with failure injection
//!
//! Mirrors the observable behavior of the AWS control plane closely enough
//! to exercise provisioning, readiness polling and teardown without network
//! access.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use super::api::{ApiError, ApiResult, GatewayApi, GatewaySpec, GatewaySummary};
use crate::models::Region;

#[derive(Debug, Clone)]
struct StoredGateway {
    summary: GatewaySummary,
    stage: String,
    pending_polls: u32,
}

/// Fake `GatewayApi` keeping gateways in memory
#[derive(Debug, Default)]
pub struct MemoryGatewayApi {
    gateways: DashMap<Region, Vec<StoredGateway>>,
    rejected: HashSet<Region>,
    disabled: HashSet<Region>,
    failing_deletes: HashSet<Region>,
    ready_after_polls: u32,
    throttled_creates: AtomicU32,
    lost_create_responses: AtomicU32,
    interrupted_setups: AtomicU32,
    failed_completions: AtomicU32,
    throttled_deletes: AtomicU32,
    failed_deletes: AtomicU32,
    next_id: AtomicU64,
    calls: AtomicUsize,
    create_calls: AtomicUsize,
    complete_calls: AtomicUsize,
    delete_calls: AtomicUsize,
}

impl MemoryGatewayApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every create/list in `region` is rejected (quota, invalid region)
    pub fn reject_region(mut self, region: impl Into<Region>) -> Self {
        self.rejected.insert(region.into());
        self
    }

    /// `region` behaves like an opt-in region the account has not enabled
    pub fn disable_region(mut self, region: impl Into<Region>) -> Self {
        self.disabled.insert(region.into());
        self
    }

    /// Deletes in `region` fail with an access error
    pub fn fail_deletes_in(mut self, region: impl Into<Region>) -> Self {
        self.failing_deletes.insert(region.into());
        self
    }

    /// New gateways report their stage deployed only after `polls` checks
    pub fn ready_after_polls(mut self, polls: u32) -> Self {
        self.ready_after_polls = polls;
        self
    }

    /// The next `count` create calls are throttled
    pub fn throttle_creates(self, count: u32) -> Self {
        self.throttled_creates.store(count, Ordering::SeqCst);
        self
    }

    /// The next `count` creates leave an unwired gateway behind and the
    /// caller sees a transport error
    pub fn lose_create_responses(self, count: u32) -> Self {
        self.lost_create_responses.store(count, Ordering::SeqCst);
        self
    }

    /// The next `count` creates stop after creating the gateway, before its
    /// stage is deployed
    pub fn interrupt_setups(self, count: u32) -> Self {
        self.interrupted_setups.store(count, Ordering::SeqCst);
        self
    }

    /// The next `count` calls to `complete_gateway` are rejected
    pub fn fail_completions(self, count: u32) -> Self {
        self.failed_completions.store(count, Ordering::SeqCst);
        self
    }

    /// The next `count` deletes are throttled
    pub fn throttle_deletes(self, count: u32) -> Self {
        self.throttled_deletes.store(count, Ordering::SeqCst);
        self
    }

    /// The next `count` deletes fail with an access error
    pub fn fail_next_deletes(self, count: u32) -> Self {
        self.failed_deletes.store(count, Ordering::SeqCst);
        self
    }

    /// Seed a gateway that already exists before the pool starts
    pub fn insert_gateway(&self, region: impl Into<Region>, name: &str) -> GatewaySummary {
        self.store(region.into(), name, super::STAGE_NAME, 0)
    }

    /// Seed a gateway whose setup never finished: no stage is deployed
    pub fn insert_partial_gateway(&self, region: impl Into<Region>, name: &str) -> GatewaySummary {
        self.store(region.into(), name, "", 0)
    }

    /// Gateways currently present in `region`
    pub fn gateways(&self, region: &Region) -> Vec<GatewaySummary> {
        self.gateways
            .get(region)
            .map(|list| list.iter().map(|g| g.summary.clone()).collect())
            .unwrap_or_default()
    }

    pub fn total_gateways(&self) -> usize {
        self.gateways.iter().map(|entry| entry.value().len()).sum()
    }

    /// Number of control-plane calls received so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn complete_calls(&self) -> usize {
        self.complete_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    fn allocate_id(&self) -> String {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        format!("mem{:07}", n)
    }

    fn store(&self, region: Region, name: &str, stage: &str, pending_polls: u32) -> GatewaySummary {
        let summary = GatewaySummary {
            id: self.allocate_id(),
            name: name.to_string(),
            created_at: Some(Utc::now()),
        };
        self.gateways.entry(region).or_default().push(StoredGateway {
            summary: summary.clone(),
            stage: stage.to_string(),
            pending_polls,
        });
        summary
    }

    fn access_denied(action: &str) -> ApiError {
        ApiError::Rejected {
            code: "AccessDeniedException".to_string(),
            message: format!("not authorized to perform apigateway:{}", action),
        }
    }

    fn check_region(&self, region: &Region) -> ApiResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.disabled.contains(region) {
            return Err(ApiError::RegionDisabled);
        }
        if self.rejected.contains(region) {
            return Err(ApiError::Rejected {
                code: "BadRequestException".to_string(),
                message: format!("region {} rejected the request", region),
            });
        }
        Ok(())
    }

    /// Decrement `counter` if positive, returning whether it was
    fn take(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl GatewayApi for MemoryGatewayApi {
    async fn list_gateways(&self, region: &Region) -> ApiResult<Vec<GatewaySummary>> {
        self.check_region(region)?;
        Ok(self.gateways(region))
    }

    async fn create_gateway(
        &self,
        region: &Region,
        spec: &GatewaySpec,
    ) -> ApiResult<GatewaySummary> {
        self.check_region(region)?;
        self.create_calls.fetch_add(1, Ordering::SeqCst);

        if Self::take(&self.throttled_creates) {
            return Err(ApiError::Throttled("Too Many Requests".to_string()));
        }

        if Self::take(&self.lost_create_responses) {
            self.store(region.clone(), &spec.name, "", 0);
            return Err(ApiError::Transport("connection reset by peer".to_string()));
        }
        if Self::take(&self.interrupted_setups) {
            let gateway = self.store(region.clone(), &spec.name, "", 0);
            return Err(ApiError::Incomplete {
                gateway,
                reason: "throttled: Too Many Requests".to_string(),
            });
        }

        Ok(self.store(region.clone(), &spec.name, &spec.stage, self.ready_after_polls))
    }

    async fn complete_gateway(
        &self,
        region: &Region,
        gateway_id: &str,
        spec: &GatewaySpec,
    ) -> ApiResult<()> {
        self.check_region(region)?;
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take(&self.failed_completions) {
            return Err(Self::access_denied("PUT"));
        }

        let mut list = self.gateways.get_mut(region).ok_or(ApiError::NotFound)?;
        let gateway = list
            .iter_mut()
            .find(|g| g.summary.id == gateway_id)
            .ok_or(ApiError::NotFound)?;
        gateway.stage = spec.stage.clone();
        gateway.pending_polls = self.ready_after_polls;
        Ok(())
    }

    async fn stage_deployed(
        &self,
        region: &Region,
        gateway_id: &str,
        stage: &str,
    ) -> ApiResult<bool> {
        self.check_region(region)?;
        let mut list = self.gateways.get_mut(region).ok_or(ApiError::NotFound)?;
        let gateway = list
            .iter_mut()
            .find(|g| g.summary.id == gateway_id)
            .ok_or(ApiError::NotFound)?;

        if gateway.stage != stage {
            return Ok(false);
        }
        if gateway.pending_polls > 0 {
            gateway.pending_polls -= 1;
            return Ok(false);
        }
        Ok(true)
    }

    async fn delete_gateway(&self, region: &Region, gateway_id: &str) -> ApiResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if self.disabled.contains(region) {
            return Err(ApiError::RegionDisabled);
        }
        if Self::take(&self.throttled_deletes) {
            return Err(ApiError::Throttled("Too Many Requests".to_string()));
        }
        if self.failing_deletes.contains(region) || Self::take(&self.failed_deletes) {
            return Err(Self::access_denied("DELETE"));
        }

        let mut list = self.gateways.get_mut(region).ok_or(ApiError::NotFound)?;
        let before = list.len();
        list.retain(|g| g.summary.id != gateway_id);
        if list.len() == before {
            return Err(ApiError::NotFound);
        }
        Ok(())
    }
}
