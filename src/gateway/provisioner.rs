//! Per-region create/find/delete against the control plane

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{sleep, Instant};
use tracing::{debug, instrument, warn};

use super::api::{ApiError, ApiResult, GatewayApi, GatewaySpec, GatewaySummary, STAGE_NAME};
use crate::error::{Result, RotatorError};
use crate::models::{Endpoint, Region, Site};

/// Slack allowed between our clock and the control plane's when adopting a
/// gateway whose create response was lost
const ADOPT_CLOCK_SKEW_SECS: i64 = 30;

/// Provisioning timing configuration
#[derive(Debug, Clone)]
pub struct ProvisionConfig {
    /// Delay between readiness checks
    pub poll_interval: Duration,
    /// Total time a gateway may take to become ready
    pub ready_timeout: Duration,
    /// Delay before retrying a throttled call
    pub throttle_backoff: Duration,
    /// Maximum number of retries of a throttled call
    pub max_throttle_retries: u32,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            ready_timeout: Duration::from_secs(60),
            throttle_backoff: Duration::from_secs(1),
            max_throttle_retries: 5,
        }
    }
}

/// Result of a successful delete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// The gateway no longer existed
    AlreadyGone,
}

/// Creates, finds and deletes gateways one region at a time
#[derive(Clone)]
pub struct RegionProvisioner {
    api: Arc<dyn GatewayApi>,
    config: ProvisionConfig,
}

impl RegionProvisioner {
    pub fn new(api: Arc<dyn GatewayApi>, config: ProvisionConfig) -> Self {
        Self { api, config }
    }

    pub fn config(&self) -> &ProvisionConfig {
        &self.config
    }

    /// Find a ready gateway already provisioned for `site` in `region`
    #[instrument(skip(self, site), fields(site = %site, region = %region))]
    pub async fn find_existing(&self, site: &Site, region: &Region) -> Result<Option<Endpoint>> {
        let prefix = site.gateway_name();
        let gateways = self.list(region).await?;

        let Some(summary) = gateways.into_iter().find(|g| g.name.starts_with(&prefix)) else {
            return Ok(None);
        };

        debug!(gateway_id = %summary.id, "Found existing gateway");
        if !matches!(
            self.api.stage_deployed(region, &summary.id, STAGE_NAME).await,
            Ok(true)
        ) {
            debug!(gateway_id = %summary.id, "Existing gateway has no deployed stage, finishing its setup");
            let spec = GatewaySpec {
                name: summary.name.clone(),
                target: site.as_str().to_string(),
                stage: STAGE_NAME.to_string(),
            };
            self.retry_throttled(|| self.api.complete_gateway(region, &summary.id, &spec))
                .await
                .map_err(|e| provision_error(region, e))?;
        }
        self.wait_until_ready(region, &summary.id).await?;
        Ok(Some(self.endpoint(region, summary)))
    }

    /// Create a gateway for `site` in `region` and wait until it is invokable
    #[instrument(skip(self, site), fields(site = %site, region = %region))]
    pub async fn create(
        &self,
        site: &Site,
        region: &Region,
        manual_deletion: bool,
    ) -> Result<Endpoint> {
        let spec = GatewaySpec {
            name: if manual_deletion {
                site.manual_gateway_name()
            } else {
                site.gateway_name()
            },
            target: site.as_str().to_string(),
            stage: STAGE_NAME.to_string(),
        };

        let attempt_started = Utc::now();
        let summary = match self
            .retry_throttled(|| self.api.create_gateway(region, &spec))
            .await
        {
            Ok(summary) => summary,
            Err(ApiError::Transport(reason)) => {
                // The gateway may exist even though the response was lost.
                warn!(error = %reason, "Create outcome unknown, looking for the gateway before giving up");
                let adopted = self
                    .adopt_lost_create(region, &spec, attempt_started)
                    .await?
                    .ok_or_else(|| RotatorError::ProvisionError {
                        region: region.to_string(),
                        message: format!("create failed and no gateway was found: {}", reason),
                    })?;
                // How far the lost call got is unknown.
                self.finish_setup(region, &adopted, &spec).await?;
                adopted
            }
            Err(ApiError::Incomplete { gateway, reason }) => {
                warn!(gateway_id = %gateway.id, error = %reason, "Gateway setup interrupted, finishing it");
                self.finish_setup(region, &gateway, &spec).await?;
                gateway
            }
            Err(e) => return Err(provision_error(region, e)),
        };

        debug!(gateway_id = %summary.id, "Gateway created, waiting for deployment");

        if let Err(e) = self.wait_until_ready(region, &summary.id).await {
            // Never leave a gateway that did not become ready behind.
            self.discard(region, &summary.id).await;
            return Err(e);
        }

        Ok(self.endpoint(region, summary))
    }

    /// Delete `endpoint`. Deleting a gateway that is already gone succeeds.
    pub async fn delete(&self, endpoint: &Endpoint) -> Result<DeleteOutcome> {
        self.delete_remote(&endpoint.region, &endpoint.remote_id)
            .await
    }

    /// Delete a gateway by id
    #[instrument(skip(self), fields(region = %region))]
    pub async fn delete_remote(&self, region: &Region, gateway_id: &str) -> Result<DeleteOutcome> {
        match self
            .retry_throttled(|| self.api.delete_gateway(region, gateway_id))
            .await
        {
            Ok(()) => Ok(DeleteOutcome::Deleted),
            Err(ApiError::NotFound) => Ok(DeleteOutcome::AlreadyGone),
            Err(e) => Err(RotatorError::DeleteError {
                region: region.to_string(),
                id: gateway_id.to_string(),
                message: e.to_string(),
            }),
        }
    }

    /// List every gateway in `region`
    pub async fn list(&self, region: &Region) -> Result<Vec<GatewaySummary>> {
        self.retry_throttled(|| self.api.list_gateways(region))
            .await
            .map_err(|e| provision_error(region, e))
    }

    /// Poll until the gateway's stage is deployed or the timeout elapses
    async fn wait_until_ready(&self, region: &Region, gateway_id: &str) -> Result<()> {
        let started = Instant::now();
        let deadline = started + self.config.ready_timeout;

        loop {
            match self.api.stage_deployed(region, gateway_id, STAGE_NAME).await {
                Ok(true) => {
                    debug!(gateway_id, waited_ms = started.elapsed().as_millis() as u64, "Gateway ready");
                    return Ok(());
                }
                // Freshly created gateways may not be visible yet.
                Ok(false)
                | Err(ApiError::NotFound)
                | Err(ApiError::Transport(_))
                | Err(ApiError::Throttled(_)) => {}
                Err(e) => return Err(provision_error(region, e)),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(RotatorError::ProvisionTimeout {
                    region: region.to_string(),
                    waited: started.elapsed(),
                });
            }
            sleep(self.config.poll_interval.min(deadline - now)).await;
        }
    }

    /// Complete the setup of a gateway we created, deleting it on failure
    async fn finish_setup(
        &self,
        region: &Region,
        gateway: &GatewaySummary,
        spec: &GatewaySpec,
    ) -> Result<()> {
        match self
            .retry_throttled(|| self.api.complete_gateway(region, &gateway.id, spec))
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => {
                self.discard(region, &gateway.id).await;
                Err(provision_error(region, e))
            }
        }
    }

    /// Best-effort delete of a gateway that will not join the pool
    async fn discard(&self, region: &Region, gateway_id: &str) {
        if let Err(e) = self.delete_remote(region, gateway_id).await {
            warn!(gateway_id, error = %e, "Failed to remove unusable gateway, a sweep will remove it");
        }
    }

    async fn adopt_lost_create(
        &self,
        region: &Region,
        spec: &GatewaySpec,
        attempt_started: chrono::DateTime<Utc>,
    ) -> Result<Option<GatewaySummary>> {
        let earliest = attempt_started - chrono::Duration::seconds(ADOPT_CLOCK_SKEW_SECS);
        let adopted = self
            .list(region)
            .await?
            .into_iter()
            .filter(|g| g.name == spec.name)
            .filter(|g| g.created_at.map_or(false, |t| t >= earliest))
            .max_by_key(|g| g.created_at);

        if let Some(summary) = &adopted {
            debug!(gateway_id = %summary.id, "Adopted gateway from lost create response");
        }
        Ok(adopted)
    }

    async fn retry_throttled<T, F, Fut>(&self, mut op: F) -> ApiResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ApiResult<T>>,
    {
        let mut retries = 0;
        loop {
            match op().await {
                Err(ApiError::Throttled(reason)) if retries < self.config.max_throttle_retries => {
                    retries += 1;
                    debug!(retries, reason = %reason, "Throttled, backing off");
                    sleep(self.config.throttle_backoff).await;
                }
                other => return other,
            }
        }
    }

    fn endpoint(&self, region: &Region, summary: GatewaySummary) -> Endpoint {
        Endpoint {
            region: region.clone(),
            invoke_host: self.api.invoke_host(region, &summary.id),
            remote_id: summary.id,
            name: summary.name,
            created_at: summary.created_at.unwrap_or_else(Utc::now),
            ready: true,
        }
    }
}

fn provision_error(region: &Region, err: ApiError) -> RotatorError {
    let message = match err {
        ApiError::RegionDisabled => {
            "region is not enabled for this account (some regions require manual opt-in)"
                .to_string()
        }
        other => other.to_string(),
    };
    RotatorError::ProvisionError {
        region: region.to_string(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MemoryGatewayApi;

    fn fast_config() -> ProvisionConfig {
        ProvisionConfig {
            poll_interval: Duration::from_millis(5),
            ready_timeout: Duration::from_millis(200),
            throttle_backoff: Duration::from_millis(1),
            max_throttle_retries: 3,
        }
    }

    fn site() -> Site {
        Site::parse("https://example.com").unwrap()
    }

    fn provisioner(api: &Arc<MemoryGatewayApi>) -> RegionProvisioner {
        RegionProvisioner::new(api.clone(), fast_config())
    }

    #[tokio::test]
    async fn test_create_waits_for_readiness() {
        let api = Arc::new(MemoryGatewayApi::new().ready_after_polls(3));
        let region = Region::from("us-east-1");

        let endpoint = provisioner(&api).create(&site(), &region, false).await.unwrap();

        assert!(endpoint.ready);
        assert_eq!(endpoint.region, region);
        assert_eq!(endpoint.name, "https://example.com - IP Rotate API");
        assert_eq!(
            endpoint.invoke_host,
            format!("{}.execute-api.us-east-1.amazonaws.com", endpoint.remote_id)
        );
    }

    #[tokio::test]
    async fn test_create_timeout_removes_gateway() {
        let api = Arc::new(MemoryGatewayApi::new().ready_after_polls(u32::MAX));
        let region = Region::from("us-east-1");

        let err = provisioner(&api)
            .create(&site(), &region, false)
            .await
            .unwrap_err();

        assert!(matches!(err, RotatorError::ProvisionTimeout { .. }));
        assert_eq!(api.total_gateways(), 0);
    }

    #[tokio::test]
    async fn test_create_rejected_region() {
        let api = Arc::new(MemoryGatewayApi::new().reject_region("eu-west-1"));

        let err = provisioner(&api)
            .create(&site(), &Region::from("eu-west-1"), false)
            .await
            .unwrap_err();

        assert!(matches!(err, RotatorError::ProvisionError { .. }));
    }

    #[tokio::test]
    async fn test_create_retries_throttling() {
        let api = Arc::new(MemoryGatewayApi::new().throttle_creates(2));

        let endpoint = provisioner(&api)
            .create(&site(), &Region::from("us-east-1"), false)
            .await
            .unwrap();

        assert!(endpoint.ready);
        assert_eq!(api.create_calls(), 3);
        assert_eq!(api.total_gateways(), 1);
    }

    #[tokio::test]
    async fn test_lost_create_response_adopts_instead_of_duplicating() {
        let api = Arc::new(MemoryGatewayApi::new().lose_create_responses(1));
        let region = Region::from("us-east-1");

        let endpoint = provisioner(&api).create(&site(), &region, false).await.unwrap();

        assert_eq!(api.create_calls(), 1);
        assert_eq!(api.complete_calls(), 1);
        assert_eq!(api.gateways(&region).len(), 1);
        assert_eq!(api.gateways(&region)[0].id, endpoint.remote_id);
        assert!(api
            .stage_deployed(&region, &endpoint.remote_id, STAGE_NAME)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_adopted_gateway_removed_when_setup_cannot_finish() {
        let api = Arc::new(
            MemoryGatewayApi::new()
                .lose_create_responses(1)
                .fail_completions(1)
                .throttle_deletes(2),
        );
        let region = Region::from("us-east-1");

        let err = provisioner(&api)
            .create(&site(), &region, false)
            .await
            .unwrap_err();

        assert!(matches!(err, RotatorError::ProvisionError { .. }));
        assert_eq!(api.total_gateways(), 0);
        assert_eq!(api.delete_calls(), 3);
    }

    #[tokio::test]
    async fn test_interrupted_setup_is_finished() {
        let api = Arc::new(MemoryGatewayApi::new().interrupt_setups(1).ready_after_polls(1));
        let region = Region::from("us-east-1");

        let endpoint = provisioner(&api).create(&site(), &region, false).await.unwrap();

        assert!(endpoint.ready);
        assert_eq!(api.create_calls(), 1);
        assert_eq!(api.complete_calls(), 1);
        assert_eq!(api.gateways(&region).len(), 1);
    }

    #[tokio::test]
    async fn test_find_existing_finishes_partial_gateway() {
        let api = Arc::new(MemoryGatewayApi::new());
        let region = Region::from("us-east-1");
        let partial = api.insert_partial_gateway(region.clone(), "https://example.com - IP Rotate API");

        let found = provisioner(&api)
            .find_existing(&site(), &region)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(found.remote_id, partial.id);
        assert_eq!(api.complete_calls(), 1);
        assert!(api.stage_deployed(&region, &partial.id, STAGE_NAME).await.unwrap());
    }

    #[tokio::test]
    async fn test_manual_deletion_name() {
        let api = Arc::new(MemoryGatewayApi::new());

        let endpoint = provisioner(&api)
            .create(&site(), &Region::from("us-east-1"), true)
            .await
            .unwrap();

        assert!(endpoint.requires_manual_deletion());
    }

    #[tokio::test]
    async fn test_find_existing_matches_site_prefix() {
        let api = Arc::new(MemoryGatewayApi::new());
        let region = Region::from("us-east-1");
        api.insert_gateway(region.clone(), "https://other.example - IP Rotate API");
        let seeded = api.insert_gateway(
            region.clone(),
            "https://example.com - IP Rotate API (Manual Deletion Required)",
        );

        let found = provisioner(&api)
            .find_existing(&site(), &region)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.remote_id, seeded.id);

        let missing = provisioner(&api)
            .find_existing(&site(), &Region::from("eu-west-1"))
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_find_existing_in_disabled_region() {
        let api = Arc::new(MemoryGatewayApi::new().disable_region("af-south-1"));

        let err = provisioner(&api)
            .find_existing(&site(), &Region::from("af-south-1"))
            .await
            .unwrap_err();

        match err {
            RotatorError::ProvisionError { region, message } => {
                assert_eq!(region, "af-south-1");
                assert!(message.contains("opt-in"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let api = Arc::new(MemoryGatewayApi::new());
        let provisioner = provisioner(&api);
        let endpoint = provisioner
            .create(&site(), &Region::from("us-east-1"), false)
            .await
            .unwrap();

        assert_eq!(provisioner.delete(&endpoint).await.unwrap(), DeleteOutcome::Deleted);
        assert_eq!(
            provisioner.delete(&endpoint).await.unwrap(),
            DeleteOutcome::AlreadyGone
        );
    }

    #[tokio::test]
    async fn test_delete_failure_is_reported() {
        let api = Arc::new(MemoryGatewayApi::new().fail_deletes_in("us-east-1"));
        let provisioner = provisioner(&api);
        let endpoint = provisioner
            .create(&site(), &Region::from("us-east-1"), false)
            .await
            .unwrap();

        let err = provisioner.delete(&endpoint).await.unwrap_err();
        assert!(matches!(err, RotatorError::DeleteError { .. }));
    }
}
