//! Pool of regional gateways for one site
//!
//! The pool provisions one gateway per configured region, concurrently, and
//! publishes the gateways that became ready as an immutable `ReadySet`
//! snapshot. Readers never observe a partially built set.

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use futures::future::join_all;
use rand::seq::SliceRandom;
use rand::Rng;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use super::provisioner::{DeleteOutcome, RegionProvisioner};
use crate::error::{Result, RotatorError};
use crate::models::{Endpoint, Region, Site};

/// Log at info when the pool is verbose, at debug otherwise
macro_rules! progress {
    ($verbose:expr, $($arg:tt)+) => {
        if $verbose {
            tracing::info!($($arg)+)
        } else {
            tracing::debug!($($arg)+)
        }
    };
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PoolOptions {
    /// Report per-region progress at info level
    pub verbose: bool,
    /// Never delete this pool's gateways on shutdown
    pub require_manual_deletion: bool,
}

/// Immutable snapshot of the endpoints requests may be routed to
#[derive(Debug, Default)]
pub struct ReadySet {
    endpoints: Vec<Arc<Endpoint>>,
}

impl ReadySet {
    pub fn new(endpoints: impl IntoIterator<Item = Endpoint>) -> Self {
        Self {
            endpoints: endpoints
                .into_iter()
                .filter(|e| e.ready)
                .map(Arc::new)
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Endpoint>> {
        self.endpoints.iter()
    }

    pub fn hosts(&self) -> Vec<&str> {
        self.endpoints.iter().map(|e| e.invoke_host.as_str()).collect()
    }

    /// Pick an endpoint uniformly at random
    pub fn choose<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<Arc<Endpoint>> {
        self.endpoints.choose(rng).cloned()
    }
}

/// Outcome of a shutdown or sweep
#[derive(Debug, Default)]
pub struct ShutdownReport {
    /// Remote ids removed (including ones that were already gone)
    pub deleted: Vec<String>,
    /// Remote ids left in place because they require manual deletion
    pub skipped: Vec<String>,
    pub failed: Vec<RotatorError>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Owns the gateways of one site across regions
pub struct GatewayPool {
    site: Site,
    regions: Vec<Region>,
    provisioner: RegionProvisioner,
    options: PoolOptions,
    endpoints: Mutex<BTreeMap<Region, Endpoint>>,
    ready: ArcSwap<ReadySet>,
}

impl GatewayPool {
    pub fn new(
        site: Site,
        regions: Vec<Region>,
        provisioner: RegionProvisioner,
        options: PoolOptions,
    ) -> Self {
        let mut unique: Vec<Region> = Vec::with_capacity(regions.len());
        for region in regions {
            if !unique.contains(&region) {
                unique.push(region);
            }
        }

        Self {
            site,
            regions: unique,
            provisioner,
            options,
            endpoints: Mutex::new(BTreeMap::new()),
            ready: ArcSwap::from_pointee(ReadySet::default()),
        }
    }

    pub fn site(&self) -> &Site {
        &self.site
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn options(&self) -> PoolOptions {
        self.options
    }

    /// Current ready set; never blocks
    pub fn ready_set(&self) -> Arc<ReadySet> {
        self.ready.load_full()
    }

    /// Every endpoint tracked by the pool, ready or not
    pub async fn endpoints(&self) -> Vec<Endpoint> {
        self.endpoints.lock().await.values().cloned().collect()
    }

    /// Provision a gateway in every region and publish the ready set.
    ///
    /// With `force == false`, gateways already provisioned for the site are
    /// reused. Regions that fail are logged and left out; the call only fails
    /// when no region could be provisioned.
    #[instrument(skip(self), fields(site = %self.site, regions = self.regions.len()))]
    pub async fn start(&self, force: bool) -> Result<Arc<ReadySet>> {
        let mut endpoints = self.endpoints.lock().await;
        if endpoints.values().any(|e| e.ready) {
            warn!("Pool already started, shut it down before provisioning again");
            return self.non_empty_ready_set();
        }
        if !endpoints.is_empty() {
            progress!(
                self.options.verbose,
                "Retrying deletion of {} gateways left by the last shutdown",
                endpoints.len()
            );
            let pending: Vec<Endpoint> = endpoints.values().cloned().collect();
            let report = self.delete_tracked(&mut endpoints, pending).await;
            if !report.is_clean() {
                self.publish(&endpoints);
                return Err(RotatorError::PendingDeletion {
                    remaining: endpoints.len(),
                });
            }
        }

        progress!(
            self.options.verbose,
            "Starting API gateway{} in {} regions",
            if self.regions.len() == 1 { "" } else { "s" },
            self.regions.len()
        );

        let attempts = self.regions.iter().map(|region| async move {
            (region, self.provision_region(region, force).await)
        });

        let mut new_endpoints = 0;
        for (region, result) in join_all(attempts).await {
            match result {
                Ok((endpoint, created)) => {
                    progress!(
                        self.options.verbose,
                        region = %region,
                        gateway_id = %endpoint.remote_id,
                        "{} gateway {}",
                        if created { "Created" } else { "Reusing" },
                        endpoint.invoke_host
                    );
                    if created {
                        new_endpoints += 1;
                    }
                    endpoints.insert(region.clone(), endpoint);
                }
                Err(e) => {
                    warn!(region = %region, error = %e, "Region left out of the pool");
                }
            }
        }

        self.publish(&endpoints);
        progress!(
            self.options.verbose,
            "Using {} endpoints with name '{}' ({} new)",
            endpoints.len(),
            self.site.gateway_name(),
            new_endpoints
        );

        self.non_empty_ready_set()
    }

    /// Adopt gateways provisioned elsewhere, identified by their invoke hosts.
    /// No remote call is made.
    pub async fn start_with_endpoints<S: AsRef<str>>(&self, hosts: &[S]) -> Result<Arc<ReadySet>> {
        if hosts.is_empty() {
            return Err(RotatorError::InvalidConfig("no endpoints given".into()));
        }
        let parsed = hosts
            .iter()
            .map(|h| Endpoint::from_invoke_host(h.as_ref()))
            .collect::<Result<Vec<_>>>()?;

        let mut endpoints = self.endpoints.lock().await;
        if !endpoints.is_empty() {
            warn!("Pool already started, shut it down before adopting endpoints");
            return self.non_empty_ready_set();
        }

        for mut endpoint in parsed {
            endpoint.name = self.site.gateway_name();
            if let Some(previous) = endpoints.insert(endpoint.region.clone(), endpoint) {
                warn!(
                    region = %previous.region,
                    gateway_id = %previous.remote_id,
                    "Several endpoints given for one region, keeping the last"
                );
            }
        }

        self.publish(&endpoints);
        progress!(self.options.verbose, "Using {} provided endpoints", endpoints.len());
        self.non_empty_ready_set()
    }

    /// Delete the pool's gateways, or only those in `endpoint_ids` (remote ids
    /// or invoke hosts).
    ///
    /// Targets leave the ready set before any deletion starts. Gateways that
    /// require manual deletion are released from the pool but kept remotely.
    /// Failed deletions stay tracked, not ready, so a later call retries them.
    #[instrument(skip(self, endpoint_ids), fields(site = %self.site))]
    pub async fn shutdown(&self, endpoint_ids: Option<&[String]>) -> ShutdownReport {
        let mut report = ShutdownReport::default();
        let mut endpoints = self.endpoints.lock().await;

        let targets: Vec<Endpoint> = endpoints
            .values()
            .filter(|e| endpoint_ids.map_or(true, |ids| ids.iter().any(|id| e.matches_id(id))))
            .cloned()
            .collect();
        if targets.is_empty() {
            debug!("No endpoints to shut down");
            return report;
        }

        progress!(
            self.options.verbose,
            "Deleting gateway{} for site '{}'",
            if targets.len() == 1 { "" } else { "s" },
            self.site
        );

        let mut deletable = Vec::with_capacity(targets.len());
        for endpoint in targets {
            if self.options.require_manual_deletion || endpoint.requires_manual_deletion() {
                warn!(
                    region = %endpoint.region,
                    gateway_id = %endpoint.remote_id,
                    "Gateway requires manual deletion, leaving it in place"
                );
                endpoints.remove(&endpoint.region);
                report.skipped.push(endpoint.remote_id);
            } else {
                if let Some(tracked) = endpoints.get_mut(&endpoint.region) {
                    tracked.ready = false;
                }
                deletable.push(endpoint);
            }
        }
        self.publish(&endpoints);

        let deleted = self.delete_tracked(&mut endpoints, deletable).await;
        report.deleted.extend(deleted.deleted);
        report.failed.extend(deleted.failed);

        self.publish(&endpoints);
        progress!(
            self.options.verbose,
            "Deleted {} endpoints for site '{}'",
            report.deleted.len(),
            self.site
        );
        report
    }

    /// Delete every gateway named for this site in the configured regions,
    /// including ones leaked by earlier processes. Gateways that require
    /// manual deletion carry a different name and are never swept.
    #[instrument(skip(self), fields(site = %self.site))]
    pub async fn sweep(&self) -> ShutdownReport {
        let mut report = ShutdownReport::default();
        let mut endpoints = self.endpoints.lock().await;
        let name = self.site.gateway_name();

        let sweeps = self
            .regions
            .iter()
            .map(|region| self.sweep_region(region, &name));

        for (region, deleted, failed) in join_all(sweeps).await {
            if endpoints
                .get(region)
                .is_some_and(|e| deleted.contains(&e.remote_id))
            {
                endpoints.remove(region);
            }
            report.deleted.extend(deleted);
            report.failed.extend(failed);
        }

        self.publish(&endpoints);
        progress!(
            self.options.verbose,
            "Swept {} gateways for site '{}'",
            report.deleted.len(),
            self.site
        );
        report
    }

    /// Delete `targets` concurrently, untracking each one that is gone
    async fn delete_tracked(
        &self,
        endpoints: &mut BTreeMap<Region, Endpoint>,
        targets: Vec<Endpoint>,
    ) -> ShutdownReport {
        let mut report = ShutdownReport::default();
        let deletions = targets
            .iter()
            .map(|endpoint| async move { (endpoint, self.provisioner.delete(endpoint).await) });

        for (endpoint, result) in join_all(deletions).await {
            match result {
                Ok(outcome) => {
                    if outcome == DeleteOutcome::AlreadyGone {
                        debug!(gateway_id = %endpoint.remote_id, "Gateway was already deleted");
                    }
                    endpoints.remove(&endpoint.region);
                    report.deleted.push(endpoint.remote_id.clone());
                }
                Err(e) => {
                    warn!(region = %endpoint.region, error = %e, "Failed to delete gateway");
                    report.failed.push(e);
                }
            }
        }
        report
    }

    async fn sweep_region<'a>(
        &self,
        region: &'a Region,
        name: &str,
    ) -> (&'a Region, Vec<String>, Vec<RotatorError>) {
        let mut deleted = Vec::new();
        let mut failed = Vec::new();

        let gateways = match self.provisioner.list(region).await {
            Ok(gateways) => gateways,
            Err(e) => {
                debug!(region = %region, error = %e, "Skipping region during sweep");
                return (region, deleted, failed);
            }
        };

        for gateway in gateways.into_iter().filter(|g| g.name == name) {
            match self.provisioner.delete_remote(region, &gateway.id).await {
                Ok(_) => deleted.push(gateway.id),
                Err(e) => {
                    warn!(region = %region, error = %e, "Failed to sweep gateway");
                    failed.push(e);
                }
            }
        }

        (region, deleted, failed)
    }

    async fn provision_region(&self, region: &Region, force: bool) -> Result<(Endpoint, bool)> {
        if !force {
            if let Some(existing) = self.provisioner.find_existing(&self.site, region).await? {
                return Ok((existing, false));
            }
        }

        let endpoint = self
            .provisioner
            .create(&self.site, region, self.options.require_manual_deletion)
            .await?;
        Ok((endpoint, true))
    }

    fn publish(&self, endpoints: &BTreeMap<Region, Endpoint>) {
        self.ready
            .store(Arc::new(ReadySet::new(endpoints.values().cloned())));
    }

    fn non_empty_ready_set(&self) -> Result<Arc<ReadySet>> {
        let ready = self.ready_set();
        if ready.is_empty() {
            return Err(RotatorError::NoRegionsAvailable);
        }
        Ok(ready)
    }
}
