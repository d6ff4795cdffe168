//! Lifecycle management of a rotator
//!
//! `IpRotator` ties a `GatewayPool` to a `GatewayTransport`. Gateways cost
//! money and are visible in the account, so the rotator offers two scoped ways
//! to use them that always shut the pool down:
//!
//! - [`IpRotator::scoped`] runs a closure between start and shutdown, even when
//!   the closure panics;
//! - [`IpRotator::acquire`] returns a [`GatewayLease`] released explicitly with
//!   `release().await`, or in the background when dropped.

use std::future::Future;
use std::ops::Deref;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use bytes::Bytes;
use futures::FutureExt;
use http::{Request, Response};
use tracing::{error, info, warn};
use url::Url;

use crate::error::{Result, RotatorError};
use crate::gateway::{
    AwsGatewayApi, Credentials, GatewayApi, GatewayPool, PoolOptions, ProvisionConfig,
    ReadySet, RegionProvisioner, ShutdownReport,
};
use crate::models::{Endpoint, Region, RegionPreset, Site};
use crate::transport::{
    GatewayTransport, HttpExecutor, RandomSelector, ReqwestExecutor, TransportConfig,
};

/// Builder for [`IpRotator`]
pub struct IpRotatorBuilder {
    site: String,
    regions: Option<Vec<Region>>,
    preset: RegionPreset,
    access_key_id: Option<String>,
    access_key_secret: Option<String>,
    verbose: bool,
    require_manual_deletion: bool,
    gateway_api: Option<Arc<dyn GatewayApi>>,
    endpoint_url: Option<Url>,
    executor: Option<Arc<dyn HttpExecutor>>,
    rng_seed: Option<u64>,
    provision_config: ProvisionConfig,
    transport_config: TransportConfig,
}

impl IpRotatorBuilder {
    fn new(site: impl Into<String>) -> Self {
        Self {
            site: site.into(),
            regions: None,
            preset: RegionPreset::Default,
            access_key_id: None,
            access_key_secret: None,
            verbose: true,
            require_manual_deletion: false,
            gateway_api: None,
            endpoint_url: None,
            executor: None,
            rng_seed: None,
            provision_config: ProvisionConfig::default(),
            transport_config: TransportConfig::default(),
        }
    }

    /// Explicit region list; takes precedence over the preset
    pub fn regions<I, R>(mut self, regions: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<Region>,
    {
        self.regions = Some(regions.into_iter().map(Into::into).collect());
        self
    }

    pub fn region_preset(mut self, preset: RegionPreset) -> Self {
        self.preset = preset;
        self
    }

    pub fn access_key_id(mut self, id: impl Into<String>) -> Self {
        self.access_key_id = Some(id.into());
        self
    }

    pub fn access_key_secret(mut self, secret: impl Into<String>) -> Self {
        self.access_key_secret = Some(secret.into());
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn require_manual_deletion(mut self, manual: bool) -> Self {
        self.require_manual_deletion = manual;
        self
    }

    /// Use this control plane instead of AWS; no credentials are resolved
    pub fn gateway_api(mut self, api: Arc<dyn GatewayApi>) -> Self {
        self.gateway_api = Some(api);
        self
    }

    /// Send AWS control-plane calls to `url` instead of the regional endpoints
    pub fn endpoint_url(mut self, url: Url) -> Self {
        self.endpoint_url = Some(url);
        self
    }

    pub fn executor(mut self, executor: Arc<dyn HttpExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Seed endpoint selection and generated addresses
    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    pub fn provision_config(mut self, config: ProvisionConfig) -> Self {
        self.provision_config = config;
        self
    }

    pub fn transport_config(mut self, config: TransportConfig) -> Self {
        self.transport_config = config;
        self
    }

    pub fn build(self) -> Result<IpRotator> {
        let site = Site::parse(&self.site)?;
        let regions = self.regions.unwrap_or_else(|| self.preset.regions());
        if regions.is_empty() {
            return Err(RotatorError::InvalidConfig("no regions configured".into()));
        }

        let api: Arc<dyn GatewayApi> = match self.gateway_api {
            Some(api) => api,
            None => {
                let credentials = Credentials::resolve(
                    self.access_key_id.as_deref(),
                    self.access_key_secret.as_deref(),
                )?;
                let mut aws = AwsGatewayApi::new(credentials)?;
                if let Some(url) = self.endpoint_url {
                    aws = aws.with_endpoint_url(url);
                }
                Arc::new(aws)
            }
        };

        let executor: Arc<dyn HttpExecutor> = match self.executor {
            Some(executor) => executor,
            None => Arc::new(ReqwestExecutor::new(self.transport_config.connect_timeout)?),
        };

        let selector = match self.rng_seed {
            Some(seed) => RandomSelector::seeded(seed),
            None => RandomSelector::new(),
        };

        let pool = Arc::new(GatewayPool::new(
            site,
            regions,
            RegionProvisioner::new(api, self.provision_config),
            PoolOptions {
                verbose: self.verbose,
                require_manual_deletion: self.require_manual_deletion,
            },
        ));
        let transport = Arc::new(GatewayTransport::new(
            pool.clone(),
            executor,
            selector,
            self.transport_config,
        ));

        Ok(IpRotator { pool, transport })
    }
}

/// A pool of regional gateways for one site and the transport routing through it.
///
/// Cloning is cheap; clones share the pool.
#[derive(Clone)]
pub struct IpRotator {
    pool: Arc<GatewayPool>,
    transport: Arc<GatewayTransport>,
}

impl IpRotator {
    pub fn builder(site: impl Into<String>) -> IpRotatorBuilder {
        IpRotatorBuilder::new(site)
    }

    pub fn site(&self) -> &Site {
        self.pool.site()
    }

    pub fn regions(&self) -> &[Region] {
        self.pool.regions()
    }

    pub fn ready_set(&self) -> Arc<ReadySet> {
        self.pool.ready_set()
    }

    pub async fn endpoints(&self) -> Vec<Endpoint> {
        self.pool.endpoints().await
    }

    pub fn transport(&self) -> &GatewayTransport {
        &self.transport
    }

    pub async fn start(&self, force: bool) -> Result<Arc<ReadySet>> {
        self.pool.start(force).await
    }

    pub async fn start_with_endpoints<S: AsRef<str>>(&self, hosts: &[S]) -> Result<Arc<ReadySet>> {
        self.pool.start_with_endpoints(hosts).await
    }

    pub async fn shutdown(&self, endpoint_ids: Option<&[String]>) -> ShutdownReport {
        self.pool.shutdown(endpoint_ids).await
    }

    pub async fn sweep(&self) -> ShutdownReport {
        self.pool.sweep().await
    }

    pub async fn dispatch(&self, request: Request<Bytes>) -> Result<Response<Bytes>> {
        self.transport.dispatch(request).await
    }

    /// Start the pool, run `body`, then shut the pool down.
    ///
    /// Shutdown runs whatever happens in between: a failed start, an error
    /// returned by `body`, or a panic, which is resumed once the gateways are
    /// released. If the returned future is dropped before completing, the
    /// held lease shuts the pool down in the background.
    pub async fn scoped<F, Fut, T>(&self, force: bool, body: F) -> Result<T>
    where
        F: FnOnce(IpRotator) -> Fut,
        Fut: Future<Output = T>,
    {
        let lease = self.acquire(force).await?;

        let rotator = self.clone();
        let outcome = AssertUnwindSafe(async move { body(rotator).await })
            .catch_unwind()
            .await;
        lease.release().await;

        match outcome {
            Ok(value) => Ok(value),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    /// Start the pool and hand out a lease that shuts it down when released
    pub async fn acquire(&self, force: bool) -> Result<GatewayLease> {
        let lease = GatewayLease {
            rotator: self.clone(),
            released: false,
        };
        match self.start(force).await {
            Ok(_) => Ok(lease),
            Err(e) => {
                lease.release().await;
                Err(e)
            }
        }
    }

    async fn release_all(&self) -> ShutdownReport {
        let report = self.shutdown(None).await;
        for failure in &report.failed {
            error!(error = %failure, "Gateway left behind, run a sweep to remove it");
        }
        report
    }
}

/// Scoped use of a started rotator
///
/// Dereferences to the [`IpRotator`]. Call [`GatewayLease::release`] to shut the
/// pool down and get the report; a lease dropped without being released spawns
/// the shutdown on the current tokio runtime.
pub struct GatewayLease {
    rotator: IpRotator,
    released: bool,
}

impl GatewayLease {
    pub fn rotator(&self) -> &IpRotator {
        &self.rotator
    }

    pub async fn release(mut self) -> ShutdownReport {
        let report = self.rotator.release_all().await;
        self.released = true;
        report
    }
}

impl Deref for GatewayLease {
    type Target = IpRotator;

    fn deref(&self) -> &IpRotator {
        &self.rotator
    }
}

impl Drop for GatewayLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                info!(site = %self.rotator.site(), "Lease dropped, shutting gateways down in the background");
                let rotator = self.rotator.clone();
                handle.spawn(async move {
                    rotator.release_all().await;
                });
            }
            Err(_) => {
                warn!(
                    site = %self.rotator.site(),
                    "Lease dropped outside a tokio runtime, gateways were not deleted"
                );
            }
        }
    }
}
