//! The offline asset cache worker.
//!
//! A [`CacheWorker`] owns one versioned bucket and drives three lifecycle
//! operations, each an async method the host awaits before moving on:
//!
//! 1. [`install`](CacheWorker::install): fetch every listed asset and store
//!    the whole batch in the bucket named by the version stamp, or nothing at all.
//! 2. [`activate`](CacheWorker::activate): delete every bucket whose name is
//!    not the current one.
//! 3. [`handle_fetch`](CacheWorker::handle_fetch): answer a request from the
//!    bucket on a hit, otherwise from exactly one network fetch.
//!
//! Storage and network are injected as [`CacheStorage`] and [`Fetch`] trait
//! objects. Changing the version stamp is the only way to invalidate content.

use std::sync::Arc;

use futures::future::try_join_all;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::cache::{CacheError, CacheStorage, RequestKey, Snapshot};
use crate::http::{Locator, Method, Origin, Request, Response, StatusCode, request::RequestError};
use crate::network::{Fetch, FetchError};

pub mod lifecycle;
pub mod policy;

pub use lifecycle::WorkerState;
pub use policy::InterceptPolicy;

/// Errors from the `install` and `activate` lifecycle steps.
///
/// Request-path failures are plain [`FetchError`]s and never appear here.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: WorkerState,
    },

    #[error("invalid asset locator {locator:?}: {source}")]
    InvalidAsset {
        locator: String,
        #[source]
        source: RequestError,
    },

    #[error("failed to fetch asset {locator}: {source}")]
    AssetFetch {
        locator: String,
        #[source]
        source: FetchError,
    },

    #[error("asset {locator} returned {status}")]
    AssetStatus { locator: String, status: StatusCode },

    #[error("cache storage error: {0}")]
    Cache(#[from] CacheError),
}

/// Everything that identifies one deployed worker version.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Version stamp; also the name of the worker's bucket.
    pub version: String,
    /// Ordered list of absolute or root-relative locators to pre-cache.
    pub assets: Vec<String>,
    pub policy: InterceptPolicy,
    /// The upstream application's origin; root-relative locators resolve here.
    pub home: Origin,
}

/// Outcome of a successful [`CacheWorker::install`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub bucket: String,
    /// Keys written by this install, in asset-list order.
    pub cached: Vec<RequestKey>,
}

/// Outcome of a successful [`CacheWorker::activate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivateReport {
    pub current: String,
    /// Stale buckets that were deleted, in creation order.
    pub deleted: Vec<String>,
}

/// Where an intercepted response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Cache,
    Network,
}

/// A response produced by [`CacheWorker::intercept`].
#[derive(Debug, Clone)]
pub struct Interception {
    pub response: Response,
    pub source: Source,
}

/// The offline asset cache controller.
///
/// Cheap to share behind an [`Arc`]: the only mutable state is the lifecycle
/// [`WorkerState`], and bucket contents only change during `install` and
/// `activate`.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use offcache::cache::MemoryStorage;
/// use offcache::http::Request;
/// use offcache::network::HttpFetcher;
/// use offcache::worker::{CacheWorker, InterceptPolicy, WorkerSettings};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let home = "http://127.0.0.1:5000".parse()?;
/// let worker = CacheWorker::new(
///     WorkerSettings {
///         version: "vehicle-tracker-v1".into(),
///         assets: vec!["/static/custom.css".into()],
///         policy: InterceptPolicy::default(),
///         home,
///     },
///     Arc::new(MemoryStorage::new()),
///     Arc::new(HttpFetcher::new("http://127.0.0.1:5000".parse()?)?),
/// );
///
/// worker.install().await?;
/// worker.activate().await?;
/// let response = worker.handle_fetch(Request::get("/static/custom.css")?).await?;
/// # Ok(())
/// # }
/// ```
pub struct CacheWorker {
    settings: WorkerSettings,
    storage: Arc<dyn CacheStorage>,
    network: Arc<dyn Fetch>,
    state: RwLock<WorkerState>,
    // Home plus every origin named by an absolute asset locator.
    origins: Vec<Origin>,
}

impl CacheWorker {
    pub fn new(
        settings: WorkerSettings,
        storage: Arc<dyn CacheStorage>,
        network: Arc<dyn Fetch>,
    ) -> Self {
        let mut origins = vec![settings.home.clone()];
        for origin in settings
            .assets
            .iter()
            .filter_map(|asset| asset.parse::<Locator>().ok()?.origin().cloned())
        {
            if !origins.contains(&origin) {
                origins.push(origin);
            }
        }

        Self {
            settings,
            storage,
            network,
            state: RwLock::new(WorkerState::Parsed),
            origins,
        }
    }

    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    /// Name of the current bucket.
    pub fn bucket(&self) -> &str {
        &self.settings.version
    }

    /// Returns `true` if `origin` is the home origin or the origin of a
    /// pre-cached asset. Requests for any other origin have no business here.
    pub fn serves_origin(&self, origin: &Origin) -> bool {
        self.origins.contains(origin)
    }

    pub async fn state(&self) -> WorkerState {
        *self.state.read().await
    }

    // Claims the install step, returning the state to restore on failure.
    async fn begin_install(&self) -> Result<WorkerState, WorkerError> {
        let mut state = self.state.write().await;
        if !state.can_install() {
            return Err(WorkerError::InvalidState {
                operation: "install",
                state: *state,
            });
        }
        Ok(std::mem::replace(&mut *state, WorkerState::Installing))
    }

    async fn set_state(&self, next: WorkerState) {
        *self.state.write().await = next;
    }

    /// Pre-caches every asset into the current bucket as one all-or-nothing batch.
    ///
    /// All assets are fetched concurrently. A network error or a non-2xx status
    /// for any one of them aborts the batch before the bucket is even opened,
    /// so a failed install leaves no partially populated current bucket. On
    /// failure the worker returns to the state it was in before the call.
    ///
    /// # Errors
    ///
    /// - [`WorkerError::InvalidState`]: not in `Parsed` or `Installed`.
    /// - [`WorkerError::InvalidAsset`], [`WorkerError::AssetFetch`],
    ///   [`WorkerError::AssetStatus`]: one asset could not be cached.
    /// - [`WorkerError::Cache`]: the bucket could not be written.
    pub async fn install(&self) -> Result<InstallReport, WorkerError> {
        let previous = self.begin_install().await?;
        info!(bucket = %self.bucket(), assets = self.settings.assets.len(), "install started");

        match self.populate().await {
            Ok(report) => {
                self.set_state(WorkerState::Installed).await;
                info!(bucket = %report.bucket, cached = report.cached.len(), "install complete");
                Ok(report)
            }
            Err(e) => {
                self.set_state(previous).await;
                warn!(bucket = %self.bucket(), error = %e, "install failed");
                Err(e)
            }
        }
    }

    async fn populate(&self) -> Result<InstallReport, WorkerError> {
        let requests = self
            .settings
            .assets
            .iter()
            .map(|locator| {
                Request::get(locator)
                    .map(|request| (locator, request))
                    .map_err(|source| WorkerError::InvalidAsset {
                        locator: locator.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let fetches = requests.iter().map(|(locator, request)| async move {
            let response =
                self.network
                    .fetch(request)
                    .await
                    .map_err(|source| WorkerError::AssetFetch {
                        locator: (*locator).clone(),
                        source,
                    })?;

            if !response.status().is_success() {
                return Err(WorkerError::AssetStatus {
                    locator: (*locator).clone(),
                    status: response.status(),
                });
            }

            debug!(asset = %locator, status = response.status().as_u16(), "asset fetched");
            Ok((
                RequestKey::for_request(request, &self.settings.home),
                Snapshot::capture(&response),
            ))
        });
        let entries = try_join_all(fetches).await?;

        let bucket = self.bucket();
        let cached = entries.iter().map(|(key, _)| key.clone()).collect();
        self.storage.open(bucket).await?;
        self.storage.put_all(bucket, entries).await?;

        Ok(InstallReport {
            bucket: bucket.to_owned(),
            cached,
        })
    }

    /// Deletes every bucket whose name differs from the current version stamp.
    ///
    /// Buckets that vanish between enumeration and deletion are skipped. Any
    /// deletion error fails the step and leaves the worker `Installed`, so a
    /// later call retries the whole cleanup. Calling `activate` on an
    /// already-activated worker repeats the cleanup without ever leaving
    /// `Activated`.
    ///
    /// # Errors
    ///
    /// - [`WorkerError::InvalidState`]: not yet installed, or an activation is in flight.
    /// - [`WorkerError::Cache`]: enumeration or deletion failed.
    pub async fn activate(&self) -> Result<ActivateReport, WorkerError> {
        let previous = {
            let mut state = self.state.write().await;
            if !state.can_activate() {
                return Err(WorkerError::InvalidState {
                    operation: "activate",
                    state: *state,
                });
            }
            let previous = *state;
            // A repeat cleanup keeps controlling requests.
            if previous != WorkerState::Activated {
                *state = WorkerState::Activating;
            }
            previous
        };

        match self.purge_stale().await {
            Ok(report) => {
                self.set_state(WorkerState::Activated).await;
                info!(
                    bucket = %report.current,
                    deleted = report.deleted.len(),
                    "activation complete"
                );
                Ok(report)
            }
            Err(e) => {
                self.set_state(previous).await;
                warn!(bucket = %self.bucket(), error = %e, "activation failed");
                Err(e)
            }
        }
    }

    async fn purge_stale(&self) -> Result<ActivateReport, WorkerError> {
        let current = self.bucket();
        let stale: Vec<String> = self
            .storage
            .keys()
            .await?
            .into_iter()
            .filter(|name| name != current)
            .collect();

        let deletions = stale.iter().map(|name| async move {
            let existed = self.storage.delete(name).await?;
            if existed {
                debug!(bucket = %name, "stale bucket deleted");
            }
            Ok::<_, CacheError>(existed.then(|| name.clone()))
        });
        let deleted = try_join_all(deletions).await?.into_iter().flatten().collect();

        Ok(ActivateReport {
            current: current.to_owned(),
            deleted,
        })
    }

    /// Decides how to answer `request` and produces the response.
    ///
    /// Until the worker is activated every request goes to the network. After
    /// that, a `GET` the [`InterceptPolicy`] covers is looked up in the current
    /// bucket: a hit is returned without touching the network, a miss falls
    /// through to exactly one network fetch. Nothing is written back to the
    /// bucket. A storage error during lookup counts as a miss.
    ///
    /// # Errors
    ///
    /// The network's [`FetchError`], unmodified, when the network is consulted
    /// and fails.
    pub async fn intercept(&self, request: &Request) -> Result<Interception, FetchError> {
        let state = self.state().await;
        if state.controls_requests()
            && self.settings.policy.covers(request)
            && *request.method() == Method::Get
        {
            let key = RequestKey::for_request(request, &self.settings.home);
            match self.storage.lookup(self.bucket(), &key).await {
                Ok(Some(snapshot)) => {
                    debug!(key = %key, "served from cache");
                    return Ok(Interception {
                        response: snapshot.to_response(),
                        source: Source::Cache,
                    });
                }
                Ok(None) => debug!(key = %key, "cache miss"),
                Err(e) => warn!(key = %key, error = %e, "cache lookup failed; using network"),
            }
        }

        let response = self.network.fetch(request).await?;
        Ok(Interception {
            response,
            source: Source::Network,
        })
    }

    /// [`intercept`](Self::intercept), keeping only the response.
    pub async fn handle_fetch(&self, request: Request) -> Result<Response, FetchError> {
        self.intercept(&request).await.map(|i| i.response)
    }
}
