//! # offcache
//!
//! A versioned offline asset cache for small web applications, with an
//! HTTP/1.1 edge proxy in front of it.
//!
//! A [`CacheWorker`] owns one bucket named by a version stamp. `install`
//! pre-caches a fixed asset list as an all-or-nothing batch, `activate`
//! deletes every bucket with a different name, and each request is then
//! answered from the bucket on a hit or from the upstream network on a miss.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use offcache::{CacheWorker, Config, HttpFetcher, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let worker = Arc::new(CacheWorker::new(
//!         config.worker_settings()?,
//!         config.storage.build(),
//!         Arc::new(HttpFetcher::new(config.upstream_origin()?)?),
//!     ));
//!
//!     worker.install().await?;
//!     worker.activate().await?;
//!
//!     Server::bind(&config.listen).await?.serve(worker).await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod http;
pub mod network;
pub mod server;
pub mod worker;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use cache::{CacheError, CacheStorage, DiskStorage, MemoryStorage, RequestKey, Snapshot};
pub use config::{Config, ConfigError};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use network::{Fetch, FetchError, HttpFetcher};
pub use server::{Server, ServerError};
pub use worker::{CacheWorker, InterceptPolicy, WorkerError, WorkerSettings, WorkerState};
