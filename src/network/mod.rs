//! Live network access: the fallback behind every cache miss.
//!
//! The cache worker never talks to the network directly; it goes through the
//! [`Fetch`] trait so tests can substitute a scripted network.

use futures::future::BoxFuture;
use thiserror::Error;

use crate::http::{Request, Response};

pub mod client;

pub use client::HttpFetcher;

/// Boxed transport-level cause of a [`FetchError::Connect`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors produced while fetching a resource from the network.
///
/// A response with an error *status* is not a `FetchError`; it resolves
/// successfully and callers decide what a non-2xx status means to them.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: BoxError,
    },

    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("method {0:?} cannot be sent")]
    InvalidMethod(String),

    #[error("response from {url} exceeds {max_bytes} bytes")]
    ResponseTooLarge { url: String, max_bytes: usize },
}

/// The network capability: issue a request and resolve to its response.
pub trait Fetch: Send + Sync {
    fn fetch<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response, FetchError>>;
}
