//! Bucket storage: named, versioned stores of response snapshots.
//!
//! A *bucket* maps a [`RequestKey`] to a [`Snapshot`]. The cache worker owns
//! exactly one current bucket (named by its version stamp) and treats every
//! other bucket as stale. Storage is injected through the [`CacheStorage`]
//! trait so the worker can run against the in-process [`MemoryStorage`] or
//! the persistent [`DiskStorage`].
//!
//! ## Core types
//!
//! - [`CacheStorage`]: the capability the worker depends on: open, enumerate,
//!   delete, batch-populate and look up.
//! - [`RequestKey`]: request identity (method plus normalized URL).
//! - [`Snapshot`]: a stored response: status, end-to-end headers, body.

use futures::future::BoxFuture;
use thiserror::Error;

use crate::http::{Headers, Method, Origin, Request, Response, StatusCode};

pub mod disk;
pub mod memory;

pub use disk::DiskStorage;
pub use memory::MemoryStorage;

/// Errors produced by a bucket store.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("no such bucket: {name}")]
    NoSuchBucket { name: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("manifest encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("corrupt bucket {name}: {reason}")]
    Corrupt { name: String, reason: String },
}

/// The identity under which a response is stored.
///
/// URLs on the worker's home origin are normalized to origin-form
/// (`/path?query`), so `/static/custom.css` and
/// `http://app.local/static/custom.css` share an entry when `app.local` is the
/// home origin. Other origins keep their absolute form.
///
/// # Examples
///
/// ```
/// use offcache::cache::RequestKey;
/// use offcache::http::{Origin, Request};
///
/// let home: Origin = "http://127.0.0.1:5000".parse().unwrap();
///
/// let local = Request::get("http://127.0.0.1:5000/static/custom.css").unwrap();
/// assert_eq!(RequestKey::for_request(&local, &home).url(), "/static/custom.css");
///
/// let cdn = Request::get("http://cdn.example.com/lib.js").unwrap();
/// assert_eq!(RequestKey::for_request(&cdn, &home).url(), "http://cdn.example.com/lib.js");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    method: Method,
    url: String,
}

impl RequestKey {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
        }
    }

    /// Derives the key for `request`, normalizing against the `home` origin.
    pub fn for_request(request: &Request, home: &Origin) -> Self {
        let url = match request.origin() {
            Some(origin) if origin != home => format!("{origin}{}", request.path_and_query()),
            _ => request.path_and_query(),
        };
        Self::new(request.method().clone(), url)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl std::fmt::Display for RequestKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// A stored copy of a response.
///
/// Hop-by-hop fields are dropped on capture; framing is regenerated when the
/// snapshot is replayed as a [`Response`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    status: StatusCode,
    headers: Headers,
    body: bytes::Bytes,
}

impl Snapshot {
    pub fn new(status: StatusCode, headers: Headers, body: impl Into<bytes::Bytes>) -> Self {
        Self {
            status,
            headers: headers.without_hop_by_hop(),
            body: body.into(),
        }
    }

    /// Captures `response` for storage.
    pub fn capture(response: &Response) -> Self {
        Self::new(
            response.status(),
            response.headers().clone(),
            response.content().clone(),
        )
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> &bytes::Bytes {
        &self.body
    }

    /// Rebuilds a response that replays this snapshot.
    pub fn to_response(&self) -> Response {
        Response::new(self.status)
            .with_headers(self.headers.clone())
            .body_bytes(self.body.clone())
    }
}

/// The bucket-store capability the cache worker is built on.
///
/// Every operation is asynchronous and returns a boxed, `Send` future so the
/// store can be shared as `Arc<dyn CacheStorage>` across Tokio tasks.
///
/// # Contract
///
/// - [`open`](Self::open) creates a bucket if absent; opening an existing
///   bucket leaves its entries untouched.
/// - [`keys`](Self::keys) lists bucket names in creation order.
/// - [`delete`](Self::delete) of a missing bucket is `Ok(false)`, not an error.
/// - [`put_all`](Self::put_all) is atomic: after it returns, either every entry
///   is stored or none is. Entries with an existing key replace the old ones.
/// - [`lookup`](Self::lookup) against a missing bucket is `Ok(None)`.
pub trait CacheStorage: Send + Sync {
    /// Opens the bucket `name`, creating it if it does not exist.
    fn open<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<(), CacheError>>;

    /// Returns `true` if the bucket `name` exists.
    fn has<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool, CacheError>>;

    /// Lists every bucket name in creation order.
    fn keys(&self) -> BoxFuture<'_, Result<Vec<String>, CacheError>>;

    /// Deletes the bucket `name`; returns whether it existed.
    fn delete<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool, CacheError>>;

    /// Stores every `(key, snapshot)` pair in bucket `name` as one atomic batch.
    ///
    /// # Errors
    ///
    /// [`CacheError::NoSuchBucket`] if the bucket was never opened.
    fn put_all<'a>(
        &'a self,
        name: &'a str,
        entries: Vec<(RequestKey, Snapshot)>,
    ) -> BoxFuture<'a, Result<(), CacheError>>;

    /// Looks up an exact `key` match in bucket `name`.
    fn lookup<'a>(
        &'a self,
        name: &'a str,
        key: &'a RequestKey,
    ) -> BoxFuture<'a, Result<Option<Snapshot>, CacheError>>;

    /// Lists the keys stored in bucket `name` in insertion order.
    ///
    /// # Errors
    ///
    /// [`CacheError::NoSuchBucket`] if the bucket does not exist.
    fn entries<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Vec<RequestKey>, CacheError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_origin_absolute_and_relative_share_a_key() {
        let home: Origin = "http://app.local".parse().unwrap();
        let a = Request::get("/static/custom.css").unwrap();
        let b = Request::get("http://app.local:80/static/custom.css").unwrap();
        assert_eq!(
            RequestKey::for_request(&a, &home),
            RequestKey::for_request(&b, &home)
        );
    }

    #[test]
    fn query_is_part_of_the_key() {
        let home: Origin = "http://app.local".parse().unwrap();
        let a = Request::get("/static/custom.css?v=1").unwrap();
        let b = Request::get("/static/custom.css?v=2").unwrap();
        assert_ne!(
            RequestKey::for_request(&a, &home),
            RequestKey::for_request(&b, &home)
        );
    }

    #[test]
    fn snapshot_drops_framing_and_replays() {
        let response = Response::new(StatusCode::Ok)
            .header("Content-Type", "application/json")
            .header("Content-Length", "2")
            .header("Connection", "close")
            .body("{}");

        let snapshot = Snapshot::capture(&response);
        assert!(!snapshot.headers().contains("content-length"));
        assert!(!snapshot.headers().contains("connection"));

        let replay = snapshot.to_response();
        assert_eq!(replay.status(), StatusCode::Ok);
        assert_eq!(replay.headers().get("content-type"), Some("application/json"));
        assert_eq!(replay.content().as_ref(), b"{}");
    }
}
