//! Shared test doubles for offcache integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use offcache::cache::CacheError;
use offcache::http::Request;
use offcache::{
    CacheStorage, CacheWorker, Fetch, FetchError, InterceptPolicy, MemoryStorage, RequestKey,
    Response, Snapshot, StatusCode, WorkerSettings,
};

pub const HOME: &str = "http://app.local:5000";

/// The six assets of the vehicle-tracker deployment.
pub const ASSETS: [&str; 6] = [
    "/static/custom.css",
    "/static/manifest.json",
    "/static/icons/icon-left-192.png",
    "/static/icons/icon-left-512.png",
    "/static/icons/icon-right-192.png",
    "/static/icons/icon-right-512.png",
];

/// A scripted network that records every request it sees.
///
/// Routes are keyed by the request's origin-form target (`/path?query`), or by
/// the absolute URL for requests that carry an origin.
#[derive(Default)]
pub struct FakeNetwork {
    routes: Mutex<HashMap<String, (StatusCode, String)>>,
    calls: Mutex<Vec<String>>,
}

impl FakeNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A network serving every deployment asset with `200 OK`.
    pub fn serving_assets(tag: &str) -> Arc<Self> {
        let network = Self::new();
        for asset in ASSETS {
            network.serve(asset, StatusCode::Ok, &format!("{tag}:{asset}"));
        }
        network
    }

    pub fn serve(&self, target: &str, status: StatusCode, body: &str) {
        self.routes
            .lock()
            .unwrap()
            .insert(target.to_owned(), (status, body.to_owned()));
    }

    pub fn unplug(&self, target: &str) {
        self.routes.lock().unwrap().remove(target);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, target: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == target).count()
    }

    pub fn reset_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

fn target_of(request: &Request) -> String {
    match request.origin() {
        Some(origin) => format!("{origin}{}", request.path_and_query()),
        None => request.path_and_query(),
    }
}

impl Fetch for FakeNetwork {
    fn fetch<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response, FetchError>> {
        Box::pin(async move {
            let target = target_of(request);
            self.calls.lock().unwrap().push(target.clone());

            let route = self.routes.lock().unwrap().get(&target).cloned();
            match route {
                Some((status, body)) => Ok(Response::new(status)
                    .header("Content-Type", "text/plain")
                    .body(body)),
                None => Err(FetchError::Connect {
                    url: "app.local:5000".into(),
                    source: Box::new(std::io::Error::from(std::io::ErrorKind::ConnectionRefused)),
                }),
            }
        })
    }
}

/// A store whose deletions always fail, wrapping a working one for everything else.
pub struct UndeletableStorage {
    pub inner: MemoryStorage,
}

impl CacheStorage for UndeletableStorage {
    fn open<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<(), CacheError>> {
        self.inner.open(name)
    }

    fn has<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool, CacheError>> {
        self.inner.has(name)
    }

    fn keys(&self) -> BoxFuture<'_, Result<Vec<String>, CacheError>> {
        self.inner.keys()
    }

    fn delete<'a>(&'a self, _name: &'a str) -> BoxFuture<'a, Result<bool, CacheError>> {
        Box::pin(async { Err(std::io::Error::other("device busy").into()) })
    }

    fn put_all<'a>(
        &'a self,
        name: &'a str,
        entries: Vec<(RequestKey, Snapshot)>,
    ) -> BoxFuture<'a, Result<(), CacheError>> {
        self.inner.put_all(name, entries)
    }

    fn lookup<'a>(
        &'a self,
        name: &'a str,
        key: &'a RequestKey,
    ) -> BoxFuture<'a, Result<Option<Snapshot>, CacheError>> {
        self.inner.lookup(name, key)
    }

    fn entries<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Vec<RequestKey>, CacheError>> {
        self.inner.entries(name)
    }
}

pub fn settings(version: &str, policy: InterceptPolicy) -> WorkerSettings {
    WorkerSettings {
        version: version.to_owned(),
        assets: ASSETS.iter().map(|a| a.to_string()).collect(),
        policy,
        home: HOME.parse().unwrap(),
    }
}

pub fn worker(
    version: &str,
    policy: InterceptPolicy,
    storage: Arc<dyn CacheStorage>,
    network: Arc<FakeNetwork>,
) -> CacheWorker {
    CacheWorker::new(settings(version, policy), storage, network)
}

pub fn body_text(response: &Response) -> String {
    String::from_utf8(response.content().to_vec()).unwrap()
}
