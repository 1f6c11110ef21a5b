//! In-process bucket store.

use std::collections::HashMap;

use futures::future::BoxFuture;
use tokio::sync::RwLock;

use super::{CacheError, CacheStorage, RequestKey, Snapshot};

#[derive(Debug, Default)]
struct Bucket {
    name: String,
    // Insertion order, for `entries`.
    order: Vec<RequestKey>,
    entries: HashMap<RequestKey, Snapshot>,
}

/// A [`CacheStorage`] held entirely in memory.
///
/// Buckets live in a `Vec` so that [`CacheStorage::keys`] reports creation
/// order. Every mutation happens under one write lock, which makes
/// [`CacheStorage::put_all`] trivially atomic.
///
/// # Examples
///
/// ```
/// use offcache::cache::{CacheStorage, MemoryStorage};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), offcache::cache::CacheError> {
/// let storage = MemoryStorage::new();
/// storage.open("vehicle-tracker-v1").await?;
/// assert_eq!(storage.keys().await?, vec!["vehicle-tracker-v1".to_string()]);
/// assert!(storage.delete("vehicle-tracker-v1").await?);
/// assert!(!storage.delete("vehicle-tracker-v1").await?);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MemoryStorage {
    buckets: RwLock<Vec<Bucket>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStorage for MemoryStorage {
    fn open<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<(), CacheError>> {
        Box::pin(async move {
            let mut buckets = self.buckets.write().await;
            if !buckets.iter().any(|b| b.name == name) {
                buckets.push(Bucket {
                    name: name.to_owned(),
                    ..Bucket::default()
                });
            }
            Ok(())
        })
    }

    fn has<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool, CacheError>> {
        Box::pin(async move { Ok(self.buckets.read().await.iter().any(|b| b.name == name)) })
    }

    fn keys(&self) -> BoxFuture<'_, Result<Vec<String>, CacheError>> {
        Box::pin(async move {
            Ok(self
                .buckets
                .read()
                .await
                .iter()
                .map(|b| b.name.clone())
                .collect())
        })
    }

    fn delete<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool, CacheError>> {
        Box::pin(async move {
            let mut buckets = self.buckets.write().await;
            let before = buckets.len();
            buckets.retain(|b| b.name != name);
            Ok(buckets.len() < before)
        })
    }

    fn put_all<'a>(
        &'a self,
        name: &'a str,
        entries: Vec<(RequestKey, Snapshot)>,
    ) -> BoxFuture<'a, Result<(), CacheError>> {
        Box::pin(async move {
            let mut buckets = self.buckets.write().await;
            let bucket = buckets
                .iter_mut()
                .find(|b| b.name == name)
                .ok_or_else(|| CacheError::NoSuchBucket {
                    name: name.to_owned(),
                })?;

            for (key, snapshot) in entries {
                if bucket.entries.insert(key.clone(), snapshot).is_none() {
                    bucket.order.push(key);
                }
            }
            Ok(())
        })
    }

    fn lookup<'a>(
        &'a self,
        name: &'a str,
        key: &'a RequestKey,
    ) -> BoxFuture<'a, Result<Option<Snapshot>, CacheError>> {
        Box::pin(async move {
            Ok(self
                .buckets
                .read()
                .await
                .iter()
                .find(|b| b.name == name)
                .and_then(|b| b.entries.get(key).cloned()))
        })
    }

    fn entries<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Vec<RequestKey>, CacheError>> {
        Box::pin(async move {
            self.buckets
                .read()
                .await
                .iter()
                .find(|b| b.name == name)
                .map(|b| b.order.clone())
                .ok_or_else(|| CacheError::NoSuchBucket {
                    name: name.to_owned(),
                })
        })
    }
}
