//! Persistent bucket store on the local filesystem.
//!
//! ## Layout
//!
//! ```text
//! <root>/
//!   <hex(bucket name)>/
//!     manifest.json         name, creation sequence, entry metadata
//!     0000000000000000.blob response bodies, one file per entry
//!     0000000000000001.blob
//! ```
//!
//! The manifest is the commit point: a batch writes its blobs first and then
//! atomically renames a freshly written manifest over the old one. Readers
//! only ever see blobs that a committed manifest references.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::{CacheError, CacheStorage, RequestKey, Snapshot};
use crate::http::{Headers, Method, StatusCode};

const MANIFEST: &str = "manifest.json";
const MANIFEST_TMP: &str = "manifest.json.tmp";

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    name: String,
    sequence: u64,
    next_blob: u64,
    entries: Vec<StoredEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    method: String,
    url: String,
    status: u16,
    headers: Vec<(String, String)>,
    blob: String,
}

impl StoredEntry {
    fn matches(&self, key: &RequestKey) -> bool {
        self.method == key.method().as_str() && self.url == key.url()
    }

    fn key(&self) -> RequestKey {
        let method: Method = self.method.parse().unwrap_or_else(|never| match never {});
        RequestKey::new(method, self.url.clone())
    }
}

/// A [`CacheStorage`] that persists buckets under a root directory.
///
/// Operations are serialized through an internal `RwLock`: lookups and
/// enumeration share it, mutations take it exclusively.
///
/// # Examples
///
/// ```no_run
/// use offcache::cache::{CacheStorage, DiskStorage};
///
/// # async fn example() -> Result<(), offcache::cache::CacheError> {
/// let storage = DiskStorage::new("/var/cache/offcache");
/// storage.open("vehicle-tracker-v1").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct DiskStorage {
    root: PathBuf,
    lock: RwLock<()>,
}

impl DiskStorage {
    /// Creates a store rooted at `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock: RwLock::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_dir(&self, name: &str) -> PathBuf {
        let encoded: String = name.bytes().map(|b| format!("{b:02x}")).collect();
        self.root.join(encoded)
    }

    async fn read_manifest(&self, name: &str) -> Result<Option<Manifest>, CacheError> {
        read_manifest_at(&self.bucket_dir(name)).await
    }

    /// Lists every bucket directory under the root, oldest first.
    ///
    /// A directory whose manifest is missing or unreadable is still a bucket
    /// (an interrupted `open`, or damage on disk) and sorts ahead of every
    /// committed one so it is the first to be purged.
    async fn scan(&self) -> Result<Vec<BucketDir>, CacheError> {
        let mut dir = match fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut buckets = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().and_then(decode_bucket_name) else {
                debug!(path = %entry.path().display(), "ignoring foreign directory");
                continue;
            };

            let manifest = match read_manifest_at(&entry.path()).await {
                Ok(manifest) => manifest,
                Err(CacheError::Json(e)) => {
                    warn!(bucket = %name, error = %e, "unreadable manifest");
                    None
                }
                Err(e) => return Err(e),
            };
            match &manifest {
                None => debug!(bucket = %name, "bucket directory without a manifest"),
                Some(m) if m.name != name => {
                    warn!(bucket = %name, recorded = %m.name, "manifest names another bucket");
                }
                Some(_) => {}
            }
            buckets.push(BucketDir { name, manifest });
        }

        buckets.sort_by(|a, b| {
            let seq = |d: &BucketDir| d.manifest.as_ref().map(|m| m.sequence);
            seq(a).cmp(&seq(b)).then_with(|| a.name.cmp(&b.name))
        });
        Ok(buckets)
    }
}

// One directory found under the root.
struct BucketDir {
    name: String,
    manifest: Option<Manifest>,
}

fn decode_bucket_name(encoded: &str) -> Option<String> {
    if encoded.is_empty() || encoded.len() % 2 != 0 || !encoded.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let bytes = (0..encoded.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(encoded.get(i..i + 2)?, 16).ok())
        .collect::<Option<Vec<u8>>>()?;
    String::from_utf8(bytes).ok()
}

async fn read_manifest_at(dir: &Path) -> Result<Option<Manifest>, CacheError> {
    match fs::read(dir.join(MANIFEST)).await {
        Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_manifest(dir: &Path, manifest: &Manifest) -> Result<(), CacheError> {
    let tmp = dir.join(MANIFEST_TMP);
    fs::write(&tmp, serde_json::to_vec_pretty(manifest)?).await?;
    fs::rename(&tmp, dir.join(MANIFEST)).await?;
    Ok(())
}

async fn remove_blobs(dir: &Path, blobs: &[String]) {
    for blob in blobs {
        if let Err(e) = fs::remove_file(dir.join(blob)).await {
            if e.kind() != ErrorKind::NotFound {
                warn!(blob = %blob, error = %e, "failed to remove cache blob");
            }
        }
    }
}

impl CacheStorage for DiskStorage {
    fn open<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<(), CacheError>> {
        Box::pin(async move {
            let _guard = self.lock.write().await;
            let dir = self.bucket_dir(name);
            match self.read_manifest(name).await {
                Ok(Some(_)) => return Ok(()),
                Ok(None) => {}
                Err(CacheError::Json(e)) => {
                    warn!(bucket = %name, error = %e, "recreating bucket with unreadable manifest");
                    fs::remove_dir_all(&dir).await?;
                }
                Err(e) => return Err(e),
            }

            let sequence = self
                .scan()
                .await?
                .iter()
                .filter_map(|d| d.manifest.as_ref())
                .map(|m| m.sequence + 1)
                .max()
                .unwrap_or(0);

            fs::create_dir_all(&dir).await?;
            write_manifest(
                &dir,
                &Manifest {
                    name: name.to_owned(),
                    sequence,
                    next_blob: 0,
                    entries: Vec::new(),
                },
            )
            .await?;

            debug!(bucket = %name, path = %dir.display(), "bucket created");
            Ok(())
        })
    }

    fn has<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool, CacheError>> {
        Box::pin(async move {
            let _guard = self.lock.read().await;
            Ok(self.read_manifest(name).await?.is_some())
        })
    }

    fn keys(&self) -> BoxFuture<'_, Result<Vec<String>, CacheError>> {
        Box::pin(async move {
            let _guard = self.lock.read().await;
            Ok(self.scan().await?.into_iter().map(|d| d.name).collect())
        })
    }

    fn delete<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool, CacheError>> {
        Box::pin(async move {
            let _guard = self.lock.write().await;
            match fs::remove_dir_all(self.bucket_dir(name)).await {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn put_all<'a>(
        &'a self,
        name: &'a str,
        entries: Vec<(RequestKey, Snapshot)>,
    ) -> BoxFuture<'a, Result<(), CacheError>> {
        Box::pin(async move {
            let _guard = self.lock.write().await;
            let dir = self.bucket_dir(name);
            let mut manifest =
                self.read_manifest(name)
                    .await?
                    .ok_or_else(|| CacheError::NoSuchBucket {
                        name: name.to_owned(),
                    })?;

            let mut written = Vec::with_capacity(entries.len());
            let committed = async {
                let mut staged = Vec::with_capacity(entries.len());
                for (key, snapshot) in &entries {
                    let blob = format!("{:016x}.blob", manifest.next_blob);
                    manifest.next_blob += 1;
                    fs::write(dir.join(&blob), snapshot.body()).await?;
                    written.push(blob.clone());

                    staged.push(StoredEntry {
                        method: key.method().as_str().to_owned(),
                        url: key.url().to_owned(),
                        status: snapshot.status().as_u16(),
                        headers: snapshot
                            .headers()
                            .iter()
                            .map(|(k, v)| (k.to_owned(), v.to_owned()))
                            .collect(),
                        blob,
                    });
                }

                let mut orphans = Vec::new();
                for entry in staged {
                    match manifest
                        .entries
                        .iter_mut()
                        .find(|e| e.method == entry.method && e.url == entry.url)
                    {
                        Some(existing) => orphans.push(std::mem::replace(existing, entry).blob),
                        None => manifest.entries.push(entry),
                    }
                }

                write_manifest(&dir, &manifest).await?;
                Ok::<_, CacheError>(orphans)
            }
            .await;

            match committed {
                Ok(orphans) => {
                    remove_blobs(&dir, &orphans).await;
                    debug!(bucket = %name, stored = entries.len(), "batch committed");
                    Ok(())
                }
                Err(e) => {
                    remove_blobs(&dir, &written).await;
                    Err(e)
                }
            }
        })
    }

    fn lookup<'a>(
        &'a self,
        name: &'a str,
        key: &'a RequestKey,
    ) -> BoxFuture<'a, Result<Option<Snapshot>, CacheError>> {
        Box::pin(async move {
            let _guard = self.lock.read().await;
            let Some(manifest) = self.read_manifest(name).await? else {
                return Ok(None);
            };
            let Some(entry) = manifest.entries.iter().find(|e| e.matches(key)) else {
                return Ok(None);
            };

            let corrupt = |reason: String| CacheError::Corrupt {
                name: name.to_owned(),
                reason,
            };
            let status = StatusCode::from_u16(entry.status)
                .ok_or_else(|| corrupt(format!("unknown status {}", entry.status)))?;
            let body = match fs::read(self.bucket_dir(name).join(&entry.blob)).await {
                Ok(body) => body,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    return Err(corrupt(format!("missing blob {}", entry.blob)));
                }
                Err(e) => return Err(e.into()),
            };
            let headers: Headers = entry.headers.iter().cloned().collect();

            Ok(Some(Snapshot::new(status, headers, body)))
        })
    }

    fn entries<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Vec<RequestKey>, CacheError>> {
        Box::pin(async move {
            let _guard = self.lock.read().await;
            self.read_manifest(name)
                .await?
                .map(|m| m.entries.iter().map(StoredEntry::key).collect())
                .ok_or_else(|| CacheError::NoSuchBucket {
                    name: name.to_owned(),
                })
        })
    }
}
