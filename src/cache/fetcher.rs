use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Utc;
use sha2::{Digest, Sha256};
use tempfile::TempPath;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};

use super::index::{CacheEntry, CacheIndex};
use crate::api::{ArtifactSpec, JobStore, ResultArtifact};
use crate::error::{SimError, TransportError};
use crate::poller::WaitOptions;

/// Downloads attempted per fetch before an integrity failure is surfaced.
const DOWNLOAD_ATTEMPTS: u32 = 2;

const HASH_BUFFER: usize = 64 * 1024;

/// A verified artifact on local disk.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactFile {
    pub path: PathBuf,
    pub content_hash: String,
    pub size: u64,
    /// `true` when no transfer was needed.
    pub from_cache: bool,
}

/// Content-addressed artifact cache.
///
/// Layout under the root:
/// `index.json` and its `index.lock`, `objects/<job_id>/<content_hash>[.ext]`,
/// `tmp/` for in-flight downloads. Files only enter `objects/` by rename
/// after their hash has been checked. Any number of fetchers, in any number
/// of processes, may share one root.
#[derive(Debug, Clone)]
pub struct DatasetFetcher {
    store: JobStore,
    root: PathBuf,
    index: CacheIndex,
}

struct Download {
    path: TempPath,
    size: u64,
}

impl DatasetFetcher {
    pub fn new(store: JobStore, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            store,
            index: CacheIndex::new(&root),
            root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns a local copy of the artifact whose hash matches the backend's
    /// current descriptor, downloading it only when no verified copy exists.
    pub async fn fetch(
        &self,
        job_id: &str,
        artifact: &ArtifactSpec,
        options: &WaitOptions,
    ) -> Result<ArtifactFile, SimError> {
        let work = self.fetch_unguarded(job_id, artifact);
        let timed = async {
            match options.timeout {
                Some(timeout) => timeout_at(Instant::now() + timeout, work)
                    .await
                    .map_err(|_| SimError::Timeout(timeout))?,
                None => work.await,
            }
        };
        // Dropping the in-flight future removes its temp file.
        match &options.cancel {
            Some(cancel) => tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(SimError::Cancelled),
                r = timed => r,
            },
            None => timed.await,
        }
    }

    async fn fetch_unguarded(
        &self,
        job_id: &str,
        artifact: &ArtifactSpec,
    ) -> Result<ArtifactFile, SimError> {
        let descriptor = self.store.get_artifact(job_id, artifact).await?;
        if let Some(hit) = self.lookup(job_id, artifact, &descriptor).await? {
            debug!(job_id, artifact = %artifact.name, hash = %hit.content_hash, "cache hit");
            return Ok(hit);
        }

        let mut attempt = 0;
        let download = loop {
            attempt += 1;
            match self.download(&descriptor).await {
                Ok(download) => break download,
                Err(SimError::Integrity { expected, actual }) if attempt < DOWNLOAD_ATTEMPTS => {
                    warn!(job_id, %expected, %actual, "artifact hash mismatch, downloading again");
                }
                Err(e) => return Err(e),
            }
        };
        self.install(job_id, artifact, &descriptor, download).await
    }

    /// Verified cache hit, if any. A corrupt or missing file drops its entry.
    ///
    /// The artifact is hashed without holding the index lock; the lock is
    /// only taken to record the outcome.
    async fn lookup(
        &self,
        job_id: &str,
        artifact: &ArtifactSpec,
        descriptor: &ResultArtifact,
    ) -> Result<Option<ArtifactFile>, SimError> {
        let Some(entry) = self
            .index
            .read()
            .await?
            .into_iter()
            .find(|e| e.matches(job_id, &artifact.name) && e.content_hash == descriptor.content_hash)
        else {
            return Ok(None);
        };

        if let Some((hash, size)) = verify(&entry).await {
            self.index
                .update(|entries| {
                    if let Some(e) = entries.iter_mut().find(|e| same_object(e, &entry)) {
                        e.last_validated = Utc::now();
                    }
                })
                .await?;
            return Ok(Some(ArtifactFile {
                path: entry.local_path,
                content_hash: hash,
                size,
                from_cache: true,
            }));
        }

        // Another fetcher may have replaced the file since it was hashed.
        let lock = self.index.lock().await?;
        let mut entries = self.index.read().await?;
        let still_listed = entries.iter().any(|e| same_object(e, &entry));
        if still_listed && verify(&entry).await.is_none() {
            remove_if_present(&entry.local_path).await?;
            entries.retain(|e| !same_object(e, &entry));
            self.index.write(&lock, entries).await?;
        }
        Ok(None)
    }

    /// Streams the artifact into a temp file, hashing as it goes. The temp
    /// file is deleted on any failure, including a hash mismatch.
    async fn download(&self, descriptor: &ResultArtifact) -> Result<Download, SimError> {
        let tmp_dir = self.root.join("tmp");
        tokio::fs::create_dir_all(&tmp_dir).await?;
        let (file, path) = tempfile::Builder::new()
            .prefix("download-")
            .tempfile_in(&tmp_dir)?
            .into_parts();
        let mut file = tokio::fs::File::from_std(file);

        let mut response = self.store.open_download(descriptor).await?;
        let status = response.status().as_u16();
        let mut hasher = Sha256::new();
        let mut size = 0u64;
        while let Some(chunk) = response.chunk().await.map_err(|e| {
            TransportError::exhausted(Some(status), format!("download interrupted: {e}"))
        })? {
            hasher.update(&chunk);
            file.write_all(&chunk).await?;
            size += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        let actual = format!("{:x}", hasher.finalize());
        if actual != descriptor.content_hash {
            return Err(SimError::Integrity {
                expected: descriptor.content_hash.clone(),
                actual,
            });
        }
        if size != descriptor.size {
            debug!(declared = descriptor.size, size, "artifact size differs from descriptor");
        }
        Ok(Download { path, size })
    }

    /// Renames a verified download into `objects/` and records it, dropping
    /// entries for older content of the same artifact.
    async fn install(
        &self,
        job_id: &str,
        artifact: &ArtifactSpec,
        descriptor: &ResultArtifact,
        download: Download,
    ) -> Result<ArtifactFile, SimError> {
        let dir = self.root.join("objects").join(job_id);
        tokio::fs::create_dir_all(&dir).await?;
        let file_name = match Path::new(&artifact.name).extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("{}.{ext}", descriptor.content_hash),
            None => descriptor.content_hash.clone(),
        };
        let path = dir.join(file_name);
        download.path.persist(&path).map_err(|e| SimError::Io(e.error))?;

        let entry = CacheEntry {
            job_id: job_id.to_string(),
            artifact_name: artifact.name.clone(),
            content_hash: descriptor.content_hash.clone(),
            local_path: path.clone(),
            size: download.size,
            last_validated: Utc::now(),
        };
        let lock = self.index.lock().await?;
        let (stale, mut entries): (Vec<_>, Vec<_>) = self
            .index
            .read()
            .await?
            .into_iter()
            .partition(|e| e.matches(job_id, &artifact.name));
        let orphaned: Vec<PathBuf> = stale
            .into_iter()
            .map(|e| e.local_path)
            .filter(|p| *p != path && !entries.iter().any(|e| e.local_path == *p))
            .collect();
        entries.push(entry);
        self.index.write(&lock, entries).await?;
        for old in orphaned {
            debug!(path = %old.display(), "removing superseded artifact");
            remove_if_present(&old).await?;
        }
        drop(lock);

        info!(job_id, artifact = %artifact.name, hash = %descriptor.content_hash, path = %path.display(), "artifact cached");
        Ok(ArtifactFile {
            path,
            content_hash: descriptor.content_hash.clone(),
            size: download.size,
            from_cache: false,
        })
    }

    /// Entries recorded in the persisted index.
    pub async fn entries(&self) -> Result<Vec<CacheEntry>, SimError> {
        self.index.read().await
    }

    /// Removes every cached artifact and empties the index. Returns the
    /// number of entries dropped.
    pub async fn clear(&self) -> Result<usize, SimError> {
        let lock = self.index.lock().await?;
        let entries = self.index.read().await?;
        for dir in ["objects", "tmp"] {
            match tokio::fs::remove_dir_all(self.root.join(dir)).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.index.write(&lock, Vec::new()).await?;
        info!(root = %self.root.display(), removed = entries.len(), "cache cleared");
        Ok(entries.len())
    }
}

/// SHA-256 and length of a file, read in fixed-size chunks.
pub async fn hash_file(path: &Path) -> std::io::Result<(String, u64)> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_BUFFER];
    let mut size = 0u64;
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok((format!("{:x}", hasher.finalize()), size))
}

/// Hash and size of the entry's file when it still matches the entry.
async fn verify(entry: &CacheEntry) -> Option<(String, u64)> {
    match hash_file(&entry.local_path).await {
        Ok((hash, size)) if hash == entry.content_hash => Some((hash, size)),
        Ok((actual, _)) => {
            warn!(path = %entry.local_path.display(), expected = %entry.content_hash, %actual, "cached artifact is corrupt");
            None
        }
        Err(e) => {
            warn!(path = %entry.local_path.display(), "cached artifact unreadable: {e}");
            None
        }
    }
}

/// Same artifact content at the same place, whenever it was last validated.
fn same_object(a: &CacheEntry, b: &CacheEntry) -> bool {
    a.matches(&b.job_id, &b.artifact_name)
        && a.content_hash == b.content_hash
        && a.local_path == b.local_path
}

async fn remove_if_present(path: &Path) -> Result<(), SimError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
