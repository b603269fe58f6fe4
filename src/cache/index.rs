use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::error::SimError;

/// One verified artifact on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheEntry {
    pub job_id: String,
    pub artifact_name: String,
    pub content_hash: String,
    pub local_path: PathBuf,
    pub size: u64,
    pub last_validated: DateTime<Utc>,
}

impl CacheEntry {
    pub fn matches(&self, job_id: &str, artifact_name: &str) -> bool {
        self.job_id == job_id && self.artifact_name == artifact_name
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct IndexFile {
    version: u32,
    entries: Vec<CacheEntry>,
}

const INDEX_VERSION: u32 = 1;

/// The cache's table of entries, persisted as JSON next to the objects.
///
/// Reads take no lock: the file is only ever replaced by rename, so a
/// reader sees either the old table or the new one. Writes require an
/// [`IndexLock`], an advisory lock on `index.lock` that excludes every
/// other handle, in this process or another, for the whole
/// read-modify-write.
#[derive(Debug, Clone)]
pub struct CacheIndex {
    path: PathBuf,
}

/// Exclusive hold on a cache index. Released on drop.
#[derive(Debug)]
pub struct IndexLock {
    _file: File,
}

impl CacheIndex {
    pub const FILE_NAME: &'static str = "index.json";
    pub const LOCK_FILE_NAME: &'static str = "index.lock";

    pub fn new(root: &Path) -> Self {
        Self {
            path: root.join(Self::FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn dir(&self) -> Result<&Path, SimError> {
        self.path.parent().ok_or_else(|| {
            SimError::Config(format!(
                "cache index {} has no parent directory",
                self.path.display()
            ))
        })
    }

    /// Waits for exclusive access to the index.
    pub async fn lock(&self) -> Result<IndexLock, SimError> {
        let dir = self.dir()?;
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(Self::LOCK_FILE_NAME);
        let file = tokio::task::spawn_blocking(move || -> std::io::Result<File> {
            let file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&path)?;
            file.lock()?;
            Ok(file)
        })
        .await
        .map_err(std::io::Error::other)??;
        Ok(IndexLock { _file: file })
    }

    /// Current entries. A missing index is empty; an unreadable one is
    /// logged and treated as empty, since every hit is re-verified anyway.
    pub async fn read(&self) -> Result<Vec<CacheEntry>, SimError> {
        let contents = match tokio::fs::read(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice::<IndexFile>(&contents) {
            Ok(file) if file.version == INDEX_VERSION => Ok(file.entries),
            Ok(file) => {
                warn!(path = %self.path.display(), version = file.version, "unsupported cache index version, ignoring");
                Ok(Vec::new())
            }
            Err(e) => {
                warn!(path = %self.path.display(), "corrupt cache index, ignoring: {e}");
                Ok(Vec::new())
            }
        }
    }

    /// Replaces the table. The caller's lock proves no other writer is active.
    pub async fn write(
        &self,
        _lock: &IndexLock,
        entries: Vec<CacheEntry>,
    ) -> Result<(), SimError> {
        let dir = self.dir()?;
        tokio::fs::create_dir_all(dir).await?;

        let body = serde_json::to_vec_pretty(&IndexFile {
            version: INDEX_VERSION,
            entries,
        })?;
        let tmp = dir.join(format!(".{}.{}.tmp", Self::FILE_NAME, Uuid::new_v4()));
        tokio::fs::write(&tmp, body).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Applies `f` to the entries and persists the result under the lock.
    pub async fn update<T>(
        &self,
        f: impl FnOnce(&mut Vec<CacheEntry>) -> T,
    ) -> Result<T, SimError> {
        let lock = self.lock().await?;
        let mut entries = self.read().await?;
        let out = f(&mut entries);
        self.write(&lock, entries).await?;
        Ok(out)
    }
}
