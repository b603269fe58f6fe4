//! Dataset Fetcher & Cache.

mod fetcher;
mod index;

pub use fetcher::{ArtifactFile, DatasetFetcher, hash_file};
pub use index::{CacheEntry, CacheIndex, IndexLock};
