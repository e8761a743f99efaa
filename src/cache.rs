//! On-disk artifact cache
//!
//! Resolved artifacts are stored as
//! `<root>/<group>/<name>/<version>/<artifact file>` next to a
//! `<artifact file>.meta.json` record holding a BLAKE3 checksum, the resolver
//! the file came from and when it was stored.
//!
//! An entry is complete once both files exist. Complete entries are read
//! without locking. Filling an entry takes an exclusive lock on
//! `<artifact file>.lock`, so concurrent resolutions never write the same
//! entry at the same time; the artifact is written to a `.part` file and
//! renamed into place.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use blake3::Hasher;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::WalkDir;

use crate::artifacts::descriptor::Artifact;
use crate::artifacts::module::ModuleRevisionId;
use crate::error::{KilnError, Result};

const META_SUFFIX: &str = ".meta.json";

/// Cache entry metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Module the artifact belongs to
    pub module: String,
    /// Artifact file name
    pub artifact: String,
    /// Resolver the artifact was fetched from
    pub origin: String,
    /// BLAKE3 hash of the artifact contents
    pub checksum: String,
    /// Timestamp of creation
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// Size of the artifact in bytes
    pub size: u64,
}

/// Artifact cache rooted at a directory
#[derive(Debug, Clone)]
pub struct ArtifactCache {
    dir: PathBuf,
}

impl ArtifactCache {
    /// Open (and create) a cache at `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Platform cache directory, falling back to `.kiln/cache`
    pub fn default_dir() -> PathBuf {
        directories::ProjectDirs::from("", "", "kiln")
            .map(|d| d.cache_dir().join("artifacts"))
            .unwrap_or_else(|| PathBuf::from(".kiln/cache"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where an artifact of `revision` lives in the cache
    pub fn artifact_path(&self, revision: &ModuleRevisionId, artifact: &Artifact) -> PathBuf {
        self.dir
            .join(revision.group())
            .join(revision.name())
            .join(&revision.version)
            .join(artifact.file_name(&revision.version))
    }

    fn meta_path(path: &Path) -> PathBuf {
        Self::sibling(path, META_SUFFIX)
    }

    fn sibling(path: &Path, suffix: &str) -> PathBuf {
        let mut name = path.as_os_str().to_os_string();
        name.push(suffix);
        PathBuf::from(name)
    }

    /// The cached file, if the entry is complete
    pub fn get(&self, revision: &ModuleRevisionId, artifact: &Artifact) -> Option<PathBuf> {
        let path = self.artifact_path(revision, artifact);
        (path.is_file() && Self::meta_path(&path).is_file()).then_some(path)
    }

    /// Metadata of a complete entry
    pub fn entry(&self, revision: &ModuleRevisionId, artifact: &Artifact) -> Result<Option<CacheEntry>> {
        let Some(path) = self.get(revision, artifact) else {
            return Ok(None);
        };
        let content = fs::read_to_string(Self::meta_path(&path))?;
        let entry = serde_json::from_str(&content).map_err(|_| KilnError::Cache {
            message: format!("Invalid cache metadata for {}", path.display()),
        })?;
        Ok(Some(entry))
    }

    /// Return the cached artifact, filling the entry through `fetch` first if
    /// needed. `fetch` writes the artifact to the path it is given and returns
    /// `false` when its source does not have the artifact, in which case
    /// `Ok(None)` is returned.
    pub fn fetch<F>(
        &self,
        revision: &ModuleRevisionId,
        artifact: &Artifact,
        origin: &str,
        fetch: F,
    ) -> Result<Option<PathBuf>>
    where
        F: FnOnce(&Path) -> Result<bool>,
    {
        if let Some(path) = self.get(revision, artifact) {
            debug!(module = %revision, artifact = %artifact, "cache hit");
            return Ok(Some(path));
        }

        let path = self.artifact_path(revision, artifact);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let lock = File::create(Self::sibling(&path, ".lock"))?;
        lock.lock_exclusive().map_err(|e| KilnError::Cache {
            message: format!("Failed to lock cache entry {}: {}", path.display(), e),
        })?;

        // another resolution may have filled the entry while we waited
        if let Some(path) = self.get(revision, artifact) {
            return Ok(Some(path));
        }

        let part = Self::sibling(&path, ".part");
        if !fetch(&part)? {
            if let Err(e) = fs::remove_file(&part) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    debug!(path = %part.display(), error = %e, "failed to remove partial download");
                }
            }
            return Ok(None);
        }

        let (checksum, size) = Self::hash_file(&part)?;
        fs::rename(&part, &path)?;

        let entry = CacheEntry {
            module: revision.to_string(),
            artifact: artifact.file_name(&revision.version),
            origin: origin.to_string(),
            checksum,
            created_at: chrono::Utc::now(),
            size,
        };
        let meta_content = serde_json::to_string_pretty(&entry).map_err(|e| KilnError::Cache {
            message: format!("Failed to serialize cache metadata: {}", e),
        })?;
        fs::write(Self::meta_path(&path), meta_content)?;

        debug!(module = %revision, artifact = %artifact, origin, "stored artifact in cache");
        Ok(Some(path))
    }

    fn hash_file(path: &Path) -> Result<(String, u64)> {
        let content = fs::read(path)?;
        let mut hasher = Hasher::new();
        hasher.update(&content);
        Ok((hasher.finalize().to_hex().to_string(), content.len() as u64))
    }

    /// Drop every cached artifact of `revision`
    pub fn evict(&self, revision: &ModuleRevisionId) -> Result<()> {
        let dir = self
            .dir
            .join(revision.group())
            .join(revision.name())
            .join(&revision.version);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
            debug!(module = %revision, "evicted module from cache");
        }
        Ok(())
    }

    /// Clear entire cache
    pub fn clear(&self) -> Result<()> {
        if self.dir.exists() {
            fs::remove_dir_all(&self.dir)?;
            fs::create_dir_all(&self.dir)?;
        }
        Ok(())
    }

    /// Get cache statistics
    pub fn stats(&self) -> Result<CacheStats> {
        let mut total_size = 0u64;
        let mut entries = 0usize;

        for entry in WalkDir::new(&self.dir).into_iter().filter_map(|e| e.ok()) {
            let name = entry.file_name().to_string_lossy();
            if entry.file_type().is_file() && name.ends_with(META_SUFFIX) {
                let artifact = entry.path().with_file_name(name.trim_end_matches(META_SUFFIX));
                if let Ok(meta) = fs::metadata(&artifact) {
                    total_size += meta.len();
                    entries += 1;
                }
            }
        }

        Ok(CacheStats {
            entries,
            total_size,
            cache_dir: self.dir.clone(),
        })
    }
}

/// Cache statistics
#[derive(Debug, Default)]
pub struct CacheStats {
    pub entries: usize,
    pub total_size: u64,
    pub cache_dir: PathBuf,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let size_str = if self.total_size < 1024 {
            format!("{} B", self.total_size)
        } else if self.total_size < 1024 * 1024 {
            format!("{:.1} KB", self.total_size as f64 / 1024.0)
        } else {
            format!("{:.1} MB", self.total_size as f64 / (1024.0 * 1024.0))
        };

        write!(
            f,
            "{} artifacts, {} total ({})",
            self.entries,
            size_str,
            self.cache_dir.display()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn artifact() -> (ModuleRevisionId, Artifact) {
        (ModuleRevisionId::new("org.example", "lib", "1.0"), Artifact::new("lib", "jar"))
    }

    #[test]
    fn test_fetch_stores_entry_once() {
        let temp = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::new(temp.path()).unwrap();
        let (rev, artifact) = artifact();
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let path = cache
                .fetch(&rev, &artifact, "local", |dest| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    fs::write(dest, b"jar bytes")?;
                    Ok(true)
                })
                .unwrap()
                .unwrap();
            assert_eq!(path, temp.path().join("org.example/lib/1.0/lib-1.0.jar"));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let entry = cache.entry(&rev, &artifact).unwrap().unwrap();
        assert_eq!(entry.origin, "local");
        assert_eq!(entry.size, 9);
        assert_eq!(entry.checksum, blake3::hash(b"jar bytes").to_hex().to_string());
    }

    #[test]
    fn test_fetch_not_found_leaves_no_entry() {
        let temp = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::new(temp.path()).unwrap();
        let (rev, artifact) = artifact();

        let result = cache.fetch(&rev, &artifact, "local", |_| Ok(false)).unwrap();
        assert!(result.is_none());
        assert!(cache.get(&rev, &artifact).is_none());
    }

    #[test]
    fn test_fetch_not_found_removes_partial_file() {
        let temp = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::new(temp.path()).unwrap();
        let (rev, artifact) = artifact();

        let result = cache
            .fetch(&rev, &artifact, "local", |dest| {
                fs::write(dest, b"half")?;
                Ok(false)
            })
            .unwrap();
        assert!(result.is_none());
        let part = ArtifactCache::sibling(&cache.artifact_path(&rev, &artifact), ".part");
        assert!(!part.exists());
    }

    #[test]
    fn test_concurrent_fetches_write_once() {
        let temp = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::new(temp.path()).unwrap();
        let (rev, artifact) = artifact();
        let calls = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cache = cache.clone();
                let (rev, artifact) = (rev.clone(), artifact.clone());
                let calls = Arc::clone(&calls);
                std::thread::spawn(move || {
                    cache
                        .fetch(&rev, &artifact, "local", |dest| {
                            calls.fetch_add(1, Ordering::SeqCst);
                            fs::write(dest, b"jar bytes")?;
                            Ok(true)
                        })
                        .unwrap()
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap().is_some());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stats_and_clear() {
        let temp = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::new(temp.path()).unwrap();
        let (rev, artifact) = artifact();
        cache
            .fetch(&rev, &artifact, "local", |dest| {
                fs::write(dest, b"1234")?;
                Ok(true)
            })
            .unwrap();

        let stats = cache.stats().unwrap();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.total_size, 4);

        cache.clear().unwrap();
        assert_eq!(cache.stats().unwrap().entries, 0);
    }
}
