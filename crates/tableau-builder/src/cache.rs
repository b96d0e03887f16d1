//! Content-addressed on-disk build cache.
//!
//! Blobs are stored under the hex digest of their build inputs. A lock file
//! keeps a second writer from opening the same directory while one is live.

use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use sysinfo::{Pid, ProcessesToUpdate, System};

const LOCK_FILE: &str = ".lock";

static LOCK_ATTEMPT: AtomicU64 = AtomicU64::new(0);

/// Key of a cache entry: the blake3 digest of the build inputs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Hash a sequence of input parts. Parts are length-prefixed so
    /// `["ab", "c"]` and `["a", "bc"]` produce different keys.
    pub fn from_parts<I, P>(parts: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<[u8]>,
    {
        let mut hasher = blake3::Hasher::new();
        for part in parts {
            let bytes = part.as_ref();
            hasher.update(&(bytes.len() as u64).to_le_bytes());
            hasher.update(bytes);
        }
        Self(hasher.finalize().to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First characters of the digest, for display.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors that can occur with the build cache.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache directory {} is in use by another builder", .0.display())]
    Locked(PathBuf),

    #[error("Cache I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Single-writer blob store keyed by [`CacheKey`].
#[derive(Debug)]
pub struct BuildCache {
    dir: PathBuf,
}

impl BuildCache {
    /// Open (creating if needed) and lock a cache directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();

        fs::create_dir_all(&dir).map_err(|source| CacheError::Io {
            path: dir.clone(),
            source,
        })?;

        acquire_lock(&dir)?;

        tracing::debug!("Opened build cache at {}", dir.display());

        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn blob_path(&self, key: &CacheKey) -> PathBuf {
        let (prefix, rest) = key.as_str().split_at(2);
        self.dir.join(prefix).join(rest)
    }

    /// Read a blob, `None` when absent.
    pub async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, CacheError> {
        let path = self.blob_path(key);

        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(CacheError::Io { path, source }),
        }
    }

    /// Store a blob. The write goes to a temp file first and is renamed into
    /// place, so readers never see a partial blob.
    pub async fn put(&self, key: &CacheKey, bytes: &[u8]) -> Result<(), CacheError> {
        let path = self.blob_path(key);
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| CacheError::Io { path, source }
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(io_err(parent))?;
        }

        let tmp = path.with_extension(format!("tmp-{}", std::process::id()));
        tokio::fs::write(&tmp, bytes).await.map_err(io_err(&tmp))?;
        tokio::fs::rename(&tmp, &path).await.map_err(io_err(&path))?;

        Ok(())
    }

    /// Remove every blob, keeping the lock.
    pub async fn clear(&self) -> Result<(), CacheError> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|source| CacheError::Io {
                path: self.dir.clone(),
                source,
            })?;

        while let Some(entry) = entries.next_entry().await.map_err(|source| CacheError::Io {
            path: self.dir.clone(),
            source,
        })? {
            let path = entry.path();
            if path.is_dir() {
                tokio::fs::remove_dir_all(&path)
                    .await
                    .map_err(|source| CacheError::Io { path, source })?;
            }
        }

        Ok(())
    }
}

/// Take the directory lock. The lock file holds the owner's pid; a lock whose
/// owner is no longer running is taken over.
fn acquire_lock(dir: &Path) -> Result<(), CacheError> {
    // Written aside and linked into place so the lock never exists without a pid
    let pid = std::process::id();
    let staged = dir.join(format!(
        "{}.{}-{}",
        LOCK_FILE,
        pid,
        LOCK_ATTEMPT.fetch_add(1, Ordering::Relaxed)
    ));
    fs::write(&staged, pid.to_string()).map_err(|source| CacheError::Io {
        path: staged.clone(),
        source,
    })?;

    let result = link_lock(dir, &staged);
    let _ = fs::remove_file(&staged);
    result
}

fn link_lock(dir: &Path, staged: &Path) -> Result<(), CacheError> {
    let lock_path = dir.join(LOCK_FILE);
    let io_err = |source| CacheError::Io {
        path: lock_path.clone(),
        source,
    };

    for _ in 0..2 {
        match fs::hard_link(staged, &lock_path) {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
            Err(e) => return Err(io_err(e)),
        }

        match lock_holder(&lock_path) {
            Some(holder) if process_alive(holder) => {
                return Err(CacheError::Locked(dir.to_path_buf()));
            }
            holder => {
                tracing::warn!(
                    holder = holder.unwrap_or_default(),
                    "Removing stale build cache lock in {}",
                    dir.display()
                );
                match fs::remove_file(&lock_path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(io_err(e)),
                }
            }
        }
    }

    Err(CacheError::Locked(dir.to_path_buf()))
}

/// Pid recorded in a lock file, `None` when unreadable.
fn lock_holder(lock_path: &Path) -> Option<u32> {
    fs::read_to_string(lock_path).ok()?.trim().parse().ok()
}

fn process_alive(pid: u32) -> bool {
    if pid == std::process::id() {
        return true;
    }

    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).is_some()
}

impl Drop for BuildCache {
    fn drop(&mut self) {
        let _ = fs::remove_file(self.dir.join(LOCK_FILE));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn keys_are_length_prefixed() {
        let a = CacheKey::from_parts(["ab", "c"]);
        let b = CacheKey::from_parts(["a", "bc"]);

        assert_ne!(a, b);
        assert_eq!(a, CacheKey::from_parts(["ab", "c"]));
        assert_eq!(a.as_str().len(), 64);
    }

    #[tokio::test]
    async fn stores_and_reads_blobs() {
        let temp = tempdir().unwrap();
        let cache = BuildCache::open(temp.path().join("cache")).unwrap();
        let key = CacheKey::from_parts(["input"]);

        assert_eq!(cache.get(&key).await.unwrap(), None);

        cache.put(&key, b"output").await.unwrap();

        assert_eq!(cache.get(&key).await.unwrap(), Some(b"output".to_vec()));
    }

    #[tokio::test]
    async fn clear_removes_blobs() {
        let temp = tempdir().unwrap();
        let cache = BuildCache::open(temp.path()).unwrap();
        let key = CacheKey::from_parts(["input"]);
        cache.put(&key, b"output").await.unwrap();

        cache.clear().await.unwrap();

        assert_eq!(cache.get(&key).await.unwrap(), None);
    }

    #[test]
    fn second_open_is_locked_until_drop() {
        let temp = tempdir().unwrap();
        let first = BuildCache::open(temp.path()).unwrap();

        assert!(matches!(
            BuildCache::open(temp.path()),
            Err(CacheError::Locked(_))
        ));

        drop(first);

        assert!(BuildCache::open(temp.path()).is_ok());
    }

    // Above Linux's PID_MAX_LIMIT and macOS's pid range
    const EXITED_PID: u32 = 4_194_305;

    #[test]
    fn lock_of_an_exited_holder_is_taken_over() {
        let temp = tempdir().unwrap();
        let crashed = BuildCache::open(temp.path()).unwrap();
        // A holder that never ran its destructor
        std::mem::forget(crashed);

        // Still running, so still locked
        assert!(matches!(
            BuildCache::open(temp.path()),
            Err(CacheError::Locked(_))
        ));

        fs::write(temp.path().join(LOCK_FILE), EXITED_PID.to_string()).unwrap();

        let reopened = BuildCache::open(temp.path()).unwrap();
        assert_eq!(
            fs::read_to_string(temp.path().join(LOCK_FILE)).unwrap(),
            std::process::id().to_string()
        );
        drop(reopened);
        assert!(!temp.path().join(LOCK_FILE).exists());
    }

    #[test]
    fn unreadable_lock_is_taken_over() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join(LOCK_FILE), "").unwrap();

        assert!(BuildCache::open(temp.path()).is_ok());
    }

    #[test]
    fn open_leaves_no_staging_files() {
        let temp = tempdir().unwrap();
        let _cache = BuildCache::open(temp.path()).unwrap();
        let _ = BuildCache::open(temp.path());

        let names: Vec<_> = fs::read_dir(temp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec![LOCK_FILE.to_string()]);
    }
}
