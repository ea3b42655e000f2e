//! Collaborator-facing adapter.
//!
//! The protocol layer consumes the repository exclusively through
//! [`FileStore`]: the core path operations, stat with file-mode
//! normalization, composed rename and exclusive create, and the per-path
//! resource metadata (lock state, dead properties) that the repository
//! core is oblivious to.

mod meta;
mod stat_cache;

pub use meta::{LockToken, ResourceMeta};
pub use stat_cache::StatCache;

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::SystemTime;

use fxhash::FxHashMap;
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::{Result, VeneerError};
use crate::repo::paths::LogicalPath;
use crate::repo::Repository;

/// File information as reported outward.
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub is_dir: bool,
    pub len: u64,
    /// Unix permission bits after write-bit normalization.
    pub mode: u32,
    pub modified: Option<SystemTime>,
}

/// Force the write bit on for every permission class with the read bit set.
///
/// The fused view must appear writable to clients even though the source
/// is mounted read-only; modes copied verbatim from the source would
/// advertise read-only files that the overlay happily accepts writes to.
pub fn normalize_mode(mode: u32) -> u32 {
    mode | ((mode & 0o444) >> 1)
}

pub struct FileStore {
    repo: Repository,
    resources: Mutex<FxHashMap<LogicalPath, ResourceMeta>>,
}

impl FileStore {
    pub fn new(repo: Repository) -> Self {
        FileStore {
            repo,
            resources: Mutex::new(FxHashMap::default()),
        }
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    /// Physical path for a read-only open. Never fails; opening the result
    /// may, and that failure is classified at this boundary by the caller.
    pub async fn read_path(&self, path: &LogicalPath) -> PathBuf {
        self.repo.read_path(path).await
    }

    /// Physical overlay path for a write, materializing the source entry
    /// first if needed.
    pub async fn readwrite_path(&self, path: &LogicalPath) -> Result<PathBuf> {
        self.repo.readwrite_path(path).await
    }

    /// Remove `path` and drop its resource metadata.
    pub async fn remove(&self, path: &LogicalPath) -> Result<()> {
        self.repo.remove(path).await?;
        self.resources.lock().remove(path);
        Ok(())
    }

    pub async fn read_dir(&self, path: &LogicalPath) -> Result<Vec<String>> {
        self.repo.read_dir(path).await
    }

    /// Stat `path` through the per-request cache, reporting a normalized
    /// mode. A missing entry in either layer is NotFound here.
    pub async fn stat(&self, path: &LogicalPath, cache: &StatCache) -> Result<FileInfo> {
        let physical = self.repo.read_path(path).await;
        let meta = cache
            .stat(&physical)
            .await
            .map_err(|e| VeneerError::from_io(e, path.as_str()))?;
        Ok(FileInfo {
            is_dir: meta.is_dir(),
            len: meta.len(),
            mode: normalize_mode(meta.permissions().mode() & 0o7777),
            modified: meta.modified().ok(),
        })
    }

    /// Admit a create of `path`, failing if it is already visible in the
    /// fused view. The caller opens the returned overlay path with
    /// create-new semantics, which closes the remaining race window.
    pub async fn create_exclusive(&self, path: &LogicalPath) -> Result<PathBuf> {
        let physical = self.repo.read_path(path).await;
        if tokio::fs::symlink_metadata(&physical).await.is_ok() {
            return Err(VeneerError::AlreadyExists(path.to_string()));
        }
        self.repo.readwrite_path(path).await
    }

    /// Move `path` to `dest` within the fused view.
    ///
    /// The source is materialized, the overlay entry is renamed, and the
    /// old path is whited out; resource metadata follows the rename.
    /// Without `overwrite`, an existing destination is AlreadyExists.
    /// Directory recursion is the protocol layer's to drive, as with
    /// removal.
    pub async fn rename(
        &self,
        path: &LogicalPath,
        dest: &LogicalPath,
        overwrite: bool,
    ) -> Result<()> {
        if !overwrite {
            let dest_physical = self.repo.read_path(dest).await;
            if tokio::fs::symlink_metadata(&dest_physical).await.is_ok() {
                return Err(VeneerError::AlreadyExists(dest.to_string()));
            }
        }

        self.repo.ensure_local(path).await?;
        let overlay_src = self.repo.overlay_path(path);
        let overlay_dest = self.repo.overlay_path(dest);
        if let Some(parent) = overlay_dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| VeneerError::from_io(e, dest.as_str()))?;
        }
        tokio::fs::rename(&overlay_src, &overlay_dest)
            .await
            .map_err(|e| VeneerError::from_io(e, path.as_str()))?;
        self.repo.register_local(dest, false)?;
        self.repo.remove(path).await?;

        let mut resources = self.resources.lock();
        if let Some(meta) = resources.remove(path) {
            resources.insert(dest.clone(), meta);
        }
        Ok(())
    }

    /// Take the lock on `path`. Any held lock conflicts.
    pub fn lock(&self, path: &LogicalPath, lock: LockToken) -> Result<()> {
        let mut resources = self.resources.lock();
        let meta = resources.entry(path.clone()).or_default();
        if meta.lock.is_some() {
            return Err(VeneerError::Lock(format!("{} is locked", path)));
        }
        meta.lock = Some(lock);
        Ok(())
    }

    /// Release the lock on `path`; the token must match the one held.
    pub fn unlock(&self, path: &LogicalPath, token: &str) -> Result<()> {
        let mut resources = self.resources.lock();
        let Some(meta) = resources.get_mut(path) else {
            return Err(VeneerError::Lock(format!("{} is not locked", path)));
        };
        match &meta.lock {
            Some(held) if held.token == token => {
                meta.lock = None;
                Ok(())
            }
            Some(_) => Err(VeneerError::Lock(format!(
                "token does not match the lock on {}",
                path
            ))),
            None => Err(VeneerError::Lock(format!("{} is not locked", path))),
        }
    }

    pub fn lock_info(&self, path: &LogicalPath) -> Option<LockToken> {
        self.resources
            .lock()
            .get(path)
            .and_then(|meta| meta.lock.clone())
    }

    pub fn set_property(&self, path: &LogicalPath, name: impl Into<String>, value: Value) {
        self.resources
            .lock()
            .entry(path.clone())
            .or_default()
            .properties
            .insert(name.into(), value);
    }

    pub fn remove_property(&self, path: &LogicalPath, name: &str) {
        if let Some(meta) = self.resources.lock().get_mut(path) {
            meta.properties.remove(name);
        }
    }

    pub fn properties(&self, path: &LogicalPath) -> FxHashMap<String, Value> {
        self.resources
            .lock()
            .get(path)
            .map(|meta| meta.properties.clone())
            .unwrap_or_default()
    }
}
