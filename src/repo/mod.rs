//! The mirror repository: the copy-on-write core.
//!
//! A [`Repository`] presents a read-write view of a read-only source tree
//! by fusing an overlay over it. Reads resolve to the overlay when it is
//! authoritative and fall through to the source otherwise; the first write
//! to a source entry lazily copies it into the overlay; deletions become
//! durable whiteouts. The in-memory local set tracks every path the
//! overlay is authoritative for and is rebuilt at startup from the overlay
//! tree plus the whiteout log.

mod mirror;
pub mod paths;
mod whiteout;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use fxhash::FxHashSet;
use parking_lot::Mutex;

use crate::error::{Result, VeneerError};
use mirror::{MirrorTable, MirrorTicket, SettleGuard};
use paths::{LayerPaths, LogicalPath};
use whiteout::WhiteoutLog;

/// The two roots a repository is built from.
#[derive(Debug, Clone)]
pub struct RepoConfig {
    /// Read-only lower layer.
    pub source_root: PathBuf,
    /// Read-write upper layer; holds `mirror/` and the whiteout log.
    pub overlay_root: PathBuf,
}

/// Copy-on-write mirror repository.
///
/// Cheap to clone: clones share the local set, the in-flight mirror table
/// and the whiteout log descriptor.
#[derive(Clone)]
pub struct Repository {
    inner: Arc<RepoInner>,
}

struct RepoInner {
    layers: LayerPaths,
    local: Mutex<FxHashSet<LogicalPath>>,
    mirrors: MirrorTable,
    whiteouts: WhiteoutLog,
}

impl Repository {
    /// Open a repository over the given roots.
    ///
    /// Creates the overlay `mirror` directory if needed, scans it to
    /// rebuild the local set, replays the whiteout log and retains its
    /// descriptor in append mode. Completes before any request is served.
    pub fn open(config: RepoConfig) -> Result<Self> {
        let layers = LayerPaths::new(config.source_root, config.overlay_root);
        tracing::info!(
            "mirror repository: source={}, overlay={}",
            layers.source_root().display(),
            layers.overlay_root().display()
        );

        std::fs::create_dir_all(layers.mirror_root())
            .map_err(|e| VeneerError::from_io(e, layers.mirror_root().display().to_string()))?;

        let mut local = FxHashSet::default();
        Self::scan_overlay(layers.mirror_root(), &mut local);
        tracing::info!("{} local entries after overlay scan", local.len());

        let (whiteouts, replayed) = WhiteoutLog::open(&layers.whiteout_log())?;
        local.extend(replayed);
        tracing::info!("{} local entries after whiteout replay", local.len());

        Ok(Repository {
            inner: Arc::new(RepoInner {
                layers,
                local: Mutex::new(local),
                mirrors: MirrorTable::default(),
                whiteouts,
            }),
        })
    }

    /// Iterative walk of the overlay tree; every non-directory entry is
    /// registered under its logical path. Unreadable directories are
    /// logged and skipped.
    fn scan_overlay(mirror_root: &Path, local: &mut FxHashSet<LogicalPath>) {
        let mut stack = vec![(mirror_root.to_path_buf(), LogicalPath::root())];
        while let Some((dir, logical)) = stack.pop() {
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!("overlay scan: failed to read {}: {}", dir.display(), e);
                    continue;
                }
            };
            for entry in entries {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        tracing::warn!("overlay scan: failed entry in {}: {}", dir.display(), e);
                        continue;
                    }
                };
                let name = entry.file_name();
                let child = match logical.join(&name.to_string_lossy()) {
                    Ok(child) => child,
                    Err(e) => {
                        tracing::warn!("overlay scan: skipping {:?}: {}", name, e);
                        continue;
                    }
                };
                match entry.file_type() {
                    Ok(ft) if ft.is_dir() => stack.push((entry.path(), child)),
                    Ok(_) => {
                        local.insert(child);
                    }
                    Err(e) => {
                        tracing::warn!("overlay scan: failed to type {:?}: {}", name, e);
                    }
                }
            }
        }
    }

    /// Physical location for opening `path` read-only.
    ///
    /// Total: the overlay wins when the path is local or an overlay file
    /// exists, the source otherwise. Opening the returned path may still
    /// fail with the host's not-found error.
    pub async fn read_path(&self, path: &LogicalPath) -> PathBuf {
        let overlay = self.inner.layers.overlay_path(path);
        if self.is_local(path) {
            return overlay;
        }
        // The one probe into the physical world; repeated reads of a
        // materialized path hit the local set instead.
        if tokio::fs::symlink_metadata(&overlay).await.is_ok() {
            return overlay;
        }
        self.inner.layers.source_path(path)
    }

    /// Physical location for opening `path` read-write, promoting it to the
    /// overlay first if needed.
    ///
    /// A path absent from both layers is admitted as a create-new: the
    /// returned overlay path may not exist yet and the caller produces the
    /// file there.
    pub async fn readwrite_path(&self, path: &LogicalPath) -> Result<PathBuf> {
        let overlay = self.inner.layers.overlay_path(path);
        match self.ensure_local(path).await {
            Ok(()) => Ok(overlay),
            Err(e) if e.is_not_found() => {
                self.register_local(path, false)?;
                Ok(overlay)
            }
            Err(e) => Err(e),
        }
    }

    pub(crate) async fn ensure_local(&self, path: &LogicalPath) -> Result<()> {
        if self.is_local(path) {
            return Ok(());
        }
        self.materialize(path).await
    }

    /// Copy `path` from the source into the overlay, deduplicated per
    /// overlay target: concurrent callers share one copy and one result.
    pub(crate) fn materialize<'a>(
        &'a self,
        path: &'a LogicalPath,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let target = self.inner.layers.overlay_path(path);
            match self.inner.mirrors.join_or_claim(&target) {
                MirrorTicket::Waiter(mut rx) => match rx.recv().await {
                    Ok(result) => result,
                    Err(_) => Err(
                        std::io::Error::other("materialization ended without a result").into(),
                    ),
                },
                MirrorTicket::Owner(_rx) => {
                    let guard = SettleGuard::new(&self.inner.mirrors, &target);
                    let result = self.run_mirror(path, &target).await;
                    if let Err(e) = &result {
                        tracing::warn!("mirror of {} failed: {}", path, e);
                    }
                    // The entry is removed before waiters see the result.
                    guard.settle(result.clone());
                    result
                }
            }
        })
    }

    async fn run_mirror(&self, path: &LogicalPath, target: &Path) -> Result<()> {
        // Parent directories first: even a create-new (missing source)
        // leaves the overlay ready for the caller to produce the file.
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| VeneerError::from_io(e, path.as_str()))?;
        }

        let source = self.inner.layers.source_path(path);
        let meta = tokio::fs::symlink_metadata(&source)
            .await
            .map_err(|e| VeneerError::from_io(e, path.as_str()))?;

        if meta.is_dir() {
            self.mirror_directory(path, &source, target).await
        } else {
            tokio::fs::copy(&source, target)
                .await
                .map_err(|e| VeneerError::from_io(e, path.as_str()))?;
            // The overlay file is its own durable evidence; no log entry.
            self.register_local(path, false)
        }
    }

    /// Directory-mode materialization: mirror every child, then commit the
    /// directory itself to the whiteout log as a durable subtree marker.
    async fn mirror_directory(
        &self,
        path: &LogicalPath,
        source: &Path,
        target: &Path,
    ) -> Result<()> {
        let mut entries = tokio::fs::read_dir(source)
            .await
            .map_err(|e| VeneerError::from_io(e, path.as_str()))?;

        match tokio::fs::create_dir(target).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(VeneerError::from_io(e, path.as_str())),
        }

        let mut children = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| VeneerError::from_io(e, path.as_str()))?
        {
            let child = path.join(&entry.file_name().to_string_lossy())?;
            if self.is_local(&child) {
                // Already materialized, or whited-out: a deletion must not
                // be resurrected by its parent's materialization.
                continue;
            }
            let repo = self.clone();
            children.push(tokio::spawn(async move { repo.materialize(&child).await }));
        }

        let mut failure: Option<VeneerError> = None;
        for child in children {
            match child.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failure.get_or_insert(e);
                }
                Err(e) => {
                    failure.get_or_insert(std::io::Error::other(e).into());
                }
            }
        }
        if let Some(e) = failure {
            // No rollback: partial overlay content stays, and the next
            // attempt skips the children that did make it.
            return Err(e);
        }

        self.register_local(path, true)
    }

    /// Record `path` as overlay-authoritative.
    ///
    /// With `persist`, the path is also appended to the whiteout log:
    /// deletions and completed directory materializations are durable,
    /// while plain file copies rely on the overlay file itself. The
    /// in-memory insert happens first, so memory reflects intent even if
    /// the append fails.
    pub(crate) fn register_local(&self, path: &LogicalPath, persist: bool) -> Result<()> {
        self.inner.local.lock().insert(path.clone());
        if persist {
            self.inner.whiteouts.append(path)?;
        }
        Ok(())
    }

    /// Whether the overlay is authoritative for `path` (materialized or
    /// whited-out).
    pub fn is_local(&self, path: &LogicalPath) -> bool {
        self.inner.local.lock().contains(path)
    }

    /// Remove `path` from the fused view.
    ///
    /// Unlinks the overlay entry if one exists (a directory must already be
    /// empty; callers drive recursion children-first) and records a
    /// persistent whiteout either way, so a source-only entry is hidden
    /// too. A missing overlay entry is success, not an error.
    pub async fn remove(&self, path: &LogicalPath) -> Result<()> {
        let overlay = self.inner.layers.overlay_path(path);
        match tokio::fs::symlink_metadata(&overlay).await {
            Ok(meta) => {
                let removed = if meta.is_dir() {
                    tokio::fs::remove_dir(&overlay).await
                } else {
                    tokio::fs::remove_file(&overlay).await
                };
                removed.map_err(|e| VeneerError::from_io(e, path.as_str()))?;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Source-only entry; the whiteout alone hides it.
            }
            Err(e) => return Err(VeneerError::from_io(e, path.as_str())),
        }
        self.register_local(path, true)
    }

    /// Fused listing of the logical children of directory `path`.
    ///
    /// Source entries whose logical path is local (whited-out or superseded
    /// by the overlay) are dropped, then the overlay entries are appended.
    /// One side missing falls back to the other; both missing is NotFound.
    pub async fn read_dir(&self, path: &LogicalPath) -> Result<Vec<String>> {
        let source = Self::list_names(&self.inner.layers.source_path(path)).await;
        let overlay = Self::list_names(&self.inner.layers.overlay_path(path)).await;

        let source = self.recover_listing(path, source, "source")?;
        let overlay = self.recover_listing(path, overlay, "overlay")?;

        let (mut names, overlay_names) = match (source, overlay) {
            (None, None) => return Err(VeneerError::NotFound(path.to_string())),
            (source, overlay) => (source.unwrap_or_default(), overlay.unwrap_or_default()),
        };

        {
            let local = self.inner.local.lock();
            names.retain(|name| match path.join(name) {
                Ok(child) => !local.contains(&child),
                Err(_) => false,
            });
        }
        names.extend(overlay_names);
        Ok(names)
    }

    /// NotFound on one side of a fused listing is recovered as absence;
    /// everything else is logged and propagated.
    fn recover_listing(
        &self,
        path: &LogicalPath,
        listing: std::io::Result<Vec<String>>,
        side: &str,
    ) -> Result<Option<Vec<String>>> {
        match listing {
            Ok(names) => Ok(Some(names)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => {
                tracing::warn!("failed to list {} side of {}: {}", side, path, e);
                Err(VeneerError::from_io(e, path.as_str()))
            }
        }
    }

    async fn list_names(dir: &Path) -> std::io::Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(dir).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }

    pub(crate) fn overlay_path(&self, path: &LogicalPath) -> PathBuf {
        self.inner.layers.overlay_path(path)
    }

    #[cfg(test)]
    pub(crate) fn inflight_mirrors(&self) -> usize {
        self.inner.mirrors.inflight_count()
    }
}
