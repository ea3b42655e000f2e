//! Logical-path algebra and layer mapping.
//!
//! Every object in the fused view is identified by a [`LogicalPath`]: a
//! forward-slash-rooted path that is free of backward (`..`) segments by
//! construction. Physical locations are derived from it through
//! [`LayerPaths`], which anchors the path either in the read-only source
//! tree or under the overlay's `mirror` directory.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Result, VeneerError};

/// Directory under the overlay root that holds materialized content.
///
/// The overlay root also carries sibling metadata (the whiteout log), so
/// mirrored content must live one level down to avoid collisions.
pub(crate) const MIRROR_DIR: &str = "mirror";

/// The whiteout log file, a sibling of [`MIRROR_DIR`] under the overlay root.
pub(crate) const WHITEOUT_LOG: &str = "deleted";

/// A normalized, rooted path in the fused view.
///
/// Construction normalizes separators (repeated and trailing slashes
/// collapse, `.` segments drop out) and rejects any segment beginning with
/// `..`, so code holding a `LogicalPath` never needs to re-validate it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LogicalPath(String);

impl LogicalPath {
    /// The root of the fused view, `/`.
    pub fn root() -> Self {
        LogicalPath("/".to_string())
    }

    /// Parse and normalize a rooted path.
    ///
    /// A leading slash is optional on input; the normalized form always
    /// carries one. Fails with `InvalidPath` if any segment begins with `..`.
    pub fn new(raw: &str) -> Result<Self> {
        let mut normalized = String::with_capacity(raw.len() + 1);
        for segment in raw.split('/') {
            if segment.is_empty() || segment == "." {
                continue;
            }
            if segment.starts_with("..") {
                return Err(VeneerError::InvalidPath(raw.to_string()));
            }
            normalized.push('/');
            normalized.push_str(segment);
        }
        if normalized.is_empty() {
            normalized.push('/');
        }
        Ok(LogicalPath(normalized))
    }

    /// Append `tail` (one segment or a slash-separated run of segments).
    ///
    /// Joining is idempotent with respect to separators: callers may pass
    /// leading or trailing slashes on either side without doubling them.
    pub fn join(&self, tail: &str) -> Result<Self> {
        LogicalPath::new(&format!("{}/{}", self.0, tail))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// The final segment, or `None` for the root.
    pub fn name(&self) -> Option<&str> {
        if self.is_root() {
            None
        } else {
            self.0.rsplit('/').next()
        }
    }

    pub(crate) fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }
}

impl fmt::Display for LogicalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Maps logical paths onto the two physical trees.
///
/// `source_path` anchors a logical path in the read-only lower layer and
/// `overlay_path` under `overlay_root/mirror`. Both mappings are total:
/// validation already happened when the [`LogicalPath`] was built.
pub(crate) struct LayerPaths {
    source_root: PathBuf,
    overlay_root: PathBuf,
    mirror_root: PathBuf,
}

impl LayerPaths {
    pub fn new(source_root: PathBuf, overlay_root: PathBuf) -> Self {
        let mirror_root = overlay_root.join(MIRROR_DIR);
        LayerPaths {
            source_root,
            overlay_root,
            mirror_root,
        }
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    pub fn overlay_root(&self) -> &Path {
        &self.overlay_root
    }

    pub fn mirror_root(&self) -> &Path {
        &self.mirror_root
    }

    pub fn whiteout_log(&self) -> PathBuf {
        self.overlay_root.join(WHITEOUT_LOG)
    }

    pub fn source_path(&self, path: &LogicalPath) -> PathBuf {
        Self::resolve(&self.source_root, path)
    }

    pub fn overlay_path(&self, path: &LogicalPath) -> PathBuf {
        Self::resolve(&self.mirror_root, path)
    }

    fn resolve(root: &Path, path: &LogicalPath) -> PathBuf {
        let mut out = root.to_path_buf();
        for segment in path.segments() {
            out.push(segment);
        }
        out
    }
}
