//! The persistent whiteout log.
//!
//! Deletions (and completed directory materializations) are durable: each
//! one appends a logical path to `overlay_root/deleted`. The file is
//! replayed at startup to rebuild the in-memory local set, then held open
//! in append mode for the process lifetime. Entries are never rewritten;
//! membership is the union over time and duplicates are tolerated.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use fs2::FileExt;
use parking_lot::Mutex;

use crate::error::{Result, VeneerError};
use crate::repo::paths::LogicalPath;

pub(crate) struct WhiteoutLog {
    file: Mutex<File>,
}

impl WhiteoutLog {
    /// Replay the log at `path`, then open it for appending.
    ///
    /// Returns the retained log plus the replayed entries in append order.
    /// A missing log is an empty one. The descriptor holds an exclusive
    /// advisory lock for the process lifetime; a second process opening the
    /// same overlay fails here instead of interleaving appends with ours.
    pub fn open(path: &Path) -> Result<(Self, Vec<LogicalPath>)> {
        let mut replayed = Vec::new();
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                for line in contents.lines() {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match LogicalPath::new(line) {
                        Ok(p) => replayed.push(p),
                        Err(e) => {
                            tracing::warn!("skipping malformed whiteout entry {:?}: {}", line, e)
                        }
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(VeneerError::from_io(e, path.display().to_string())),
        }

        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .map_err(|e| VeneerError::from_io(e, path.display().to_string()))?;
        file.try_lock_exclusive().map_err(|e| {
            VeneerError::Lock(format!(
                "whiteout log {} is held by another process: {}",
                path.display(),
                e
            ))
        })?;

        Ok((
            WhiteoutLog {
                file: Mutex::new(file),
            },
            replayed,
        ))
    }

    /// Append one logical path to the log.
    ///
    /// Each entry is a single short line, so the host's atomic-append
    /// guarantee keeps concurrent writers from interleaving within a line.
    pub fn append(&self, path: &LogicalPath) -> Result<()> {
        let mut file = self.file.lock();
        file.write_all(format!("{}\n", path).as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn lp(s: &str) -> LogicalPath {
        LogicalPath::new(s).unwrap()
    }

    #[test]
    fn test_missing_log_is_empty() {
        let tmp = tempdir().unwrap();
        let (_log, replayed) = WhiteoutLog::open(&tmp.path().join("deleted")).unwrap();
        assert!(replayed.is_empty());
    }

    #[test]
    fn test_append_and_replay() {
        let tmp = tempdir().unwrap();
        let log_path = tmp.path().join("deleted");

        {
            let (log, replayed) = WhiteoutLog::open(&log_path).unwrap();
            assert!(replayed.is_empty());
            log.append(&lp("/a.txt")).unwrap();
            log.append(&lp("/dir/b.txt")).unwrap();
            log.append(&lp("/a.txt")).unwrap();
        }

        let (_log, replayed) = WhiteoutLog::open(&log_path).unwrap();
        // Duplicates survive replay; the set semantics live upstream.
        assert_eq!(replayed, vec![lp("/a.txt"), lp("/dir/b.txt"), lp("/a.txt")]);
    }

    #[test]
    fn test_blank_and_malformed_lines_skipped() {
        let tmp = tempdir().unwrap();
        let log_path = tmp.path().join("deleted");
        std::fs::write(&log_path, "/keep.txt\n\n   \n/../bad\n/also/kept\n").unwrap();

        let (_log, replayed) = WhiteoutLog::open(&log_path).unwrap();
        assert_eq!(replayed, vec![lp("/keep.txt"), lp("/also/kept")]);
    }

    #[test]
    fn test_second_open_fails_while_locked() {
        let tmp = tempdir().unwrap();
        let log_path = tmp.path().join("deleted");

        let (_held, _) = WhiteoutLog::open(&log_path).unwrap();
        let second = WhiteoutLog::open(&log_path);
        assert!(matches!(second, Err(VeneerError::Lock(_))));
    }
}
