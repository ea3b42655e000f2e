//! In-flight materialization table.
//!
//! At most one copy into the overlay runs per target path at any instant.
//! The first caller for a target claims the entry and performs the copy;
//! everyone else who arrives while it is in flight subscribes to the same
//! completion channel and observes the identical result, success or
//! failure. The entry is removed before the result is signaled, so a
//! caller can never join a materialization that has already terminated;
//! a fresh call after a failure starts a fresh copy.

use std::path::{Path, PathBuf};

use fxhash::FxHashMap;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::error::Result;

pub(crate) type MirrorResult = Result<()>;

pub(crate) enum MirrorTicket {
    /// This caller claimed the entry and must run the copy, then `settle`.
    Owner(broadcast::Receiver<MirrorResult>),
    /// A copy is already in flight; await the shared result.
    Waiter(broadcast::Receiver<MirrorResult>),
}

#[derive(Default)]
pub(crate) struct MirrorTable {
    inflight: Mutex<FxHashMap<PathBuf, broadcast::Sender<MirrorResult>>>,
}

impl MirrorTable {
    pub fn join_or_claim(&self, target: &Path) -> MirrorTicket {
        let mut inflight = self.inflight.lock();
        if let Some(tx) = inflight.get(target) {
            MirrorTicket::Waiter(tx.subscribe())
        } else {
            let (tx, rx) = broadcast::channel(1);
            inflight.insert(target.to_path_buf(), tx);
            MirrorTicket::Owner(rx)
        }
    }

    /// Remove the entry for `target`, then fan the result out to waiters.
    ///
    /// Removal happens strictly before the send: a caller arriving after
    /// this point starts a new materialization instead of joining a
    /// terminal one.
    pub fn settle(&self, target: &Path, result: MirrorResult) {
        let tx = self.inflight.lock().remove(target);
        if let Some(tx) = tx {
            // No receivers means every caller abandoned the result.
            let _ = tx.send(result);
        }
    }

    #[cfg(test)]
    pub fn inflight_count(&self) -> usize {
        self.inflight.lock().len()
    }
}

/// Settles an owned entry even if the owning future is dropped mid-copy.
///
/// Waiters attached to an abandoned materialization observe an error and
/// the next caller restarts it; without this, an abandoned owner would
/// leave the entry in flight forever.
pub(crate) struct SettleGuard<'a> {
    mirrors: &'a MirrorTable,
    target: &'a Path,
    armed: bool,
}

impl<'a> SettleGuard<'a> {
    pub fn new(mirrors: &'a MirrorTable, target: &'a Path) -> Self {
        SettleGuard {
            mirrors,
            target,
            armed: true,
        }
    }

    pub fn settle(mut self, result: MirrorResult) {
        self.armed = false;
        self.mirrors.settle(self.target, result);
    }
}

impl Drop for SettleGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.mirrors.settle(
                self.target,
                Err(std::io::Error::other("materialization abandoned").into()),
            );
        }
    }
}
