//! The single buffered open path.

use std::path::{Path, PathBuf};

/// A path that was requested before any viewer was ready for it.
///
/// Single-valued: a newer request overwrites an older one that has not been
/// delivered yet (latest wins, nothing is queued).
#[derive(Debug, Default)]
pub struct PendingOpenPath {
    slot: Option<PathBuf>,
}

impl PendingOpenPath {
    /// Store `path`, returning whatever it replaced.
    pub fn set(&mut self, path: PathBuf) -> Option<PathBuf> {
        self.slot.replace(path)
    }

    /// Store `path` only if nothing is pending. Returns whether it was stored.
    pub fn set_if_empty(&mut self, path: PathBuf) -> bool {
        if self.slot.is_some() {
            return false;
        }
        self.slot = Some(path);
        true
    }

    /// Look without consuming.
    pub fn peek(&self) -> Option<&Path> {
        self.slot.as_deref()
    }

    /// Consume for delivery.
    pub fn take(&mut self) -> Option<PathBuf> {
        self.slot.take()
    }
}
