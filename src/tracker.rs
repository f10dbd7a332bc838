//! Pending-change tracking for vault files.
//!
//! Accumulates filesystem events (create, modify, rename, delete) into a
//! changed/deleted set that the sync trigger drains atomically. Changed
//! files are keyed by [`FileId`] identity rather than path string, so a
//! path can be re-added after a rename without colliding with its former
//! occupant.
//!
//! Rename/delete ordering is reconciled with a best-effort heuristic, not
//! a fully ordered CRDT: when a rename lands on a path that is already
//! pending deletion (delete of one file followed closely by a rename of
//! another file into the same path), the pending deletion is dropped
//! (the rename resurrected the path) and the rename's own old path is not
//! marked deleted. Events must be applied in delivery order for this to
//! hold.
//!
//! All operations are total, in-memory, and guarded by a single mutex per
//! instance so the watcher task and the sync trigger can share a tracker.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::models::{FileId, NoteFile};

#[derive(Default)]
struct ChangeSet {
    changed: HashMap<FileId, NoteFile>,
    deleted: HashSet<String>,
}

/// Tracks pending vault changes between syncs.
#[derive(Default)]
pub struct ChangeTracker {
    inner: Mutex<ChangeSet>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A file was created. Re-creation of a deleted path clears the
    /// pending deletion.
    pub fn record_create(&self, file: NoteFile) {
        let mut inner = self.inner.lock().unwrap();
        inner.deleted.remove(&file.path);
        inner.changed.insert(file.id, file);
    }

    /// A file's content was modified.
    pub fn record_modify(&self, file: NoteFile) {
        let mut inner = self.inner.lock().unwrap();
        inner.changed.insert(file.id, file);
    }

    /// A file moved from `old_path` to `file.path`.
    ///
    /// The file's identity keeps a single changed entry, now under the new
    /// path. If the destination path was pending deletion, that deletion
    /// is cancelled instead of recording `old_path` as deleted.
    pub fn record_rename(&self, file: NoteFile, old_path: &str) {
        let mut inner = self.inner.lock().unwrap();

        let resurrected = inner.deleted.remove(&file.path);
        if !resurrected {
            inner.deleted.insert(old_path.to_string());
        }

        inner.changed.insert(file.id, file);
    }

    /// A file was deleted. Its pending change, if any, is withdrawn.
    pub fn record_delete(&self, file: &NoteFile) {
        let mut inner = self.inner.lock().unwrap();
        inner.changed.remove(&file.id);
        inner.deleted.insert(file.path.clone());
    }

    /// Files with at least one pending create/modify/rename and no
    /// terminal delete.
    pub fn changed_files(&self) -> Vec<NoteFile> {
        let inner = self.inner.lock().unwrap();
        inner.changed.values().cloned().collect()
    }

    /// Paths with a terminal delete and no subsequent re-creation.
    pub fn deleted_paths(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner.deleted.iter().cloned().collect()
    }

    /// Atomically take both sets, leaving the tracker empty.
    ///
    /// Exactly one consumer (the sync trigger) drains; events arriving
    /// after the drain belong to the next sync.
    pub fn drain(&self) -> (Vec<NoteFile>, Vec<String>) {
        let mut inner = self.inner.lock().unwrap();
        let changed = std::mem::take(&mut inner.changed).into_values().collect();
        let deleted = std::mem::take(&mut inner.deleted).into_iter().collect();
        (changed, deleted)
    }

    pub fn is_empty(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.changed.is_empty() && inner.deleted.is_empty()
    }
}
