//! Filesystem-event bridge between the vault and the change tracker.
//!
//! Wraps a `notify` watcher and translates its raw events into tracker
//! records, assigning each path a stable [`FileId`] that follows the file
//! through renames. Events are applied synchronously on the watcher's
//! callback thread, preserving delivery order; the tracker's
//! rename/delete heuristic depends on it.
//!
//! On startup the whole vault is seeded into the tracker as created, so
//! the first sync after launch indexes everything that already exists.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::warn;

use crate::config::VaultConfig;
use crate::errors::KbResult;
use crate::models::{FileId, NoteFile};
use crate::tracker::ChangeTracker;
use crate::vault;

/// Path-to-identity bookkeeping for watched files.
struct PathIdentities {
    ids: HashMap<String, FileId>,
    next: FileId,
}

impl PathIdentities {
    fn new() -> Self {
        Self {
            ids: HashMap::new(),
            next: 1,
        }
    }

    fn assign(&mut self, path: &str) -> FileId {
        if let Some(id) = self.ids.get(path) {
            return *id;
        }
        let id = self.next;
        self.next += 1;
        self.ids.insert(path.to_string(), id);
        id
    }

    fn rename(&mut self, from: &str, to: &str) -> FileId {
        let id = self.ids.remove(from).unwrap_or_else(|| {
            let id = self.next;
            self.next += 1;
            id
        });
        self.ids.insert(to.to_string(), id);
        id
    }

    fn remove(&mut self, path: &str) -> FileId {
        self.ids.remove(path).unwrap_or(0)
    }
}

/// Keeps the underlying watcher alive for as long as events should flow.
pub struct VaultWatcher {
    _watcher: RecommendedWatcher,
}

/// Watch the vault root and feed events into `tracker`.
///
/// The existing vault content is recorded as created before watching
/// starts, so a fresh process still syncs pre-existing notes.
pub fn watch_vault(config: &VaultConfig, tracker: Arc<ChangeTracker>) -> KbResult<VaultWatcher> {
    let identities = Arc::new(Mutex::new(PathIdentities::new()));

    // Seed: everything already on disk counts as pending.
    for file in vault::scan_vault(config)? {
        let id = identities.lock().unwrap().assign(&file.path);
        tracker.record_create(NoteFile::new(id, file.path));
    }

    let root = config.root.clone();
    let callback_tracker = Arc::clone(&tracker);
    let callback_identities = Arc::clone(&identities);

    let mut watcher =
        notify::recommended_watcher(move |result: notify::Result<notify::Event>| match result {
            Ok(event) => {
                let paths = relative_paths(&root, &event.paths);
                apply_event(&callback_tracker, &callback_identities, event.kind, paths);
            }
            Err(e) => warn!("vault watch error: {e}"),
        })?;

    watcher.watch(&config.root, RecursiveMode::Recursive)?;

    Ok(VaultWatcher { _watcher: watcher })
}

fn relative_paths(root: &Path, paths: &[PathBuf]) -> Vec<String> {
    paths
        .iter()
        .map(|p| {
            p.strip_prefix(root)
                .unwrap_or(p)
                .to_string_lossy()
                .replace('\\', "/")
        })
        .collect()
}

/// Translate one raw filesystem event into tracker records.
fn apply_event(
    tracker: &ChangeTracker,
    identities: &Mutex<PathIdentities>,
    kind: EventKind,
    paths: Vec<String>,
) {
    match kind {
        EventKind::Create(_) => {
            for path in paths {
                let id = identities.lock().unwrap().assign(&path);
                tracker.record_create(NoteFile::new(id, path));
            }
        }
        EventKind::Modify(ModifyKind::Name(mode)) => match (mode, paths.as_slice()) {
            (RenameMode::Both, [from, to]) => {
                let id = identities.lock().unwrap().rename(from, to);
                tracker.record_rename(NoteFile::new(id, to.clone()), from);
            }
            // Split rename notifications degrade to delete + create.
            (RenameMode::From, [from]) => {
                let id = identities.lock().unwrap().remove(from);
                tracker.record_delete(&NoteFile::new(id, from.clone()));
            }
            (RenameMode::To, [to]) => {
                let id = identities.lock().unwrap().assign(to);
                tracker.record_create(NoteFile::new(id, to.clone()));
            }
            _ => {
                for path in paths {
                    let id = identities.lock().unwrap().assign(&path);
                    tracker.record_modify(NoteFile::new(id, path));
                }
            }
        },
        EventKind::Modify(_) => {
            for path in paths {
                let id = identities.lock().unwrap().assign(&path);
                tracker.record_modify(NoteFile::new(id, path));
            }
        }
        EventKind::Remove(_) => {
            for path in paths {
                let id = identities.lock().unwrap().remove(&path);
                tracker.record_delete(&NoteFile::new(id, path));
            }
        }
        _ => {}
    }
}
