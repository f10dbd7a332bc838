//! Vault filesystem access and sync exclusion rules.
//!
//! Scanning walks the vault root and yields one [`NoteFile`] per regular
//! file, with identities derived from the vault-relative path so repeated
//! scans agree with each other. The exclusion filter is applied by the
//! sync trigger to the drained change set, never inside the tracker.

use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::path::Path;

use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::config::VaultConfig;
use crate::errors::KbResult;
use crate::models::{FileId, NoteFile};

/// Derive a stable identity for a scanned path.
///
/// Scans have no rename history to track, so the path itself is the best
/// available identity. Watcher-assigned identities (which do survive
/// renames) live in a separate id space and never mix with scan results
/// within one change set.
pub fn scan_file_id(path: &str) -> FileId {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    path.hash(&mut hasher);
    hasher.finish()
}

/// Walk the vault root and return every regular file, sorted by path.
pub fn scan_vault(config: &VaultConfig) -> KbResult<Vec<NoteFile>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(&config.root) {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(&config.root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        files.push(NoteFile::new(scan_file_id(&rel_str), rel_str));
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

/// Read a note's content by vault-relative path.
pub fn read_note(root: &Path, rel_path: &str) -> std::io::Result<String> {
    std::fs::read_to_string(root.join(rel_path))
}

/// Folder and extension exclusion rules from the sync configuration.
pub struct ExclusionFilter {
    folders: GlobSet,
    extensions: HashSet<String>,
}

impl ExclusionFilter {
    pub fn from_config(config: &VaultConfig) -> KbResult<Self> {
        let mut builder = GlobSetBuilder::new();
        for folder in &config.excluded_folders {
            let folder = folder.trim_end_matches('/');
            builder.add(Glob::new(&format!("{}/**", folder))?);
        }

        let extensions = config
            .excluded_extensions
            .iter()
            .map(|e| e.trim_start_matches('.').to_lowercase())
            .collect();

        Ok(Self {
            folders: builder.build()?,
            extensions,
        })
    }

    /// Whether a changed file survives the exclusion rules.
    pub fn allows(&self, file: &NoteFile) -> bool {
        if let Some(ext) = file.extension() {
            if self.extensions.contains(&ext) {
                return false;
            }
        }
        self.allows_path(&file.path)
    }

    /// Whether a deleted path survives the folder rules.
    pub fn allows_path(&self, path: &str) -> bool {
        !self.folders.is_match(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn vault_config(folders: &[&str], extensions: &[&str]) -> VaultConfig {
        VaultConfig {
            root: PathBuf::from("/tmp/vault"),
            excluded_folders: folders.iter().map(|s| s.to_string()).collect(),
            excluded_extensions: extensions.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_excluded_extension_filtered() {
        let filter = ExclusionFilter::from_config(&vault_config(&[], &["pdf", ".PNG"])).unwrap();
        assert!(!filter.allows(&NoteFile::new(1, "doc.pdf")));
        assert!(!filter.allows(&NoteFile::new(2, "image.png")));
        assert!(filter.allows(&NoteFile::new(3, "note.md")));
    }

    #[test]
    fn test_excluded_folder_filtered() {
        let filter = ExclusionFilter::from_config(&vault_config(&["templates"], &[])).unwrap();
        assert!(!filter.allows(&NoteFile::new(1, "templates/daily.md")));
        assert!(!filter.allows(&NoteFile::new(2, "templates/deep/nested.md")));
        assert!(filter.allows(&NoteFile::new(3, "notes/daily.md")));
    }

    #[test]
    fn test_deleted_path_folder_rules() {
        let filter = ExclusionFilter::from_config(&vault_config(&["archive/"], &[])).unwrap();
        assert!(!filter.allows_path("archive/old.md"));
        assert!(filter.allows_path("current.md"));
    }

    #[test]
    fn test_scan_vault_lists_files_sorted() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("sub")).unwrap();
        std::fs::write(tmp.path().join("b.md"), "beta").unwrap();
        std::fs::write(tmp.path().join("sub/a.md"), "alpha").unwrap();

        let config = VaultConfig {
            root: tmp.path().to_path_buf(),
            excluded_folders: vec![],
            excluded_extensions: vec![],
        };

        let files = scan_vault(&config).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["b.md", "sub/a.md"]);
        // Identity is stable across scans.
        assert_eq!(files[0].id, scan_file_id("b.md"));
    }

    #[test]
    fn test_read_note() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.md"), "content").unwrap();
        assert_eq!(read_note(tmp.path(), "a.md").unwrap(), "content");
        assert!(read_note(tmp.path(), "missing.md").is_err());
    }
}
