use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ContentStoreError {
    #[error("content root not found: {0}")]
    MissingRoot(PathBuf),
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to delete {path}: {source}")]
    Delete { path: PathBuf, source: io::Error },
}

pub trait ContentStore {
    /// Deletes OS metadata files across every course and returns how many were removed.
    fn remove_redundant_content_for_courses(&self) -> Result<u64, ContentStoreError>;
}

pub fn is_redundant_asset(name: &str) -> bool {
    name == ".DS_Store" || name.starts_with("._")
}

/// Course assets on disk, one directory per course under `root`.
pub struct FsContentStore {
    root: PathBuf,
}

impl FsContentStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

impl ContentStore for FsContentStore {
    fn remove_redundant_content_for_courses(&self) -> Result<u64, ContentStoreError> {
        if !self.root.is_dir() {
            return Err(ContentStoreError::MissingRoot(self.root.clone()));
        }
        remove_redundant_in(&self.root)
    }
}

fn remove_redundant_in(dir: &Path) -> Result<u64, ContentStoreError> {
    let read_err = |source| ContentStoreError::Read {
        path: dir.to_path_buf(),
        source,
    };
    let mut removed = 0;
    for entry in fs::read_dir(dir).map_err(read_err)? {
        let entry = entry.map_err(read_err)?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(read_err)?;
        if file_type.is_dir() {
            removed += remove_redundant_in(&path)?;
            continue;
        }
        let name = entry.file_name();
        if is_redundant_asset(&name.to_string_lossy()) {
            fs::remove_file(&path).map_err(|source| ContentStoreError::Delete {
                path: path.clone(),
                source,
            })?;
            debug!(path = %path.display(), "removed redundant asset");
            removed += 1;
        }
    }
    Ok(removed)
}

/// Runs the cleanup and reports through log lines only; failures never propagate.
pub fn cleanup_assets(store: &dyn ContentStore) -> Option<u64> {
    info!("{}", "-".repeat(80));
    info!("Cleaning up assets for all courses");
    match store.remove_redundant_content_for_courses() {
        Ok(deleted) => {
            info!("{}", "=".repeat(80));
            info!("Total number of assets deleted: {deleted}");
            Some(deleted)
        }
        Err(err) => {
            info!("{}> failed to cleanup", "=".repeat(30));
            info!("Error:");
            info!("{err}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::LogCapture;
    use tempfile::TempDir;

    struct FailingStore;

    impl ContentStore for FailingStore {
        fn remove_redundant_content_for_courses(&self) -> Result<u64, ContentStoreError> {
            Err(ContentStoreError::MissingRoot(PathBuf::from("/nowhere")))
        }
    }

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn redundant_names() {
        assert!(is_redundant_asset(".DS_Store"));
        assert!(is_redundant_asset("._logo.png"));
        assert!(!is_redundant_asset("logo.png"));
        assert!(!is_redundant_asset("_logo.png"));
        assert!(!is_redundant_asset(".DS_Store.bak"));
    }

    #[test]
    fn removes_only_metadata_files() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        touch(&root.join("course-a").join(".DS_Store"));
        touch(&root.join("course-a").join("._handout.pdf"));
        touch(&root.join("course-a").join("handout.pdf"));
        touch(&root.join("course-b").join("static").join("._img.png"));
        touch(&root.join("course-b").join("static").join("img.png"));

        let store = FsContentStore::new(root.to_path_buf());
        assert_eq!(store.remove_redundant_content_for_courses().unwrap(), 3);
        assert!(root.join("course-a").join("handout.pdf").exists());
        assert!(root.join("course-b").join("static").join("img.png").exists());
        assert!(!root.join("course-a").join(".DS_Store").exists());
        assert_eq!(store.remove_redundant_content_for_courses().unwrap(), 0);
    }

    #[test]
    fn cleanup_logs_total() {
        let logs = LogCapture::default();
        let _guard = logs.install();
        let tmp = TempDir::new().unwrap();
        touch(&tmp.path().join("course").join(".DS_Store"));
        let deleted = cleanup_assets(&FsContentStore::new(tmp.path().to_path_buf()));
        assert_eq!(deleted, Some(1));
        let messages = logs.messages();
        assert_eq!(messages[1], "Cleaning up assets for all courses");
        assert_eq!(messages.last().unwrap(), "Total number of assets deleted: 1");
    }

    #[test]
    fn cleanup_failure_is_logged_without_summary() {
        let logs = LogCapture::default();
        let _guard = logs.install();
        assert_eq!(cleanup_assets(&FailingStore), None);
        let messages = logs.messages();
        assert!(messages.iter().any(|message| message.ends_with("> failed to cleanup")));
        assert!(messages.contains(&"content root not found: /nowhere".to_string()));
        assert!(!messages.iter().any(|message| message.starts_with("Total number")));
        assert_eq!(logs.errors(), 0);
    }
}
