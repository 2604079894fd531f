pub mod volume;

use crate::{config::StorageConfig, error::MaestroError};
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

/// All supported blob stores
#[derive(Debug, Clone)]
pub enum StorageAdapters {
    Volume(volume::VolumeStorage),
}

impl StorageAdapters {
    pub fn load(config: &StorageConfig) -> Self {
        Self::Volume(volume::VolumeStorage::new(config.volume.clone()))
    }

    /// root of the storage volume
    pub fn root(&self) -> &Path {
        match self {
            Self::Volume(storage) => storage.root(),
        }
    }

    /// `<root>/<username>/<name>`, the directory of a dataset or task output
    pub fn dataset_dir(&self, username: &str, name: &str) -> PathBuf {
        self.root().join(username).join(name)
    }

    pub fn exists(&self, path: &Path) -> bool {
        match self {
            Self::Volume(storage) => storage.exists(path),
        }
    }

    /// create a directory with all parents
    pub fn create_dir(&self, path: &Path) -> Result<(), MaestroError> {
        match self {
            Self::Volume(storage) => storage.create_dir(path),
        }
    }

    /// copy a file or the contents of a directory into `destination`,
    /// returns the copied files at their new location
    pub fn copy(&self, source: &Path, destination: &Path) -> Result<Vec<PathBuf>, MaestroError> {
        match self {
            Self::Volume(storage) => storage.copy(source, destination),
        }
    }

    pub fn remove(&self, path: &Path) -> Result<(), MaestroError> {
        match self {
            Self::Volume(storage) => storage.remove(path),
        }
    }

    /// all files below `path` in lexicographic order
    pub fn list_files(&self, path: &Path) -> Result<Vec<PathBuf>, MaestroError> {
        match self {
            Self::Volume(storage) => storage.list_files(path),
        }
    }

    /// remove a path, an already missing path is only reported as a warning
    pub fn remove_best_effort(&self, path: &Path) -> Result<(), MaestroError> {
        match self.remove(path) {
            Err(error) if error.is_missing_path() => {
                warn!(path = ?path, "Path does not exist in the storage, nothing to remove");

                Ok(())
            }
            result => result,
        }
    }
}

/// Bookkeeping tag of a file: md5 over the path string.
/// This does not read the file and can not detect content changes.
pub fn path_tag(path: &str) -> String {
    format!("{:x}", md5::compute(path.as_bytes()))
}

#[derive(Debug)]
pub enum Compensation {
    RemoveDir(PathBuf),
    RemoveFiles(Vec<PathBuf>),
}

/// Ordered undo list for the storage side of an operation.
///
/// Actions run in reverse order when the list is dropped without `commit`.
#[derive(Debug)]
pub struct Compensations<'a> {
    storage: &'a StorageAdapters,
    actions: Vec<Compensation>,
}

impl<'a> Compensations<'a> {
    pub fn new(storage: &'a StorageAdapters) -> Self {
        Self {
            storage,
            actions: Vec::new(),
        }
    }

    pub fn push(&mut self, action: Compensation) {
        self.actions.push(action);
    }

    /// keep every storage change
    pub fn commit(mut self) {
        self.actions.clear();
    }
}

impl Drop for Compensations<'_> {
    fn drop(&mut self) {
        while let Some(action) = self.actions.pop() {
            let paths = match action {
                Compensation::RemoveDir(path) => vec![path],
                Compensation::RemoveFiles(paths) => paths,
            };

            for path in paths {
                match self.storage.remove_best_effort(&path) {
                    Ok(()) => debug!(path = ?path, "Rolled back storage change"),
                    Err(error) => {
                        error!(path = ?path, error = ?error, "Failed to roll back storage change: {error}")
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn path_tag_is_md5_of_the_path() {
        assert_eq!(path_tag(""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(path_tag("/a"), path_tag("/a"));
        assert_ne!(path_tag("/a"), path_tag("/b"));
    }

    #[test]
    fn dropped_compensations_undo_in_reverse() {
        let root = tempfile::tempdir().unwrap();
        let storage = StorageAdapters::Volume(volume::VolumeStorage::new(root.path().into()));
        let dir = storage.dataset_dir("alice", "user.alice.ds");
        storage.create_dir(&dir).unwrap();
        fs::write(dir.join("a.txt"), "a").unwrap();

        {
            let mut compensations = Compensations::new(&storage);
            compensations.push(Compensation::RemoveDir(dir.clone()));
            compensations.push(Compensation::RemoveFiles(vec![dir.join("a.txt")]));
        }

        assert!(!dir.exists());
        assert!(root.path().join("alice").exists());
    }

    #[test]
    fn committed_compensations_keep_changes() {
        let root = tempfile::tempdir().unwrap();
        let storage = StorageAdapters::Volume(volume::VolumeStorage::new(root.path().into()));
        let dir = storage.dataset_dir("alice", "user.alice.ds");
        storage.create_dir(&dir).unwrap();

        let mut compensations = Compensations::new(&storage);
        compensations.push(Compensation::RemoveDir(dir.clone()));
        compensations.commit();

        assert!(dir.is_dir());
    }

    #[test]
    fn missing_path_is_not_an_error_for_best_effort_removal() {
        let root = tempfile::tempdir().unwrap();
        let storage = StorageAdapters::Volume(volume::VolumeStorage::new(root.path().into()));

        assert!(storage.remove(&root.path().join("missing")).is_err());
        assert!(storage
            .remove_best_effort(&root.path().join("missing"))
            .is_ok());
    }
}
