use crate::error::MaestroError;
use ignore::{DirEntry, WalkBuilder};
use itertools::Itertools;
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use tracing::{debug, trace, warn};

/// Blob store backed by a mounted shared volume
#[derive(Debug, Clone)]
pub struct VolumeStorage {
    root: PathBuf,
}

/// walk everything below `path`, hidden and ignored files included
fn walk(path: &Path) -> impl Iterator<Item = Result<DirEntry, MaestroError>> + '_ {
    WalkBuilder::new(path)
        .standard_filters(false)
        .follow_links(true)
        .sort_by_file_name(|left, right| left.cmp(right))
        .build()
        .map(move |entry| {
            entry.map_err(|error| {
                let message = error.to_string();
                let source = error
                    .into_io_error()
                    .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, message));

                MaestroError::storage(path, source)
            })
        })
}

fn create_missing_dir(path: &Path, created: &mut Vec<PathBuf>) -> Result<(), MaestroError> {
    if !path.exists() {
        fs::create_dir_all(path).map_err(|error| MaestroError::storage(path, error))?;
        created.push(path.to_path_buf());
    }

    Ok(())
}

/// copy the contents of `source` below `destination`, recording every new path in `created`
fn copy_tree(
    source: &Path,
    destination: &Path,
    created: &mut Vec<PathBuf>,
) -> Result<Vec<PathBuf>, MaestroError> {
    let mut copied = Vec::new();

    for entry in walk(source) {
        let entry = entry?;
        let relative = match entry.path().strip_prefix(source) {
            Ok(relative) if !relative.as_os_str().is_empty() => relative,
            // root entry
            _ => continue,
        };
        let target = destination.join(relative);

        if entry.file_type().map_or(false, |kind| kind.is_dir()) {
            create_missing_dir(&target, created)?;
        } else {
            if let Some(parent) = target.parent() {
                create_missing_dir(parent, created)?;
            }
            fs::copy(entry.path(), &target).map_err(|error| MaestroError::storage(&target, error))?;
            created.push(target.clone());
            trace!(from = ?entry.path(), to = ?target, "Copied file");

            copied.push(target);
        }
    }

    Ok(copied)
}

impl VolumeStorage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    pub fn create_dir(&self, path: &Path) -> Result<(), MaestroError> {
        fs::create_dir_all(path).map_err(|error| MaestroError::storage(path, error))?;
        debug!(path = ?path, "Created directory");

        Ok(())
    }

    pub fn copy(&self, source: &Path, destination: &Path) -> Result<Vec<PathBuf>, MaestroError> {
        let metadata = fs::metadata(source).map_err(|error| MaestroError::storage(source, error))?;

        if metadata.is_file() {
            let target = destination.join(source.file_name().unwrap_or(source.as_os_str()));
            fs::copy(source, &target).map_err(|error| MaestroError::storage(&target, error))?;
            trace!(from = ?source, to = ?target, "Copied file");

            return Ok(vec![target]);
        }

        // files and directories made by this copy, in creation order
        let mut created = Vec::new();

        match copy_tree(source, destination, &mut created) {
            Ok(copied) => {
                debug!(from = ?source, to = ?destination, files = copied.len(), "Copied directory");

                Ok(copied)
            }
            Err(error) => {
                for path in created.iter().rev() {
                    let undone = if path.is_dir() {
                        fs::remove_dir_all(path)
                    } else {
                        fs::remove_file(path)
                    };

                    if let Err(undo_error) = undone {
                        warn!(path = ?path, error = ?undo_error, "Failed to remove partial copy: {undo_error}");
                    }
                }

                Err(error)
            }
        }
    }

    pub fn remove(&self, path: &Path) -> Result<(), MaestroError> {
        let metadata =
            fs::symlink_metadata(path).map_err(|error| MaestroError::storage(path, error))?;

        let removed = if metadata.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };
        removed.map_err(|error| MaestroError::storage(path, error))?;

        debug!(path = ?path, "Removed from storage");

        Ok(())
    }

    pub fn list_files(&self, path: &Path) -> Result<Vec<PathBuf>, MaestroError> {
        walk(path)
            .filter_map_ok(|entry| {
                entry
                    .file_type()
                    .filter(|kind| !kind.is_dir())
                    .map(|_| entry.into_path())
            })
            .collect::<Result<Vec<_>, _>>()
            .map(|paths| paths.into_iter().sorted().collect_vec())
    }
}
