use crate::{
    database::{Dataset, DatasetSummary, FileRecord},
    error::MaestroError,
    storage::{path_tag, Compensation, Compensations},
    validation::{
        validate_dataset_absent, validate_dataset_exists, validate_dataset_name,
        validate_user_exists,
    },
    Maestro,
};
use std::{io, path::Path, path::PathBuf};
use tracing::{info, warn};

#[cfg(test)]
mod dataset_test;

impl Maestro {
    /// Copy `source` (a file or the contents of a directory) to `<volume>/<username>/<name>`
    /// and register every file found there under the new dataset.
    pub fn upload_dataset(&mut self, name: &str, source: &Path) -> Result<Dataset, MaestroError> {
        let uow = self.store.unit_of_work()?;
        let username = validate_dataset_name(&uow, name)?;
        validate_dataset_absent(&uow, &username, name)?;

        if !self.storage.exists(source) {
            return Err(MaestroError::NotFound(format!(
                "upload source {} for dataset '{name}'",
                source.display()
            )));
        }

        let destination = self.storage.dataset_dir(&username, name);
        let mut compensations = Compensations::new(&self.storage);

        if self.storage.exists(&destination) {
            warn!(path = ?destination, "The dataset directory already exists in the storage");
            let copied = self.storage.copy(source, &destination)?;
            compensations.push(Compensation::RemoveFiles(copied));
        } else {
            self.storage.create_dir(&destination)?;
            compensations.push(Compensation::RemoveDir(destination.clone()));
            self.storage.copy(source, &destination)?;
        }

        let files = self
            .storage
            .list_files(&destination)?
            .into_iter()
            .map(|path| {
                let path = path.to_string_lossy().into_owned();
                info!(path = %path, dataset = %name, "Registering file");

                FileRecord {
                    hash: path_tag(&path),
                    path,
                }
            })
            .collect::<Vec<_>>();

        let mut dataset = Dataset {
            id: 0,
            username,
            name: name.to_owned(),
            cluster: self.cluster.clone(),
            task_usage: false,
            files,
        };
        dataset.id = uow.insert_dataset(&dataset)?;
        uow.commit()?;
        compensations.commit();

        info!(dataset = %name, files = dataset.files.len(), "Uploaded dataset");

        Ok(dataset)
    }

    /// Copy the dataset directory to `<destination>/<name>`, returns the new directory
    pub fn download_dataset(
        &mut self,
        name: &str,
        destination: &Path,
    ) -> Result<PathBuf, MaestroError> {
        let uow = self.store.unit_of_work()?;
        let username = validate_dataset_name(&uow, name)?;
        validate_dataset_exists(&uow, &username, name)?;
        uow.rollback()?;

        let source = self.storage.dataset_dir(&username, name);
        if !self.storage.exists(&source) {
            return Err(MaestroError::storage(
                source,
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("directory of dataset '{name}' is missing"),
                ),
            ));
        }

        let target = destination.join(name);
        if self.storage.exists(&target) {
            return Err(MaestroError::Conflict(format!(
                "{} already exists, refusing to download '{name}' over it",
                target.display()
            )));
        }

        let mut compensations = Compensations::new(&self.storage);
        self.storage.create_dir(&target)?;
        compensations.push(Compensation::RemoveDir(target.clone()));
        let copied = self.storage.copy(&source, &target)?;
        compensations.commit();

        info!(dataset = %name, files = copied.len(), target = ?target, "Downloaded dataset");

        Ok(target)
    }

    /// Remove a user dataset, the records go first and the directory after the commit
    pub fn delete_dataset(&mut self, name: &str) -> Result<(), MaestroError> {
        let uow = self.store.unit_of_work()?;
        let username = validate_dataset_name(&uow, name)?;
        let dataset = validate_dataset_exists(&uow, &username, name)?;

        if dataset.task_usage {
            return Err(MaestroError::State(format!(
                "dataset '{name}' is the output of a task and can only be removed with `task delete`"
            )));
        }

        uow.delete_dataset(dataset.id)?;
        uow.commit()?;

        self.storage
            .remove_best_effort(&self.storage.dataset_dir(&username, name))?;

        info!(dataset = %name, files = dataset.files.len(), "Deleted dataset");

        Ok(())
    }

    pub fn list_datasets(&mut self, username: &str) -> Result<Vec<DatasetSummary>, MaestroError> {
        let uow = self.store.unit_of_work()?;
        validate_user_exists(&uow, username)?;

        uow.dataset_summaries(username)
    }
}
