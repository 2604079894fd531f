//! Fixtures shared by the unit tests: an in-memory store on top of a temporary volume.

use crate::{
    database::Store,
    status::JobStatus,
    storage::{volume::VolumeStorage, StorageAdapters},
    template::PathMapper,
    Maestro,
};
use std::{fs, path::Path};
use tempfile::TempDir;

pub struct Fixture {
    pub maestro: Maestro,
    pub volume: TempDir,
    pub uploads: TempDir,
}

impl Fixture {
    /// users `alice` and `bob`, nothing uploaded yet
    pub fn new() -> Self {
        let volume = tempfile::tempdir().unwrap();
        let uploads = tempfile::tempdir().unwrap();
        let mut maestro = Maestro {
            store: Store::in_memory().unwrap(),
            storage: StorageAdapters::Volume(VolumeStorage::new(volume.path().into())),
            mapper: PathMapper::new(volume.path().to_string_lossy(), "/volume"),
            cluster: "LPS".to_owned(),
        };
        maestro.create_user("alice").unwrap();
        maestro.create_user("bob").unwrap();

        Self {
            maestro,
            volume,
            uploads,
        }
    }

    /// write `files` into a fresh upload directory and return it
    pub fn source(&self, name: &str, files: &[&str]) -> std::path::PathBuf {
        let dir = self.uploads.path().join(name);
        for file in files {
            let path = dir.join(file);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, file.as_bytes()).unwrap();
        }

        dir
    }

    pub fn upload(&mut self, dataset: &str, files: &[&str]) {
        let source = self.source(dataset, files);
        self.maestro.upload_dataset(dataset, &source).unwrap();
    }

    /// `user.alice.data`, `user.alice.cfg` (3 files), `user.alice.grid` (8 files) and
    /// `user.alice.ref`
    pub fn with_alice_datasets() -> Self {
        let mut fixture = Self::new();
        fixture.upload("user.alice.data", &["data.npz"]);
        fixture.upload("user.alice.cfg", &["c.json", "a.json", "b.json"]);
        fixture.upload(
            "user.alice.grid",
            &["0.json", "1.json", "2.json", "3.json", "4.json", "5.json", "6.json", "7.json"],
        );
        fixture.upload("user.alice.ref", &["ref.npz"]);

        fixture
    }

    pub fn volume_path(&self, relative: &str) -> std::path::PathBuf {
        self.volume.path().join(relative)
    }

    pub fn job_statuses(&mut self, task: &str) -> Vec<JobStatus> {
        let uow = self.maestro.store.unit_of_work().unwrap();
        let task = uow.find_task(task).unwrap().unwrap();

        uow.jobs(task.id)
            .unwrap()
            .into_iter()
            .map(|job| job.status)
            .collect()
    }

    /// overwrite job statuses directly, the way an executor would
    pub fn set_job_statuses(&mut self, task: &str, statuses: &[JobStatus]) {
        let uow = self.maestro.store.unit_of_work().unwrap();
        let task = uow.find_task(task).unwrap().unwrap();
        let jobs = uow.jobs(task.id).unwrap();
        assert_eq!(jobs.len(), statuses.len());

        for (job, status) in jobs.iter().zip(statuses) {
            uow.update_job_status(job.id, *status).unwrap();
        }
        uow.commit().unwrap();
    }
}

pub fn is_empty_dir(path: &Path) -> bool {
    fs::read_dir(path)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(true)
}
