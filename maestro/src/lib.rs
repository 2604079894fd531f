pub mod board;
pub mod config;
pub mod database;
pub mod dataset;
pub mod error;
pub mod fanout;
pub mod status;
pub mod storage;
pub mod task;
pub mod template;
pub mod user;
pub mod validation;

#[cfg(test)]
mod testing;

use config::MaestroConfig;
use database::Store;
use error::MaestroError;
use storage::StorageAdapters;
use template::PathMapper;

/// Entry point for every operation; each call opens its own unit of work on `store`.
///
/// Storage changes are not transactional. Directories and files written before a failed
/// commit are removed again on a best effort basis, a crash in between leaves them behind.
#[derive(Debug)]
pub struct Maestro {
    pub store: Store,
    pub storage: StorageAdapters,
    pub mapper: PathMapper,
    pub cluster: String,
}

impl Maestro {
    pub fn load(config: &MaestroConfig) -> Result<Self, MaestroError> {
        Ok(Self {
            store: Store::load(&config.database)?,
            storage: StorageAdapters::load(&config.storage),
            mapper: PathMapper::load(&config.storage),
            cluster: config.cluster.clone(),
        })
    }

    pub fn close(self) -> Result<(), MaestroError> {
        self.store.close()
    }
}
