use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::Error,
    path::{Path, PathBuf},
    str::FromStr,
};
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error("Config file not found")]
    FileNotFound(#[from] Error),
    #[error("Config file could not be parsed")]
    InvalidYaml(#[from] serde_yaml::Error),
    #[error("Config failed the preflight checks")]
    Preflight,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct MaestroConfig {
    // name of the cluster, stored on every dataset and task
    pub cluster: String,

    #[serde(alias = "db")]
    pub database: DatabaseConfig,

    pub storage: StorageConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    // root of the shared cluster volume as seen from this machine
    pub volume: PathBuf,
    // the same volume as mounted inside the job execution environment
    #[serde(default = "default_mount")]
    pub mount: String,
}

impl MaestroConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigErrors> {
        let mut config: Self = serde_yaml::from_reader(File::open(path)?)?;

        if config.preflight_checks() {
            Err(ConfigErrors::Preflight)
        } else {
            config.cluster = config.cluster.trim().to_owned();

            Ok(config)
        }
    }

    /// check every setting and log all problems, returns true if at least one was found
    pub fn preflight_checks(&self) -> bool {
        // attempt to catch all errors instead of piece-by-piece to make debugging easier for users
        let mut contains_error = false;

        if self.cluster.trim().is_empty() {
            error!("cluster must not be empty");
            contains_error = true;
        }

        if !self.storage.volume.is_dir() {
            error!(
                "storage.volume ({}) is either not a directory or not found",
                self.storage.volume.to_string_lossy()
            );
            contains_error = true;
        }

        if !self.storage.mount.starts_with('/') {
            error!(
                "storage.mount ({}) must be an absolute path",
                self.storage.mount
            );
            contains_error = true;
        }

        if self.storage.mount.len() > 1 && self.storage.mount.ends_with('/') {
            error!(
                "storage.mount ({}) must not end with a '/'",
                self.storage.mount
            );
            contains_error = true;
        }

        contains_error
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from_str("maestro.db").unwrap_or_default()
}

fn default_mount() -> String {
    "/volume".to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let volume = tempfile::tempdir().unwrap();
        let yaml = format!(
            "cluster: LPS\ndb:\n  path: /tmp/maestro.db\nstorage:\n  volume: {}\n  mount: /volume\n",
            volume.path().display()
        );
        let config: MaestroConfig = serde_yaml::from_str(&yaml).unwrap();

        assert_eq!(config.database.path, PathBuf::from("/tmp/maestro.db"));
        assert_eq!(config.storage.mount, "/volume");
        assert!(!config.preflight_checks());
    }

    #[test]
    fn defaults_and_unknown_fields() {
        let config: MaestroConfig =
            serde_yaml::from_str("cluster: LPS\ndatabase: {}\nstorage:\n  volume: /nowhere\n")
                .unwrap();

        assert_eq!(config.database.path, PathBuf::from("maestro.db"));
        assert_eq!(config.storage.mount, "/volume");
        // the volume does not exist
        assert!(config.preflight_checks());

        assert!(serde_yaml::from_str::<MaestroConfig>(
            "cluster: LPS\ndatabase: {}\nstorage:\n  volume: /\nexecutor: local\n"
        )
        .is_err());
    }

    #[test]
    fn relative_mount_is_rejected() {
        let config = MaestroConfig {
            cluster: "LPS".to_owned(),
            database: DatabaseConfig {
                path: default_database_path(),
            },
            storage: StorageConfig {
                volume: std::env::temp_dir(),
                mount: "volume/".to_owned(),
            },
        };

        assert!(config.preflight_checks());
    }
}
