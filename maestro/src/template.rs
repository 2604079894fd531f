use crate::config::StorageConfig;
use itertools::Itertools;
use std::collections::BTreeMap;
use tracing::debug;

pub const DATA_PLACEHOLDER: &str = "%DATA";
pub const CONFIG_PLACEHOLDER: &str = "%IN";
pub const OUTPUT_PLACEHOLDER: &str = "%OUT";

/// Translates paths on the storage volume into the paths the execution environment sees
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMapper {
    volume: String,
    mount: String,
}

fn trim_root(root: &str) -> &str {
    match root.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    }
}

impl PathMapper {
    pub fn new(volume: impl AsRef<str>, mount: impl AsRef<str>) -> Self {
        Self {
            volume: trim_root(volume.as_ref()).to_owned(),
            mount: trim_root(mount.as_ref()).to_owned(),
        }
    }

    pub fn load(config: &StorageConfig) -> Self {
        Self::new(config.volume.to_string_lossy(), &config.mount)
    }

    /// swap the volume root prefix for the mount root, once
    pub fn resolve(&self, storage_path: &str) -> String {
        match storage_path.strip_prefix(self.volume.as_str()) {
            Some(rest) if rest.is_empty() || rest.starts_with('/') || self.volume == "/" => {
                let rest = rest.trim_start_matches('/');

                if rest.is_empty() {
                    self.mount.clone()
                } else if self.mount == "/" {
                    format!("/{rest}")
                } else {
                    format!("{}/{rest}", self.mount)
                }
            }
            _ => {
                debug!(path = storage_path, "Path is not on the storage volume, kept as is");

                storage_path.to_owned()
            }
        }
    }
}

/// Literal placeholder substitution: `%DATA`, `%IN`, `%OUT`, then every secondary key,
/// longest key first so `%REF` never eats into `%REF2`.
///
/// Values are not escaped, so the result must not be rendered a second time.
pub fn render(
    template: &str,
    data_path: &str,
    config_path: &str,
    output_path: &str,
    secondary_paths: &BTreeMap<String, String>,
) -> String {
    let command = template
        .replace(DATA_PLACEHOLDER, data_path)
        .replace(CONFIG_PLACEHOLDER, config_path)
        .replace(OUTPUT_PLACEHOLDER, output_path);

    secondary_paths
        .iter()
        .sorted_by(|(left, _), (right, _)| right.len().cmp(&left.len()))
        .fold(command, |command, (key, path)| command.replace(key.as_str(), path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_the_three_placeholders() {
        assert_eq!(
            render("run %IN %DATA -o %OUT", "/d", "/c", "/o", &BTreeMap::new()),
            "run /c /d -o /o"
        );
    }

    #[test]
    fn replaces_every_occurrence_and_secondary_keys() {
        let secondary = BTreeMap::from([("%REF".to_owned(), "/volume/alice/ref".to_owned())]);

        assert_eq!(
            render("%IN %IN --ref %REF %OUT %DATA", "/d", "/c", "/o", &secondary),
            "/c /c --ref /volume/alice/ref /o /d"
        );
    }

    #[test]
    fn longer_secondary_keys_win_over_their_prefixes() {
        let secondary = BTreeMap::from([
            ("%REF".to_owned(), "/r1".to_owned()),
            ("%REF2".to_owned(), "/r2".to_owned()),
        ]);

        assert_eq!(
            render("%DATA %IN %OUT %REF %REF2", "/d", "/c", "/o", &secondary),
            "/d /c /o /r1 /r2"
        );
    }

    #[test]
    fn values_are_not_escaped() {
        // a value that contains a later placeholder is substituted again
        assert_eq!(
            render("%DATA %OUT", "/data/%OUT", "/c", "/o", &BTreeMap::new()),
            "/data//o /o"
        );
    }

    #[test]
    fn resolves_volume_prefix_once() {
        let mapper = PathMapper::new("/mnt/cluster_volume/", "/volume");

        assert_eq!(
            mapper.resolve("/mnt/cluster_volume/alice/user.alice.cfg/a.conf"),
            "/volume/alice/user.alice.cfg/a.conf"
        );
        assert_eq!(
            mapper.resolve("/mnt/cluster_volume/alice/mnt/cluster_volume"),
            "/volume/alice/mnt/cluster_volume"
        );
        assert_eq!(mapper.resolve("/mnt/cluster_volume"), "/volume");
        assert_eq!(
            mapper.resolve("/mnt/cluster_volume_old/a"),
            "/mnt/cluster_volume_old/a"
        );
        assert_eq!(mapper.resolve("/elsewhere/a"), "/elsewhere/a");
    }
}
