use super::*;
use crate::testing::{is_empty_dir, Fixture};
use std::fs;

#[test]
fn upload_copies_and_registers_every_file() {
    let mut fixture = Fixture::new();
    let source = fixture.source("cfg", &["b.json", "a.json", "nested/c.json"]);

    let dataset = fixture
        .maestro
        .upload_dataset("user.alice.cfg", &source)
        .unwrap();

    let root = fixture.volume_path("alice/user.alice.cfg");
    let paths = dataset
        .files
        .iter()
        .map(|file| file.path.clone())
        .collect::<Vec<_>>();
    assert_eq!(
        paths,
        vec![
            root.join("a.json").to_string_lossy().into_owned(),
            root.join("b.json").to_string_lossy().into_owned(),
            root.join("nested/c.json").to_string_lossy().into_owned(),
        ]
    );
    assert!(dataset
        .files
        .iter()
        .all(|file| file.hash == path_tag(&file.path)));
    assert!(!dataset.task_usage);
    assert_eq!(dataset.cluster, "LPS");
    assert_eq!(fs::read_to_string(root.join("nested/c.json")).unwrap(), "nested/c.json");

    let uow = fixture.maestro.store.unit_of_work().unwrap();
    let stored = uow.find_dataset("alice", "user.alice.cfg").unwrap().unwrap();
    assert_eq!(stored.files, dataset.files);
}

#[test]
fn upload_of_a_single_file() {
    let mut fixture = Fixture::new();
    let source = fixture.source("data", &["data.npz"]);

    let dataset = fixture
        .maestro
        .upload_dataset("user.bob.data", &source.join("data.npz"))
        .unwrap();

    assert_eq!(dataset.files.len(), 1);
    assert!(fixture.volume_path("bob/user.bob.data/data.npz").is_file());
}

#[test]
fn upload_rejects_bad_names_without_touching_the_volume() {
    let mut fixture = Fixture::new();
    let source = fixture.source("cfg", &["a.json"]);

    for name in ["alice.cfg", "user.carol.cfg", "cfg"] {
        assert!(
            matches!(
                fixture.maestro.upload_dataset(name, &source),
                Err(MaestroError::PolicyViolation(_))
            ),
            "{name}"
        );
    }

    assert!(is_empty_dir(fixture.volume.path()));
}

#[test]
fn upload_rejects_names_leaving_the_user_directory() {
    let mut fixture = Fixture::new();
    let source = fixture.source("cfg", &["a.json"]);
    // user.alice./../../keep would resolve to <volume>/keep
    let keep = fixture.volume_path("keep");
    fs::create_dir_all(&keep).unwrap();

    for name in ["user.alice./../../keep", "user.alice.cfg/a", "user.alice.a\\keep"] {
        assert!(
            matches!(
                fixture.maestro.upload_dataset(name, &source),
                Err(MaestroError::PolicyViolation(_))
            ),
            "{name}"
        );
    }

    assert!(is_empty_dir(&keep));
    assert!(!fixture.volume_path("alice").exists());
}

#[test]
fn upload_twice_is_a_conflict() {
    let mut fixture = Fixture::new();
    fixture.upload("user.alice.cfg", &["a.json"]);
    let source = fixture.source("other", &["z.json"]);

    assert!(matches!(
        fixture.maestro.upload_dataset("user.alice.cfg", &source),
        Err(MaestroError::Conflict(_))
    ));
    assert!(!fixture.volume_path("alice/user.alice.cfg/z.json").exists());
}

#[test]
fn upload_from_a_missing_source_fails() {
    let mut fixture = Fixture::new();
    let source = fixture.uploads.path().join("missing");

    assert!(matches!(
        fixture.maestro.upload_dataset("user.alice.cfg", &source),
        Err(MaestroError::NotFound(_))
    ));
    assert!(!fixture.volume_path("alice/user.alice.cfg").exists());
}

#[test]
fn failed_registration_removes_the_copied_directory() {
    let mut fixture = Fixture::new();
    let source = fixture.source("cfg", &["a.json"]);
    fixture
        .maestro
        .store
        .connection()
        .execute_batch(
            "create trigger reject_files before insert on files
             begin select raise(abort, 'files are read only'); end;",
        )
        .unwrap();

    assert!(fixture
        .maestro
        .upload_dataset("user.alice.cfg", &source)
        .is_err());
    assert!(!fixture.volume_path("alice/user.alice.cfg").exists());
}

#[test]
fn delete_removes_records_and_directory() {
    let mut fixture = Fixture::new();
    fixture.upload("user.alice.cfg", &["a.json", "b.json"]);

    fixture.maestro.delete_dataset("user.alice.cfg").unwrap();

    assert!(!fixture.volume_path("alice/user.alice.cfg").exists());
    assert!(fixture.maestro.list_datasets("alice").unwrap().is_empty());
    let count: i64 = fixture
        .maestro
        .store
        .connection()
        .query_row("select count(*) from files", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 0);
}

#[test]
fn delete_with_missing_directory_only_warns() {
    let mut fixture = Fixture::new();
    fixture.upload("user.alice.cfg", &["a.json"]);
    fs::remove_dir_all(fixture.volume_path("alice/user.alice.cfg")).unwrap();

    fixture.maestro.delete_dataset("user.alice.cfg").unwrap();

    assert!(matches!(
        fixture.maestro.delete_dataset("user.alice.cfg"),
        Err(MaestroError::NotFound(_))
    ));
}

#[test]
fn list_projects_file_counts() {
    let mut fixture = Fixture::new();
    fixture.upload("user.alice.cfg", &["a.json", "b.json"]);
    fixture.upload("user.alice.data", &["data.npz"]);
    fixture.upload("user.bob.data", &["data.npz"]);

    let listed = fixture.maestro.list_datasets("alice").unwrap();

    assert_eq!(
        listed,
        vec![
            DatasetSummary {
                username: "alice".to_owned(),
                dataset: "user.alice.cfg".to_owned(),
                files: 2,
            },
            DatasetSummary {
                username: "alice".to_owned(),
                dataset: "user.alice.data".to_owned(),
                files: 1,
            },
        ]
    );
    assert!(matches!(
        fixture.maestro.list_datasets("carol"),
        Err(MaestroError::NotFound(_))
    ));
}

#[test]
fn download_copies_into_the_destination() {
    let mut fixture = Fixture::new();
    fixture.upload("user.alice.cfg", &["a.json", "nested/b.json"]);
    let destination = tempfile::tempdir().unwrap();

    let target = fixture
        .maestro
        .download_dataset("user.alice.cfg", destination.path())
        .unwrap();

    assert_eq!(target, destination.path().join("user.alice.cfg"));
    assert_eq!(
        fs::read_to_string(target.join("nested/b.json")).unwrap(),
        "nested/b.json"
    );
    assert!(matches!(
        fixture
            .maestro
            .download_dataset("user.alice.cfg", destination.path()),
        Err(MaestroError::Conflict(_))
    ));
    assert!(matches!(
        fixture
            .maestro
            .download_dataset("user.alice.none", destination.path()),
        Err(MaestroError::NotFound(_))
    ));
}
