//! Precondition checks run before any operation mutates state.
//!
//! Each check fails fast with the error a caller should see; none of them writes.

use crate::{
    database::{Dataset, Task, UnitOfWork},
    error::MaestroError,
    template::{CONFIG_PLACEHOLDER, DATA_PLACEHOLDER, OUTPUT_PLACEHOLDER},
};

const NAME_PREFIX: &str = "user";

/// `user.<username>[.<suffix>...]`, the username has to be registered
fn validate_name(uow: &UnitOfWork, kind: &str, name: &str) -> Result<String, MaestroError> {
    // names become a single directory below <volume>/<username>
    if name.contains(['/', '\\']) || name.contains("..") {
        return Err(MaestroError::PolicyViolation(format!(
            "{kind} name '{name}' must not contain '/', '\\' or '..'"
        )));
    }

    let mut segments = name.split('.');

    match (segments.next(), segments.next()) {
        (Some(NAME_PREFIX), Some(username)) if !username.is_empty() => {
            if uow.user_exists(username)? {
                Ok(username.to_owned())
            } else {
                Err(MaestroError::PolicyViolation(format!(
                    "{kind} name '{name}' refers to the unknown user '{username}'"
                )))
            }
        }
        _ => Err(MaestroError::PolicyViolation(format!(
            "{kind} name '{name}' must start with user.<username>."
        ))),
    }
}

/// returns the username encoded in the task name
pub fn validate_task_name(uow: &UnitOfWork, name: &str) -> Result<String, MaestroError> {
    validate_name(uow, "task", name)
}

/// returns the username encoded in the dataset name
pub fn validate_dataset_name(uow: &UnitOfWork, name: &str) -> Result<String, MaestroError> {
    validate_name(uow, "dataset", name)
}

pub fn validate_user_exists(uow: &UnitOfWork, username: &str) -> Result<(), MaestroError> {
    if uow.user_exists(username)? {
        Ok(())
    } else {
        Err(MaestroError::NotFound(format!("user '{username}'")))
    }
}

pub fn validate_dataset_exists(
    uow: &UnitOfWork,
    username: &str,
    name: &str,
) -> Result<Dataset, MaestroError> {
    uow.find_dataset(username, name)?.ok_or_else(|| {
        MaestroError::NotFound(format!(
            "dataset '{name}' of user '{username}', it should be uploaded first"
        ))
    })
}

pub fn validate_dataset_absent(
    uow: &UnitOfWork,
    username: &str,
    name: &str,
) -> Result<(), MaestroError> {
    match uow.find_dataset(username, name)? {
        Some(_) => Err(MaestroError::Conflict(format!(
            "dataset '{name}' of user '{username}' already exists"
        ))),
        None => Ok(()),
    }
}

/// the template needs `%DATA`, `%IN`, `%OUT` and every secondary key at least once
pub fn validate_command_template<'a, I>(template: &str, secondary_keys: I) -> Result<(), MaestroError>
where
    I: IntoIterator<Item = &'a String>,
{
    for (placeholder, meaning) in [
        (DATA_PLACEHOLDER, "the data file"),
        (CONFIG_PLACEHOLDER, "the config file"),
        (OUTPUT_PLACEHOLDER, "the output directory"),
    ] {
        if !template.contains(placeholder) {
            return Err(MaestroError::Template(format!(
                "'{template}' must include '{placeholder}', it is replaced by {meaning}"
            )));
        }
    }

    for key in secondary_keys {
        if !template.contains(key.as_str()) {
            return Err(MaestroError::Template(format!(
                "'{template}' must include the secondary dataset key '{key}'"
            )));
        }
    }

    Ok(())
}

pub fn validate_task_exists(uow: &UnitOfWork, name: &str) -> Result<Task, MaestroError> {
    uow.find_task(name)?
        .ok_or_else(|| MaestroError::NotFound(format!("task '{name}'")))
}

pub fn validate_task_absent(uow: &UnitOfWork, name: &str) -> Result<(), MaestroError> {
    match uow.find_task(name)? {
        Some(_) => Err(MaestroError::Conflict(format!("task '{name}' already exists"))),
        None => Ok(()),
    }
}

pub fn validate_board_absent(uow: &UnitOfWork, name: &str) -> Result<(), MaestroError> {
    match uow.find_board(name)? {
        Some(_) => Err(MaestroError::Conflict(format!(
            "a monitoring board for task '{name}' already exists"
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Store;

    #[test]
    fn task_names_follow_the_user_policy() {
        let mut store = Store::in_memory().unwrap();
        let uow = store.unit_of_work().unwrap();
        uow.insert_user("alice").unwrap();

        assert_eq!(validate_task_name(&uow, "user.alice.t1").unwrap(), "alice");
        assert_eq!(validate_task_name(&uow, "user.alice").unwrap(), "alice");

        for name in [
            "alice.t1",
            "user",
            "user..t1",
            "users.alice.t1",
            "user.bob.t1",
            "",
            "user.alice./../../home/bob",
            "user.alice.t1/nested",
            "user.alice.a\\b",
        ] {
            assert!(
                matches!(
                    validate_task_name(&uow, name),
                    Err(MaestroError::PolicyViolation(_))
                ),
                "{name}"
            );
        }
    }

    #[test]
    fn template_needs_all_placeholders() {
        let keys = ["%REF".to_owned()];

        assert!(validate_command_template("x %DATA %IN %OUT %REF", keys.iter()).is_ok());
        assert!(matches!(
            validate_command_template("x %DATA %IN %OUT", keys.iter()),
            Err(MaestroError::Template(_))
        ));

        for template in ["x %IN %OUT", "x %DATA %OUT", "x %DATA %IN"] {
            assert!(matches!(
                validate_command_template(template, []),
                Err(MaestroError::Template(_))
            ));
        }
    }

    #[test]
    fn dataset_presence_checks() {
        let mut store = Store::in_memory().unwrap();
        let uow = store.unit_of_work().unwrap();
        uow.insert_user("alice").unwrap();

        assert!(matches!(
            validate_dataset_exists(&uow, "alice", "user.alice.data"),
            Err(MaestroError::NotFound(_))
        ));
        assert!(validate_dataset_absent(&uow, "alice", "user.alice.data").is_ok());

        uow.insert_dataset(&Dataset {
            id: 0,
            username: "alice".to_owned(),
            name: "user.alice.data".to_owned(),
            cluster: "LPS".to_owned(),
            task_usage: false,
            files: Vec::new(),
        })
        .unwrap();

        assert!(validate_dataset_exists(&uow, "alice", "user.alice.data").is_ok());
        assert!(matches!(
            validate_dataset_absent(&uow, "alice", "user.alice.data"),
            Err(MaestroError::Conflict(_))
        ));
    }
}
