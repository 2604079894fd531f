use crate::{database::User, error::MaestroError, Maestro};
use tracing::info;

impl Maestro {
    /// Register a user, usernames may not contain the name separator `.`
    pub fn create_user(&mut self, username: &str) -> Result<User, MaestroError> {
        if username.is_empty() || username.contains('.') || username.contains('/') {
            return Err(MaestroError::PolicyViolation(format!(
                "username '{username}' must be non-empty and contain neither '.' nor '/'"
            )));
        }

        let uow = self.store.unit_of_work()?;
        if uow.user_exists(username)? {
            return Err(MaestroError::Conflict(format!(
                "user '{username}' already exists"
            )));
        }
        uow.insert_user(username)?;
        uow.commit()?;

        info!(user = %username, "Created user");

        Ok(User {
            username: username.to_owned(),
        })
    }

    pub fn list_users(&mut self) -> Result<Vec<User>, MaestroError> {
        self.store.unit_of_work()?.users()
    }
}
