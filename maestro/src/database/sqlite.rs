use super::{
    Board, Dataset, DatasetSummary, FileRecord, Job, Task, User, ID, SQL_SCHEMA,
    SQL_SCHEMA_NUMBER,
};
use crate::{
    config::DatabaseConfig,
    error::MaestroError,
    status::{JobStatus, TaskStatus},
};
use rusqlite::{
    ffi, params,
    types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef},
    Connection, ErrorCode, OptionalExtension, Row, Transaction, TransactionBehavior,
};
use std::collections::BTreeMap;
use tracing::{debug, error, info};

impl From<rusqlite::Error> for MaestroError {
    fn from(error: rusqlite::Error) -> Self {
        match error {
            // only duplicate names are conflicts, foreign key and check failures are not
            rusqlite::Error::SqliteFailure(inner, message)
                if inner.code == ErrorCode::ConstraintViolation
                    && matches!(
                        inner.extended_code,
                        ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                    ) =>
            {
                MaestroError::Conflict(message.unwrap_or_else(|| inner.to_string()))
            }
            error => MaestroError::Persistence(error),
        }
    }
}

impl ToSql for TaskStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for TaskStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|error| FromSqlError::Other(Box::new(error)))
    }
}

impl ToSql for JobStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for JobStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|error| FromSqlError::Other(Box::new(error)))
    }
}

/// Owner of the SQLite connection, hands out one `UnitOfWork` per operation
#[derive(Debug)]
pub struct Store {
    connection: Connection,
}

/// One transaction scope; everything written through it is committed together or not at all
#[derive(Debug)]
pub struct UnitOfWork<'conn> {
    tx: Transaction<'conn>,
}

impl Store {
    pub fn load(config: &DatabaseConfig) -> Result<Self, MaestroError> {
        let mut store = Self {
            connection: Connection::open(&config.path)?,
        };
        store.init()?;

        info!(path = ?config.path, "Opened SQLite database");

        Ok(store)
    }

    pub fn in_memory() -> Result<Self, MaestroError> {
        let mut store = Self {
            connection: Connection::open_in_memory()?,
        };
        store.init()?;

        Ok(store)
    }

    fn init(&mut self) -> Result<(), MaestroError> {
        self.connection.pragma_update(None, "foreign_keys", true)?;

        for (counter, table) in SQL_SCHEMA.iter().enumerate() {
            match self.connection.execute(table, []) {
                Ok(_) => debug!(
                    "Applied SQL schema ({}/{SQL_SCHEMA_NUMBER})",
                    counter + 1
                ),
                Err(error) => {
                    error!(error = ?error, table = table, "Failed to apply SQL schema ({}/{SQL_SCHEMA_NUMBER}): {error}", counter + 1);

                    return Err(MaestroError::Persistence(error));
                }
            };
        }

        Ok(())
    }

    /// start a write transaction, the database lock is taken right away so a concurrent
    /// writer fails early instead of at commit time
    pub fn unit_of_work(&mut self) -> Result<UnitOfWork<'_>, MaestroError> {
        let mut tx = self
            .connection
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.set_drop_behavior(rusqlite::DropBehavior::Rollback);

        Ok(UnitOfWork { tx })
    }

    #[cfg(test)]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn close(mut self) -> Result<(), MaestroError> {
        let mut counter = 0;
        while let Err((connection, error)) = self.connection.close() {
            counter += 1;
            self.connection = connection;
            error!(error = ?error, "Failed to close SQLite connection: {error}, trying again {counter}/3");

            if counter == 3 {
                return Err(MaestroError::Persistence(error));
            }
        }

        debug!("Closed SQLite connection");

        Ok(())
    }
}

fn read_task_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    let secondary: String = row.get(6)?;

    Ok(Task {
        id: row.get(0)?,
        name: row.get(1)?,
        username: row.get(2)?,
        config_dataset: row.get(3)?,
        data_dataset: row.get(4)?,
        output_dataset: row.get(5)?,
        secondary_datasets: serde_yaml::from_str::<BTreeMap<String, String>>(&secondary)
            .map_err(|error| {
                rusqlite::Error::FromSqlConversionFailure(
                    6,
                    rusqlite::types::Type::Text,
                    Box::new(error),
                )
            })?,
        command_template: row.get(7)?,
        container_image: row.get(8)?,
        cluster: row.get(9)?,
        et_bin: row.get(10)?,
        eta_bin: row.get(11)?,
        is_gpu: row.get(12)?,
        status: row.get(13)?,
    })
}

fn read_job_row(row: &Row<'_>) -> rusqlite::Result<Job> {
    Ok(Job {
        id: row.get(0)?,
        task: row.get(1)?,
        index: row.get(2)?,
        config_path: row.get(3)?,
        command: row.get(4)?,
        is_gpu: row.get(5)?,
        priority: row.get(6)?,
        status: row.get(7)?,
    })
}

fn read_board_row(row: &Row<'_>) -> rusqlite::Result<Board> {
    Ok(Board {
        id: row.get(0)?,
        username: row.get(1)?,
        task: row.get(2)?,
        task_name: row.get(3)?,
        jobs: row.get(4)?,
        registered: row.get(5)?,
        assigned: row.get(6)?,
        testing: row.get(7)?,
        running: row.get(8)?,
        failed: row.get(9)?,
        done: row.get(10)?,
        killed: row.get(11)?,
        status: row.get(12)?,
    })
}

const TASK_COLUMNS: &str = "id, name, username, config_dataset, data_dataset, output_dataset,
    secondary_datasets, command_template, container_image, cluster, et_bin, eta_bin, is_gpu,
    status";
const JOB_COLUMNS: &str = "id, task, idx, config_path, command, is_gpu, priority, status";
const BOARD_COLUMNS: &str = "id, username, task, task_name, jobs, registered, assigned, testing,
    running, failed, done, killed, status";

impl<'conn> UnitOfWork<'conn> {
    pub fn commit(self) -> Result<(), MaestroError> {
        self.tx.commit()?;

        Ok(())
    }

    pub fn rollback(self) -> Result<(), MaestroError> {
        self.tx.rollback()?;

        Ok(())
    }

    pub fn user_exists(&self, username: &str) -> Result<bool, MaestroError> {
        Ok(self
            .tx
            .prepare_cached("select 1 from users where username = ?")?
            .exists(params![username])?)
    }

    pub fn insert_user(&self, username: &str) -> Result<(), MaestroError> {
        self.tx
            .prepare_cached("insert into users (username) values (?)")?
            .execute(params![username])?;

        Ok(())
    }

    pub fn users(&self) -> Result<Vec<User>, MaestroError> {
        self.tx
            .prepare_cached("select username from users order by username")?
            .query_map([], |row| Ok(User { username: row.get(0)? }))?
            .try_fold(Vec::new(), |mut init, result| {
                init.push(result?);

                Ok::<Vec<User>, MaestroError>(init)
            })
    }

    pub fn find_dataset(
        &self,
        username: &str,
        name: &str,
    ) -> Result<Option<Dataset>, MaestroError> {
        let found = self
            .tx
            .prepare_cached(
                "select id, cluster, task_usage from datasets where username = ? and name = ?",
            )?
            .query_row(params![username, name], |row| {
                Ok((
                    row.get::<_, ID>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, bool>(2)?,
                ))
            })
            .optional()?;

        match found {
            Some((id, cluster, task_usage)) => Ok(Some(Dataset {
                id,
                username: username.to_owned(),
                name: name.to_owned(),
                cluster,
                task_usage,
                files: self.files(id)?,
            })),
            None => Ok(None),
        }
    }

    /// files of a dataset in lexicographic path order
    pub fn files(&self, dataset: ID) -> Result<Vec<FileRecord>, MaestroError> {
        self.tx
            .prepare_cached("select path, hash from files where dataset = ? order by path, id")?
            .query_map(params![dataset], |row| {
                Ok(FileRecord {
                    path: row.get(0)?,
                    hash: row.get(1)?,
                })
            })?
            .try_fold(Vec::new(), |mut init, result| {
                init.push(result?);

                Ok::<Vec<FileRecord>, MaestroError>(init)
            })
    }

    /// insert a dataset together with its files, returns the new id
    pub fn insert_dataset(&self, dataset: &Dataset) -> Result<ID, MaestroError> {
        let id: ID = self
            .tx
            .prepare_cached(
                "insert into datasets (username, name, cluster, task_usage)
                 values (?, ?, ?, ?) returning id",
            )?
            .query_row(
                params![
                    dataset.username,
                    dataset.name,
                    dataset.cluster,
                    dataset.task_usage
                ],
                |row| row.get(0),
            )?;

        let mut statement = self
            .tx
            .prepare_cached("insert into files (dataset, path, hash) values (?, ?, ?)")?;
        for file in dataset.files.iter() {
            statement.execute(params![id, file.path, file.hash])?;
        }

        debug!(id = id, dataset = %dataset.name, files = dataset.files.len(), "Inserted dataset");

        Ok(id)
    }

    pub fn delete_dataset(&self, id: ID) -> Result<(), MaestroError> {
        let files = self
            .tx
            .prepare_cached("delete from files where dataset = ?")?
            .execute(params![id])?;
        self.tx
            .prepare_cached("delete from datasets where id = ?")?
            .execute(params![id])?;

        debug!(id = id, files = files, "Deleted dataset");

        Ok(())
    }

    pub fn dataset_summaries(&self, username: &str) -> Result<Vec<DatasetSummary>, MaestroError> {
        self.tx
            .prepare_cached(
                "select d.name, count(f.id) from datasets d
                 left join files f on f.dataset = d.id
                 where d.username = ?
                 group by d.id order by d.name",
            )?
            .query_map(params![username], |row| {
                Ok(DatasetSummary {
                    username: username.to_owned(),
                    dataset: row.get(0)?,
                    files: row.get::<_, i64>(1)? as usize,
                })
            })?
            .try_fold(Vec::new(), |mut init, result| {
                init.push(result?);

                Ok::<Vec<DatasetSummary>, MaestroError>(init)
            })
    }

    pub fn find_task(&self, name: &str) -> Result<Option<Task>, MaestroError> {
        Ok(self
            .tx
            .prepare_cached(&format!("select {TASK_COLUMNS} from tasks where name = ?"))?
            .query_row(params![name], read_task_row)
            .optional()?)
    }

    pub fn tasks(&self, username: &str) -> Result<Vec<Task>, MaestroError> {
        self.tx
            .prepare_cached(&format!(
                "select {TASK_COLUMNS} from tasks where username = ? order by name"
            ))?
            .query_map(params![username], read_task_row)?
            .try_fold(Vec::new(), |mut init, result| {
                init.push(result?);

                Ok::<Vec<Task>, MaestroError>(init)
            })
    }

    pub fn insert_task(&self, task: &Task) -> Result<ID, MaestroError> {
        let secondary = serde_yaml::to_string(&task.secondary_datasets).map_err(|error| {
            MaestroError::Persistence(rusqlite::Error::ToSqlConversionFailure(Box::new(error)))
        })?;

        let id = self
            .tx
            .prepare_cached(
                "insert into tasks
                 (name, username, config_dataset, data_dataset, output_dataset,
                  secondary_datasets, command_template, container_image, cluster,
                  et_bin, eta_bin, is_gpu, status)
                 values (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) returning id",
            )?
            .query_row(
                params![
                    task.name,
                    task.username,
                    task.config_dataset,
                    task.data_dataset,
                    task.output_dataset,
                    secondary,
                    task.command_template,
                    task.container_image,
                    task.cluster,
                    task.et_bin,
                    task.eta_bin,
                    task.is_gpu,
                    task.status
                ],
                |row| row.get(0),
            )?;

        debug!(id = id, task = %task.name, "Inserted task");

        Ok(id)
    }

    pub fn update_task_status(&self, id: ID, status: TaskStatus) -> Result<(), MaestroError> {
        self.tx
            .prepare_cached("update tasks set status = ? where id = ?")?
            .execute(params![status, id])?;

        Ok(())
    }

    pub fn delete_task(&self, id: ID) -> Result<(), MaestroError> {
        self.tx
            .prepare_cached("delete from tasks where id = ?")?
            .execute(params![id])?;

        Ok(())
    }

    /// jobs of a task ordered by their index
    pub fn jobs(&self, task: ID) -> Result<Vec<Job>, MaestroError> {
        self.tx
            .prepare_cached(&format!(
                "select {JOB_COLUMNS} from jobs where task = ? order by idx"
            ))?
            .query_map(params![task], read_job_row)?
            .try_fold(Vec::new(), |mut init, result| {
                init.push(result?);

                Ok::<Vec<Job>, MaestroError>(init)
            })
    }

    pub fn insert_job(&self, job: &Job) -> Result<ID, MaestroError> {
        Ok(self
            .tx
            .prepare_cached(
                "insert into jobs
                 (task, idx, config_path, command, is_gpu, priority, status)
                 values (?, ?, ?, ?, ?, ?, ?) returning id",
            )?
            .query_row(
                params![
                    job.task,
                    job.index,
                    job.config_path,
                    job.command,
                    job.is_gpu,
                    job.priority,
                    job.status
                ],
                |row| row.get(0),
            )?)
    }

    pub fn update_job_status(&self, id: ID, status: JobStatus) -> Result<(), MaestroError> {
        self.tx
            .prepare_cached("update jobs set status = ? where id = ?")?
            .execute(params![status, id])?;

        Ok(())
    }

    pub fn delete_jobs(&self, task: ID) -> Result<usize, MaestroError> {
        Ok(self
            .tx
            .prepare_cached("delete from jobs where task = ?")?
            .execute(params![task])?)
    }

    pub fn find_board(&self, task_name: &str) -> Result<Option<Board>, MaestroError> {
        Ok(self
            .tx
            .prepare_cached(&format!(
                "select {BOARD_COLUMNS} from boards where task_name = ?"
            ))?
            .query_row(params![task_name], read_board_row)
            .optional()?)
    }

    pub fn boards(&self, username: &str) -> Result<Vec<Board>, MaestroError> {
        self.tx
            .prepare_cached(&format!(
                "select {BOARD_COLUMNS} from boards where username = ? order by task_name"
            ))?
            .query_map(params![username], read_board_row)?
            .try_fold(Vec::new(), |mut init, result| {
                init.push(result?);

                Ok::<Vec<Board>, MaestroError>(init)
            })
    }

    pub fn insert_board(&self, board: &Board) -> Result<ID, MaestroError> {
        Ok(self
            .tx
            .prepare_cached(
                "insert into boards
                 (username, task, task_name, jobs, registered, assigned, testing, running,
                  failed, done, killed, status)
                 values (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) returning id",
            )?
            .query_row(
                params![
                    board.username,
                    board.task,
                    board.task_name,
                    board.jobs,
                    board.registered,
                    board.assigned,
                    board.testing,
                    board.running,
                    board.failed,
                    board.done,
                    board.killed,
                    board.status
                ],
                |row| row.get(0),
            )?)
    }

    pub fn update_board(&self, board: &Board) -> Result<(), MaestroError> {
        self.tx
            .prepare_cached(
                "update boards set jobs = ?, registered = ?, assigned = ?, testing = ?,
                 running = ?, failed = ?, done = ?, killed = ?, status = ?
                 where id = ?",
            )?
            .execute(params![
                board.jobs,
                board.registered,
                board.assigned,
                board.testing,
                board.running,
                board.failed,
                board.done,
                board.killed,
                board.status,
                board.id
            ])?;

        Ok(())
    }

    pub fn delete_board(&self, task: ID) -> Result<usize, MaestroError> {
        Ok(self
            .tx
            .prepare_cached("delete from boards where task = ?")?
            .execute(params![task])?)
    }
}
