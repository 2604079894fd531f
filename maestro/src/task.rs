use crate::{
    board::{create_board, recompute_board},
    database::{Board, Dataset, FileRecord, Job, Task, UnitOfWork},
    error::MaestroError,
    fanout::{fan_out, JobInputs},
    status::{JobStatus, KillScope, TaskStatus},
    storage::{Compensation, Compensations},
    validation::{
        validate_board_absent, validate_command_template, validate_dataset_absent,
        validate_dataset_exists, validate_task_absent, validate_task_exists,
        validate_task_name, validate_user_exists,
    },
    Maestro,
};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};


/// Everything `task create` needs
#[derive(Debug, Clone, Default)]
pub struct TaskRequest {
    pub name: String,
    pub data_dataset: String,
    pub config_dataset: String,
    // placeholder -> dataset name
    pub secondary_datasets: BTreeMap<String, String>,
    pub command_template: String,
    pub container_image: String,
    pub et_bin: Option<i64>,
    pub eta_bin: Option<i64>,
    pub gpu: bool,
    /// skip the test job, jobs start as `assigned`
    pub bypass_test: bool,
    /// validate and create the output directory without writing any record
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub struct CreatedTask {
    pub task: Task,
    pub jobs: Vec<Job>,
    /// `None` for a dry run
    pub board: Option<Board>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KillTarget {
    /// every task of the user
    All,
    Task(String),
}

impl From<&str> for KillTarget {
    fn from(value: &str) -> Self {
        match value {
            "all" => Self::All,
            name => Self::Task(name.to_owned()),
        }
    }
}

/// storage path of the first file of a dataset
fn first_file(dataset: &Dataset) -> Result<&str, MaestroError> {
    dataset
        .files
        .iter()
        .map(|file| file.path.as_str())
        .min()
        .ok_or_else(|| MaestroError::NotFound(format!("files in dataset '{}'", dataset.name)))
}

/// move every job with a rule target, returns how many changed
fn apply_to_jobs<F>(uow: &UnitOfWork, task: &Task, rule: F) -> Result<usize, MaestroError>
where
    F: Fn(JobStatus) -> Option<JobStatus>,
{
    let mut changed = 0;

    for job in uow.jobs(task.id)? {
        if let Some(target) = rule(job.status) {
            let status = job.status.transition(target)?;
            uow.update_job_status(job.id, status)?;
            debug!(task = %task.name, index = job.index, from = %job.status, to = %status, "Moved job");

            changed += 1;
        }
    }

    Ok(changed)
}

fn move_task(uow: &UnitOfWork, task: &mut Task, to: TaskStatus) -> Result<(), MaestroError> {
    task.status = task.status.transition(to)?;
    uow.update_task_status(task.id, task.status)
}

impl Maestro {
    /// Validate the request, fan the task out into one job per config file and register
    /// task, jobs, output dataset and board in a single transaction.
    pub fn create_task(&mut self, request: TaskRequest) -> Result<CreatedTask, MaestroError> {
        let uow = self.store.unit_of_work()?;
        let name = request.name.as_str();

        let username = validate_task_name(&uow, name)?;
        validate_task_absent(&uow, name)?;
        let data = validate_dataset_exists(&uow, &username, &request.data_dataset)?;
        let config = validate_dataset_exists(&uow, &username, &request.config_dataset)?;

        let mut secondary = BTreeMap::new();
        for (key, dataset) in request.secondary_datasets.iter() {
            let dataset = validate_dataset_exists(&uow, &username, dataset)?;
            secondary.insert(key.clone(), first_file(&dataset)?.to_owned());
        }

        validate_command_template(&request.command_template, request.secondary_datasets.keys())?;
        validate_dataset_absent(&uow, &username, name)?;
        validate_board_absent(&uow, name)?;

        if config.files.is_empty() {
            return Err(MaestroError::NotFound(format!(
                "files in config dataset '{}'",
                config.name
            )));
        }

        let output = self.storage.dataset_dir(&username, name);
        let inputs = JobInputs {
            data: first_file(&data)?.to_owned(),
            output: output.to_string_lossy().into_owned(),
            secondary,
        };

        let mut compensations = Compensations::new(&self.storage);
        if self.storage.exists(&output) {
            warn!(path = ?output, "The task directory already exists in the storage");
        } else {
            info!(path = ?output, "Creating the task directory");
            self.storage.create_dir(&output)?;
            compensations.push(Compensation::RemoveDir(output.clone()));
        }

        let mut task = Task {
            id: 0,
            name: name.to_owned(),
            username: username.clone(),
            config_dataset: request.config_dataset.clone(),
            data_dataset: request.data_dataset.clone(),
            output_dataset: name.to_owned(),
            secondary_datasets: request.secondary_datasets.clone(),
            command_template: request.command_template.clone(),
            container_image: request.container_image.clone(),
            cluster: self.cluster.clone(),
            et_bin: request.et_bin,
            eta_bin: request.eta_bin,
            is_gpu: request.gpu,
            status: TaskStatus::Hold,
        };

        if request.dry_run {
            let jobs = fan_out(
                &self.mapper,
                &task,
                &config.files,
                &inputs,
                request.bypass_test,
            );
            compensations.commit();
            uow.rollback()?;

            info!(task = %name, jobs = jobs.len(), "Dry run finished, nothing was registered");

            return Ok(CreatedTask {
                task,
                jobs,
                board: None,
            });
        }

        task.id = uow.insert_task(&task)?;

        let mut jobs = fan_out(
            &self.mapper,
            &task,
            &config.files,
            &inputs,
            request.bypass_test,
        );
        for job in jobs.iter_mut() {
            job.id = uow.insert_job(job)?;
        }

        uow.insert_dataset(&Dataset {
            id: 0,
            username: username.clone(),
            name: name.to_owned(),
            cluster: self.cluster.clone(),
            task_usage: true,
            files: vec![FileRecord {
                path: inputs.output.clone(),
                hash: String::new(),
            }],
        })?;

        move_task(&uow, &mut task, TaskStatus::Registered)?;
        let board = create_board(&uow, &task)?;

        uow.commit()?;
        compensations.commit();

        info!(task = %name, jobs = jobs.len(), "Created task");

        Ok(CreatedTask {
            task,
            jobs,
            board: Some(board),
        })
    }

    /// Send every failed, killed or broken job of the task back to `registered`
    pub fn retry_task(&mut self, name: &str) -> Result<Board, MaestroError> {
        let uow = self.store.unit_of_work()?;
        validate_task_name(&uow, name)?;
        let mut task = validate_task_exists(&uow, name)?;

        let changed = apply_to_jobs(&uow, &task, JobStatus::retry_target)?;
        move_task(&uow, &mut task, TaskStatus::Registered)?;
        let board = recompute_board(&uow, &task)?;
        uow.commit()?;

        info!(task = %name, jobs = changed, "Retried task");

        Ok(board)
    }

    /// Kill one task or all tasks of `username`.
    ///
    /// Jobs that are executing only get the pending `kill`, the executor has to
    /// acknowledge it with `killed`.
    pub fn kill_task(
        &mut self,
        username: &str,
        target: KillTarget,
    ) -> Result<Vec<Board>, MaestroError> {
        let uow = self.store.unit_of_work()?;
        validate_user_exists(&uow, username)?;

        let (tasks, scope) = match target {
            KillTarget::All => {
                info!(user = %username, "Killing all tasks of the user");

                (uow.tasks(username)?, KillScope::User)
            }
            KillTarget::Task(name) => {
                let owner = validate_task_name(&uow, &name)?;
                if owner != username {
                    return Err(MaestroError::PolicyViolation(format!(
                        "task '{name}' is not owned by user '{username}'"
                    )));
                }

                (vec![validate_task_exists(&uow, &name)?], KillScope::Task)
            }
        };

        let mut boards = Vec::with_capacity(tasks.len());
        for mut task in tasks {
            if scope == KillScope::User && !task.status.can_transition(TaskStatus::Killed) {
                warn!(task = %task.name, status = %task.status, "Skipping task that can not be killed");
                continue;
            }

            let changed = apply_to_jobs(&uow, &task, |status| status.kill_target(scope))?;
            move_task(&uow, &mut task, TaskStatus::Killed)?;
            boards.push(recompute_board(&uow, &task)?);

            info!(task = %task.name, jobs = changed, "Killed task");
        }
        uow.commit()?;

        Ok(boards)
    }

    /// Remove jobs, board, task and output dataset, then the output directory
    pub fn delete_task(&mut self, name: &str) -> Result<(), MaestroError> {
        let uow = self.store.unit_of_work()?;
        let username = validate_task_name(&uow, name)?;
        let task = validate_task_exists(&uow, name)?;

        let jobs = uow.delete_jobs(task.id)?;
        if uow.delete_board(task.id)? == 0 {
            warn!(task = %name, "The task had no monitoring board");
        }
        uow.delete_task(task.id)?;

        match uow.find_dataset(&username, &task.output_dataset)? {
            Some(dataset) if !dataset.task_usage => {
                return Err(MaestroError::State(format!(
                    "output dataset '{}' of task '{name}' is not marked as task output",
                    dataset.name
                )));
            }
            Some(dataset) => uow.delete_dataset(dataset.id)?,
            None => warn!(task = %name, "The task had no output dataset"),
        }
        uow.commit()?;

        self.storage
            .remove_best_effort(&self.storage.dataset_dir(&username, &task.output_dataset))?;

        info!(task = %name, jobs = jobs, "Deleted task");

        Ok(())
    }

    /// Boards of all tasks of `username`, each recomputed before it is returned
    pub fn list_tasks(&mut self, username: &str) -> Result<Vec<Board>, MaestroError> {
        let uow = self.store.unit_of_work()?;
        validate_user_exists(&uow, username)?;

        let boards = uow
            .tasks(username)?
            .iter()
            .map(|task| recompute_board(&uow, task))
            .collect::<Result<Vec<_>, _>>()?;
        uow.commit()?;

        Ok(boards)
    }

    /// Status report of the executor for one job, checked against the job transitions
    pub fn report_job(
        &mut self,
        name: &str,
        index: u32,
        status: JobStatus,
    ) -> Result<Job, MaestroError> {
        let uow = self.store.unit_of_work()?;
        validate_task_name(&uow, name)?;
        let task = validate_task_exists(&uow, name)?;

        let mut job = uow
            .jobs(task.id)?
            .into_iter()
            .find(|job| job.index == index)
            .ok_or_else(|| MaestroError::NotFound(format!("job {index} of task '{name}'")))?;

        job.status = job.status.transition(status)?;
        uow.update_job_status(job.id, job.status)?;
        recompute_board(&uow, &task)?;
        uow.commit()?;

        info!(task = %name, index = index, status = %job.status, "Updated job");

        Ok(job)
    }

    /// Status report of the executor for the task itself, e.g. `running` once the test job
    /// passed or `done` once every job finished
    pub fn report_task(&mut self, name: &str, status: TaskStatus) -> Result<Board, MaestroError> {
        let uow = self.store.unit_of_work()?;
        validate_task_name(&uow, name)?;
        let mut task = validate_task_exists(&uow, name)?;

        let from = task.status;
        move_task(&uow, &mut task, status)?;
        let board = recompute_board(&uow, &task)?;
        uow.commit()?;

        info!(task = %name, from = %from, to = %task.status, "Updated task");

        Ok(board)
    }

    /// Recompute the board of one task from its jobs
    pub fn recompute_task_board(&mut self, name: &str) -> Result<Board, MaestroError> {
        let uow = self.store.unit_of_work()?;
        validate_task_name(&uow, name)?;
        let task = validate_task_exists(&uow, name)?;

        let board = recompute_board(&uow, &task)?;
        uow.commit()?;

        Ok(board)
    }
}
