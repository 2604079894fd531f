use crate::{
    database::{FileRecord, Job, Task},
    status::JobStatus,
    template::{render, PathMapper},
};
use itertools::Itertools;
use std::collections::BTreeMap;
use tracing::debug;

/// priority given to every fanned out job, it is stored but not acted upon
pub const JOB_PRIORITY: i32 = -1;

/// Storage paths shared by all jobs of a task
#[derive(Debug, Clone, Default)]
pub struct JobInputs {
    pub data: String,
    pub output: String,
    // placeholder -> storage path
    pub secondary: BTreeMap<String, String>,
}

/// One job per config file, indexed `0..N` in lexicographic path order.
///
/// `task.id` has to be assigned already. Jobs start as `assigned` when the test job is
/// bypassed and `registered` otherwise.
pub fn fan_out(
    mapper: &PathMapper,
    task: &Task,
    config_files: &[FileRecord],
    inputs: &JobInputs,
    bypass_test: bool,
) -> Vec<Job> {
    let data = mapper.resolve(&inputs.data);
    let output = mapper.resolve(&inputs.output);
    let secondary = inputs
        .secondary
        .iter()
        .map(|(key, path)| (key.clone(), mapper.resolve(path)))
        .collect::<BTreeMap<_, _>>();

    let status = if bypass_test {
        JobStatus::Assigned
    } else {
        JobStatus::Registered
    };

    config_files
        .iter()
        .map(|file| file.path.as_str())
        .sorted()
        .enumerate()
        .map(|(index, path)| {
            let config_path = mapper.resolve(path);
            let command = render(
                &task.command_template,
                &data,
                &config_path,
                &output,
                &secondary,
            );

            debug!(task = %task.name, index = index, command = %command, "Prepared job");

            Job {
                id: 0,
                task: task.id,
                config_path,
                index: index as u32,
                command,
                is_gpu: task.is_gpu,
                priority: JOB_PRIORITY,
                status,
            }
        })
        .collect_vec()
}
