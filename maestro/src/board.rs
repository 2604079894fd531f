use crate::{
    database::{Board, Job, Task, UnitOfWork},
    error::MaestroError,
    status::JobStatus,
};
use tracing::{debug, info};

/// Fill every counter of `board` from `jobs`, nothing else writes them.
///
/// Jobs in `hold` count as registered, a pending `kill` as killed and `broken` as failed,
/// so the seven counters always add up to `jobs`.
pub fn tally(board: &mut Board, jobs: &[Job]) {
    board.jobs = jobs.len() as u32;
    board.registered = 0;
    board.assigned = 0;
    board.testing = 0;
    board.running = 0;
    board.failed = 0;
    board.done = 0;
    board.killed = 0;

    for job in jobs {
        let counter = match job.status {
            JobStatus::Hold | JobStatus::Registered => &mut board.registered,
            JobStatus::Assigned => &mut board.assigned,
            JobStatus::Testing => &mut board.testing,
            JobStatus::Running => &mut board.running,
            JobStatus::Failed | JobStatus::Broken => &mut board.failed,
            JobStatus::Done => &mut board.done,
            JobStatus::Kill | JobStatus::Killed => &mut board.killed,
        };
        *counter += 1;
    }
}

/// snapshot the just created jobs of `task` into a new board
pub fn create_board(uow: &UnitOfWork, task: &Task) -> Result<Board, MaestroError> {
    let mut board = Board {
        id: 0,
        username: task.username.clone(),
        task: task.id,
        task_name: task.name.clone(),
        jobs: 0,
        registered: 0,
        assigned: 0,
        testing: 0,
        running: 0,
        failed: 0,
        done: 0,
        killed: 0,
        status: task.status,
    };
    tally(&mut board, &uow.jobs(task.id)?);
    board.id = uow.insert_board(&board)?;

    info!(task = %task.name, jobs = board.jobs, "Created monitoring board");

    Ok(board)
}

/// Bring the board of `task` back in line with its jobs and the task status.
/// Meant to be called by the monitor whenever job statuses changed.
pub fn recompute_board(uow: &UnitOfWork, task: &Task) -> Result<Board, MaestroError> {
    let mut board = uow
        .find_board(&task.name)?
        .ok_or_else(|| MaestroError::NotFound(format!("board of task '{}'", task.name)))?;

    tally(&mut board, &uow.jobs(task.id)?);
    board.status = task.status;
    uow.update_board(&board)?;

    debug!(task = %task.name, board = ?board, "Recomputed board");

    Ok(board)
}
