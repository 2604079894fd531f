//! Task and job status values together with every transition they allow.
//!
//! Task: `hold -> registered -> (assigned | testing | running) -> (done | failed)`, and any
//! state may move to `killed`. Retrying moves a task back to `registered`.
//!
//! Job: `registered -> assigned -> testing -> running -> (done | failed)`. A job that is
//! executing is asked to stop through the pending state `kill`, which the executor
//! acknowledges with `killed`. Jobs that have not started are `killed` directly.

use crate::error::MaestroError;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone, Copy, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Hold,
    Registered,
    Assigned,
    Testing,
    Running,
    Done,
    Failed,
    Killed,
    Finalized,
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone, Copy, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Hold,
    Registered,
    Assigned,
    Testing,
    Running,
    Done,
    Failed,
    Kill,
    Killed,
    Broken,
}

/// Which kill rule applies to a job
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum KillScope {
    /// every task owned by one user (`task kill --all`)
    User,
    /// a single task
    Task,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 9] = [
        Self::Hold,
        Self::Registered,
        Self::Assigned,
        Self::Testing,
        Self::Running,
        Self::Done,
        Self::Failed,
        Self::Killed,
        Self::Finalized,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hold => "hold",
            Self::Registered => "registered",
            Self::Assigned => "assigned",
            Self::Testing => "testing",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Killed => "killed",
            Self::Finalized => "finalized",
        }
    }

    pub fn can_transition(self, to: TaskStatus) -> bool {
        use TaskStatus::*;

        match (self, to) {
            (from, to) if from == to => true,
            (Finalized, _) => false,
            (_, Killed) | (_, Registered) => true,
            (Registered, Assigned | Testing | Running)
            | (Assigned, Testing | Running)
            | (Testing, Running) => true,
            (Assigned | Testing | Running, Done | Failed) => true,
            (Done, Finalized) => true,
            _ => false,
        }
    }

    /// checked transition, rejects everything outside of the table
    pub fn transition(self, to: TaskStatus) -> Result<TaskStatus, MaestroError> {
        if self.can_transition(to) {
            Ok(to)
        } else {
            Err(MaestroError::State(format!(
                "task can not move from '{self}' to '{to}'"
            )))
        }
    }
}

impl JobStatus {
    pub const ALL: [JobStatus; 10] = [
        Self::Hold,
        Self::Registered,
        Self::Assigned,
        Self::Testing,
        Self::Running,
        Self::Done,
        Self::Failed,
        Self::Kill,
        Self::Killed,
        Self::Broken,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hold => "hold",
            Self::Registered => "registered",
            Self::Assigned => "assigned",
            Self::Testing => "testing",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Kill => "kill",
            Self::Killed => "killed",
            Self::Broken => "broken",
        }
    }

    /// states a job never leaves on its own
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Killed | Self::Broken)
    }

    /// states in which the executor has not picked the job up yet
    pub fn is_pre_execution(self) -> bool {
        matches!(self, Self::Hold | Self::Registered | Self::Assigned)
    }

    pub fn can_transition(self, to: JobStatus) -> bool {
        use JobStatus::*;

        match (self, to) {
            (from, to) if from == to => true,
            (Hold, Registered)
            | (Registered, Assigned)
            | (Assigned, Testing | Running)
            | (Testing, Running) => true,
            (Testing | Running, Done | Failed | Broken) => true,
            (from, Kill) => !from.is_terminal(),
            (from, Killed) => from.is_pre_execution() || from == Kill,
            (Failed | Killed | Kill | Broken, Registered) => true,
            _ => false,
        }
    }

    /// checked transition, rejects everything outside of the table
    pub fn transition(self, to: JobStatus) -> Result<JobStatus, MaestroError> {
        if self.can_transition(to) {
            Ok(to)
        } else {
            Err(MaestroError::State(format!(
                "job can not move from '{self}' to '{to}'"
            )))
        }
    }

    /// target state of a retry, `None` leaves the job untouched
    pub fn retry_target(self) -> Option<JobStatus> {
        match self {
            Self::Failed | Self::Killed | Self::Kill | Self::Broken => Some(Self::Registered),
            _ => None,
        }
    }

    /// target state of a kill request, `None` leaves the job untouched
    pub fn kill_target(self, scope: KillScope) -> Option<JobStatus> {
        if self.is_terminal() || self == Self::Kill {
            return None;
        }

        match scope {
            KillScope::User if self == Self::Assigned => Some(Self::Killed),
            KillScope::User => Some(Self::Kill),
            KillScope::Task if matches!(self, Self::Running | Self::Testing) => Some(Self::Kill),
            KillScope::Task => Some(Self::Killed),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = MaestroError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == value)
            .ok_or_else(|| MaestroError::State(format!("unknown task status '{value}'")))
    }
}

impl FromStr for JobStatus {
    type Err = MaestroError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == value)
            .ok_or_else(|| MaestroError::State(format!("unknown job status '{value}'")))
    }
}
