pub mod sqlite;


use crate::status::{JobStatus, TaskStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use sqlite::{Store, UnitOfWork};

pub type ID = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    /// assigned by the store on insert
    pub id: ID,
    pub username: String,
    pub name: String,
    pub cluster: String,
    /// the dataset is the output of a task and only goes away with it
    pub task_usage: bool,
    pub files: Vec<FileRecord>,
}

/// A file owned by exactly one dataset.
///
/// `hash` is derived from the path string, not from the file contents. It is a
/// bookkeeping tag and does not detect content changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub hash: String,
}

/// read only projection used by `dataset list`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub username: String,
    pub dataset: String,
    pub files: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: ID,
    pub name: String,
    pub username: String,
    pub config_dataset: String,
    pub data_dataset: String,
    pub output_dataset: String,
    // placeholder -> dataset name
    pub secondary_datasets: BTreeMap<String, String>,
    pub command_template: String,
    pub container_image: String,
    pub cluster: String,
    pub et_bin: Option<i64>,
    pub eta_bin: Option<i64>,
    pub is_gpu: bool,
    pub status: TaskStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: ID,
    pub task: ID,
    pub config_path: String,
    pub index: u32,
    pub command: String,
    pub is_gpu: bool,
    pub priority: i32,
    pub status: JobStatus,
}

/// Monitoring aggregate of one task, derived from its jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    pub id: ID,
    pub username: String,
    pub task: ID,
    pub task_name: String,
    pub jobs: u32,
    pub registered: u32,
    pub assigned: u32,
    pub testing: u32,
    pub running: u32,
    pub failed: u32,
    pub done: u32,
    pub killed: u32,
    pub status: TaskStatus,
}

// ref: https://www.sqlite.org/lang_createtable.html
pub const SQL_SCHEMA: [&str; 6] = [
    "create table if not exists users (
    username text primary key
);",
    "create table if not exists datasets (
    id integer primary key,
    username text not null references users (username),
    name text not null,
    cluster text not null,
    task_usage integer not null,
    unique (username, name)
);",
    "create table if not exists files (
    id integer primary key,
    dataset integer not null references datasets (id),
    path text not null,
    hash text not null
);",
    "create table if not exists tasks (
    id integer primary key,
    name text not null unique,
    username text not null references users (username),
    config_dataset text not null,
    data_dataset text not null,
    output_dataset text not null,
    secondary_datasets text not null,
    command_template text not null,
    container_image text not null,
    cluster text not null,
    et_bin integer,
    eta_bin integer,
    is_gpu integer not null,
    status text not null
);",
    "create table if not exists jobs (
    id integer primary key,
    task integer not null references tasks (id),
    idx integer not null,
    config_path text not null,
    command text not null,
    is_gpu integer not null,
    priority integer not null,
    status text not null,
    unique (task, idx)
);",
    "create table if not exists boards (
    id integer primary key,
    username text not null references users (username),
    task integer not null references tasks (id),
    task_name text not null unique,
    jobs integer not null,
    registered integer not null,
    assigned integer not null,
    testing integer not null,
    running integer not null,
    failed integer not null,
    done integer not null,
    killed integer not null,
    status text not null
);",
];
pub const SQL_SCHEMA_NUMBER: usize = SQL_SCHEMA.len();
