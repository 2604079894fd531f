use clap::{Args, Parser, Subcommand};
use maestro::{
    config::MaestroConfig,
    error::MaestroError,
    status::{JobStatus, TaskStatus},
    task::{KillTarget, TaskRequest},
    Maestro,
};
use serde::Serialize;
use std::{collections::BTreeMap, env, path::PathBuf, process::ExitCode};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use tracing_unwrap::ResultExt;

#[derive(Parser, Debug)]
#[command(author, version, about = "Manage datasets and tasks on the shared cluster volume")]
struct Arguments {
    /// path to the YAML configuration
    #[arg(short, long, default_value = "maestro.yaml")]
    config: PathBuf,

    /// log debug output unless RUST_LOG says otherwise
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register and list users
    #[command(subcommand)]
    User(UserCommands),
    /// Upload, download, delete and list datasets
    #[command(subcommand)]
    Dataset(DatasetCommands),
    /// Create, retry, kill, delete and list tasks
    #[command(subcommand)]
    Task(TaskCommands),
}

#[derive(Subcommand, Debug)]
enum UserCommands {
    Create {
        #[arg(short, long = "user")]
        username: String,
    },
    List,
}

#[derive(Subcommand, Debug)]
enum DatasetCommands {
    Upload {
        /// dataset name, e.g. user.<username>.<name>
        #[arg(short, long)]
        dataset: String,
        /// file or directory to upload
        #[arg(short, long)]
        path: PathBuf,
    },
    Download {
        #[arg(short, long)]
        dataset: String,
        /// defaults to the current directory
        #[arg(long)]
        destination: Option<PathBuf>,
    },
    Delete {
        #[arg(short, long)]
        dataset: String,
    },
    List {
        #[arg(short, long = "user")]
        username: String,
    },
}

#[derive(Subcommand, Debug)]
enum TaskCommands {
    Create(CreateArguments),
    Retry {
        #[arg(short, long)]
        task: String,
    },
    Delete {
        #[arg(short, long)]
        task: String,
    },
    List {
        #[arg(short, long = "user")]
        username: String,
    },
    Kill {
        #[arg(short, long = "user")]
        username: String,
        #[arg(short, long, required_unless_present = "all", conflicts_with = "all")]
        task: Option<String>,
        /// kill every task of the user
        #[arg(short, long)]
        all: bool,
    },
    /// Status report of the executor for a single job
    Report {
        #[arg(short, long)]
        task: String,
        #[arg(short, long)]
        index: u32,
        #[arg(short, long)]
        status: JobStatus,
    },
    /// Status report of the executor for the task itself
    ReportStatus {
        #[arg(short, long)]
        task: String,
        #[arg(short, long)]
        status: TaskStatus,
    },
    /// Recompute the monitoring board of a task from its jobs
    Recompute {
        #[arg(short, long)]
        task: String,
    },
}

#[derive(Args, Debug)]
struct CreateArguments {
    /// task name, e.g. user.<username>.<name>
    #[arg(short, long)]
    task: String,
    /// dataset whose first file replaces %DATA
    #[arg(short, long = "dataFile")]
    data_file: String,
    /// dataset with one config file per job, replaces %IN
    #[arg(short, long = "configFile")]
    config_file: String,
    /// command template with %DATA, %IN and %OUT
    #[arg(long = "exec")]
    exec_command: String,
    #[arg(long = "containerImage")]
    container_image: String,
    /// placeholder to dataset map, e.g. "{'%REF': 'user.alice.ref'}"
    #[arg(long = "secondaryDS", alias = "sd", default_value = "{}", value_parser = parse_secondary)]
    secondary_ds: BTreeMap<String, String>,
    #[arg(long)]
    et: Option<i64>,
    #[arg(long)]
    eta: Option<i64>,
    /// send the jobs to GPU slots
    #[arg(long)]
    gpu: bool,
    /// skip the test job
    #[arg(long)]
    bypass: bool,
    /// validate and create the output directory without registering anything
    #[arg(long = "dry_run", alias = "dry-run")]
    dry_run: bool,
}

fn parse_secondary(value: &str) -> Result<BTreeMap<String, String>, serde_yaml::Error> {
    serde_yaml::from_str(value)
}

fn print_yaml<T: Serialize>(value: &T) {
    match serde_yaml::to_string(value) {
        Ok(document) => print!("{document}"),
        Err(error) => error!(error = ?error, "Failed to render output: {error}"),
    }
}

fn run(maestro: &mut Maestro, command: Commands) -> Result<(), MaestroError> {
    match command {
        Commands::User(UserCommands::Create { username }) => {
            maestro.create_user(&username)?;
        }
        Commands::User(UserCommands::List) => print_yaml(&maestro.list_users()?),

        Commands::Dataset(DatasetCommands::Upload { dataset, path }) => {
            maestro.upload_dataset(&dataset, &path)?;
        }
        Commands::Dataset(DatasetCommands::Download {
            dataset,
            destination,
        }) => {
            let destination = match destination {
                Some(destination) => destination,
                None => env::current_dir()
                    .map_err(|error| MaestroError::storage(PathBuf::from("."), error))?,
            };
            maestro.download_dataset(&dataset, &destination)?;
        }
        Commands::Dataset(DatasetCommands::Delete { dataset }) => maestro.delete_dataset(&dataset)?,
        Commands::Dataset(DatasetCommands::List { username }) => {
            print_yaml(&maestro.list_datasets(&username)?)
        }

        Commands::Task(TaskCommands::Create(arguments)) => {
            let created = maestro.create_task(TaskRequest {
                name: arguments.task,
                data_dataset: arguments.data_file,
                config_dataset: arguments.config_file,
                secondary_datasets: arguments.secondary_ds,
                command_template: arguments.exec_command,
                container_image: arguments.container_image,
                et_bin: arguments.et,
                eta_bin: arguments.eta,
                gpu: arguments.gpu,
                bypass_test: arguments.bypass,
                dry_run: arguments.dry_run,
            })?;

            match created.board {
                Some(board) => print_yaml(&board),
                None => print_yaml(&created.jobs),
            }
        }
        Commands::Task(TaskCommands::Retry { task }) => print_yaml(&maestro.retry_task(&task)?),
        Commands::Task(TaskCommands::Delete { task }) => maestro.delete_task(&task)?,
        Commands::Task(TaskCommands::List { username }) => {
            print_yaml(&maestro.list_tasks(&username)?)
        }
        Commands::Task(TaskCommands::Kill {
            username,
            task,
            all,
        }) => {
            let target = match task {
                Some(task) if !all => KillTarget::from(task.as_str()),
                _ => KillTarget::All,
            };
            print_yaml(&maestro.kill_task(&username, target)?);
        }
        Commands::Task(TaskCommands::Report {
            task,
            index,
            status,
        }) => print_yaml(&maestro.report_job(&task, index, status)?),
        Commands::Task(TaskCommands::ReportStatus { task, status }) => {
            print_yaml(&maestro.report_task(&task, status)?)
        }
        Commands::Task(TaskCommands::Recompute { task }) => {
            print_yaml(&maestro.recompute_task_board(&task)?)
        }
    }

    Ok(())
}

/// RUST_LOG takes precedence over `log_level`, logs are written to stderr
fn init_logging(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> ExitCode {
    let arguments = Arguments::parse();

    init_logging(if arguments.verbose { "debug" } else { "info" });

    let config = MaestroConfig::load(&arguments.config).expect_or_log("Failed to load configuration");
    let mut maestro = Maestro::load(&config).expect_or_log("Failed to open the database");

    let result = run(&mut maestro, arguments.command);

    if let Err(error) = maestro.close() {
        error!(error = ?error, "Failed to close the database: {error}");
    }

    match result {
        Ok(()) => {
            info!("Done");

            ExitCode::SUCCESS
        }
        Err(error) => {
            error!(error = ?error, "{error}");

            ExitCode::FAILURE
        }
    }
}
