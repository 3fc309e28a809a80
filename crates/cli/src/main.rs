use crate::{error::CliError, shutdown::ShutdownCoordinator};
use clap::{Parser, Subcommand};
use connectors::ConnInfo;
use engine::{
    discover::{discover, DiscoverOptions},
    env as task_env,
    Config, Task, TaskError,
};
use std::{io::Read, process, sync::Arc};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};

mod error;
mod shutdown;

#[derive(Parser)]
#[command(name = "sluice", version, about = "Declarative ELT between databases and file systems")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one or more task documents (YAML or JSON, `-` for stdin)
    Run {
        /// Task file; multiple documents separated by `---` run as
        /// independent tasks
        config: String,
    },
    /// Enumerate tables or files behind a connection
    Discover {
        /// Connection URL
        conn: String,
        /// Glob over object names
        #[arg(long)]
        filter: Option<String>,
        /// Also enumerate columns
        #[arg(long)]
        column_level: bool,
        /// Expand nested schemata
        #[arg(long)]
        recursive: bool,
    },
}

#[tokio::main]
async fn main() {
    let level = if std::env::var(task_env::DEBUG).is_ok() {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let exit_code = match run_cli().await {
        Ok(()) => 0,
        Err(CliError::ShutdownRequested) => {
            info!("shut down gracefully");
            130
        }
        Err(CliError::Task(err)) if err.is_interrupted() => {
            info!("task interrupted");
            130
        }
        Err(err) => {
            tracing::error!("{err}");
            1
        }
    };

    process::exit(exit_code);
}

async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();
    let cancel = CancellationToken::new();
    ShutdownCoordinator::new(cancel.clone()).register_handlers();

    match cli.command {
        Commands::Run { config } => run_tasks(&config, cancel).await,
        Commands::Discover {
            conn,
            filter,
            column_level,
            recursive,
        } => {
            let info = ConnInfo::from_url(&conn).map_err(TaskError::from)?;
            let options = DiscoverOptions {
                filter,
                column_level,
                recursive,
            };
            let found = discover(&info, &options, cancel).await?;
            println!("{}", serde_json::to_string_pretty(&found)?);
            Ok(())
        }
    }
}

async fn run_tasks(path: &str, cancel: CancellationToken) -> Result<(), CliError> {
    let document = if path == "-" {
        let mut buffer = String::new();
        std::io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        std::fs::read_to_string(path).map_err(|source| CliError::ReadConfig {
            path: path.to_string(),
            source,
        })?
    };

    let configs: Vec<Config> = document
        .split("\n---")
        .map(str::trim)
        .filter(|doc| !doc.is_empty())
        .map(Config::from_str)
        .collect::<Result<_, _>>()?;

    if configs.is_empty() {
        return Err(CliError::Task(TaskError::InvalidConfig(
            "task document is empty".to_string(),
        )));
    }

    // parallelism is across independent tasks, bounded by the
    // replication cap
    let semaphore = Arc::new(Semaphore::new(task_env::concurrency_limit()));
    let mut handles = Vec::with_capacity(configs.len());

    for config in configs {
        let semaphore = semaphore.clone();
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            let _permit = semaphore
                .acquire()
                .await
                .expect("semaphore never closes");
            let mut task = Task::new(config)?;

            let task_cancel = task.cancellation();
            let forward = cancel.clone();
            tokio::spawn(async move {
                forward.cancelled().await;
                task_cancel.cancel();
            });

            task.execute().await?;
            info!(
                rows = task.count(),
                topology = %task.topology,
                "task finished"
            );
            Ok::<_, TaskError>(())
        }));
    }

    let mut first_error: Option<CliError> = None;
    for handle in handles {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                if first_error.is_none() {
                    first_error = Some(err.into());
                }
            }
            Err(join_err) => {
                if first_error.is_none() {
                    first_error =
                        Some(CliError::Task(TaskError::Worker(join_err.to_string())));
                }
            }
        }
    }

    if cancel.is_cancelled() && first_error.is_none() {
        return Err(CliError::ShutdownRequested);
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
