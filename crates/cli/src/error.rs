use engine::TaskError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("shutdown requested")]
    ShutdownRequested,

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error("could not read '{path}': {source}")]
    ReadConfig {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
