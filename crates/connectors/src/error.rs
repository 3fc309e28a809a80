use dataflow::FlowError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConnectorError {
    #[error("invalid connection url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("no driver registered for connection kind '{0}'")]
    DriverUnavailable(String),

    #[error("could not connect: {0}")]
    ConnectFailure(String),

    #[error("authentication failed: {0}")]
    AuthFailure(String),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    File(#[from] FileError),
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("sql execution failed: {message} (sql: {sql})")]
    Sql { message: String, sql: String },

    #[error("table '{0}' does not exist")]
    TableMissing(String),

    #[error("column '{0}' not found")]
    ColumnMissing(String),

    #[error(
        "checksum mismatch on column '{column}': stream {stream_checksum} != table {table_checksum}"
    )]
    ChecksumMismatch {
        column: String,
        stream_checksum: u64,
        table_checksum: u64,
    },

    #[error("cannot derive a schema: {0}")]
    Schema(String),

    #[error("transaction error: {0}")]
    Tx(String),

    #[error("operation not supported by this driver: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Flow(#[from] FlowError),
}

impl DbError {
    pub fn sql(message: impl Into<String>, sql: impl Into<String>) -> Self {
        DbError::Sql {
            message: message.into(),
            sql: sql.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum FileError {
    #[error("invalid file url '{0}'")]
    InvalidUrl(String),

    #[error("path contains an empty segment after the scheme: {0}")]
    DoubleSlash(String),

    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("no input available: {0}")]
    NoInput(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Flow(#[from] FlowError),
}
