use connectors::error::{ConnectorError, DbError, FileError};
use dataflow::FlowError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("invalid task configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid mode '{0}': must be append, drop, truncate, upsert, full-refresh or snapshot")]
    InvalidMode(String),

    #[error("'primary_key' and 'update_key' are required for upsert mode")]
    MissingUpsertKeys,

    #[error(
        "custom sql for upsert must include the {{upsert_where_cond}} placeholder, \
         e.g.: select * from t where col = 'A' and {{upsert_where_cond}}"
    )]
    MissingUpsertPlaceholder,

    #[error("source and target share no column names: {0}")]
    SchemaMismatch(String),

    #[error("unresolved placeholder {{{0}}} in sql")]
    UnresolvedPlaceholder(String),

    #[error("could not determine a schema from the source stream")]
    EmptySchema,

    #[error("staged table count ({table}) does not match stream count ({stream}); records missing")]
    RowCountMismatch { stream: u64, table: u64 },

    #[error("checksum validation failed: {0}")]
    ChecksumFailure(#[source] DbError),

    #[error("watermark of type '{0}' cannot be rendered as a literal")]
    UnrepresentableWatermark(String),

    #[error("execution interrupted")]
    Interrupted,

    #[error("no transform runner is configured for this target")]
    TransformUnsupported,

    #[error("{context}: {source}")]
    Connect {
        context: String,
        #[source]
        source: ConnectorError,
    },

    #[error("promotion failed: {0}")]
    Promotion(#[source] DbError),

    #[error("worker failed: {0}")]
    Worker(String),

    #[error("could not parse task document: {0}")]
    Parse(String),

    #[error("could not parse options near '{fragment}'")]
    OptionsParse { fragment: String },

    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    File(#[from] FileError),

    #[error(transparent)]
    Connector(#[from] ConnectorError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<FlowError> for TaskError {
    fn from(err: FlowError) -> Self {
        match err {
            FlowError::EmptySchema => TaskError::EmptySchema,
            FlowError::Cancelled => TaskError::Interrupted,
            other => TaskError::Db(DbError::Flow(other)),
        }
    }
}

impl TaskError {
    pub fn connect(context: impl Into<String>, source: ConnectorError) -> Self {
        TaskError::Connect {
            context: context.into(),
            source,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, TaskError::Interrupted)
    }
}
