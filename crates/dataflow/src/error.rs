use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("cannot cast value {value} to {target}")]
    Cast { value: String, target: String },

    #[error("no columns could be determined from the stream")]
    EmptySchema,

    #[error("stream schemas do not align: {0}")]
    SchemaMisaligned(String),

    #[error("row channel closed unexpectedly")]
    ChannelClosed,

    #[error("flow cancelled")]
    Cancelled,

    #[error("stream read failed: {0}")]
    Read(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FlowError {
    pub fn cast(value: &model::core::value::Value, target: impl std::fmt::Display) -> Self {
        FlowError::Cast {
            value: format!("{value:?}"),
            target: target.to_string(),
        }
    }
}
