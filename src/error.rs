pub type DeepcompResult<T> = Result<T, DeepcompError>;

#[derive(thiserror::Error, Debug)]
pub enum DeepcompError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("source error: {0}")]
    Source(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("sink error: {0}")]
    Sink(String),

    #[error("pipeline cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DeepcompError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn source(msg: impl Into<String>) -> Self {
        Self::Source(msg.into())
    }

    pub fn read(msg: impl Into<String>) -> Self {
        Self::Read(msg.into())
    }

    pub fn sink(msg: impl Into<String>) -> Self {
        Self::Sink(msg.into())
    }
}
