use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("TLS configuration error: {0}")]
    Tls(String),

    #[error("malformed alert: {0}")]
    MalformedAlert(String),

    #[error("under-localized alert: {0}")]
    UnderLocalized(String),

    #[error("corrupt snapshot: {0}")]
    CorruptSnapshot(String),

    #[error("invalid host target file: {0}")]
    InvalidHostFile(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
