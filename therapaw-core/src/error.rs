use thiserror::Error;

#[derive(Error, Debug)]
pub enum TherapawError {
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] crate::session::StoreError),

    #[error("Other error: {0}")]
    Other(String),
}
