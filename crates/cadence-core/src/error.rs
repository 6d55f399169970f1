use thiserror::Error;

#[derive(Debug, Error)]
pub enum CadenceError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CadenceError {
    /// Short, stable error code for log lines and CLI exit messages.
    pub fn code(&self) -> &'static str {
        match self {
            CadenceError::Config(_) => "CONFIG_ERROR",
            CadenceError::Database(_) => "DATABASE_ERROR",
            CadenceError::Io(_) => "IO_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, CadenceError>;
