//! Error types for Forge.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ForgeError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Workspace error: {0}")]
    Workspace(String),

    #[error("PTY error: {0}")]
    Pty(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Router error: {0}")]
    Router(String),

    #[error("Continuation error: {0}")]
    Continuation(String),

    #[error("Ensemble error: {0}")]
    Ensemble(String),

    #[error("Supervisor unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ForgeError>;
