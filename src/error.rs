use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackboneError {
    #[error("Checkpoint not found: {}", .0.display())]
    MissingCheckpoint(PathBuf),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, BackboneError>;
