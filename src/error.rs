//! Error types for geodex

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GeodexError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Filesystem error: {0}")]
    Filesystem(String),

    #[error("Not a valid working tree: {} (.ddb does not exist, did you run init?)", .0.display())]
    NotAWorkingTree(PathBuf),

    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0}")]
    App(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, GeodexError>;
