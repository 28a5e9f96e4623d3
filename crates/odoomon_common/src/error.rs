//! Error types for Odoomon.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Path not found: {0}")]
    NotFound(PathBuf),

    #[error("Command failed: {command}: {detail}")]
    CommandFailed { command: String, detail: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
