use rusqlite::Error as RusqliteError;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MendError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] RusqliteError),

    #[error("Prompt error: {0}")]
    PromptError(#[from] dialoguer::Error),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] Box<figment::Error>),

    #[error("Manifest error: {0}")]
    ManifestError(#[from] toml::de::Error),

    /// Ledger and schema disagree in a way reconciliation cannot resolve on its own
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A table or column the operation depends on is not in the schema catalog
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Project root marker '{marker}' not found in {dir}")]
    MissingProjectRoot { marker: String, dir: String },

    #[error("Invalid choice: '{0}'")]
    InvalidChoice(String),

    #[error("Error: {0}")]
    Error(String),
}
