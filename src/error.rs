//! Error types for inventory and profile operations.

use thiserror::Error;

/// The main error type for inventory and profile operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Package not found: {0}")]
    PackageNotFound(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Operation requires root privileges, run through the privileged runner: {command}")]
    RequiresPrivilege { command: String },

    #[error("Profile error: {0}")]
    ProfileError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// A type alias for Results using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
