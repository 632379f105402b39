//! Error types for the sync library.

use thiserror::Error;

/// Main error type for sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Configuration error (unreadable file, malformed value, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration failed validation; carries every reason found.
    #[error("Invalid configuration: {}", .0.join(", "))]
    InvalidConfig(Vec<String>),

    /// Connection could not be resolved or opened
    #[error("Connection error: {message}\n  Context: {context}")]
    Connection { message: String, context: String },

    /// A single statement or procedure call failed
    #[error("Statement failed: {message}\n  Statement: {statement}")]
    Statement { statement: String, message: String },

    /// A row does not carry a column the caller asked for
    #[error("Column '{column}' not found in row")]
    MissingColumn { column: String },

    /// Source rows do not share the same column set
    #[error("Row {row} has an unexpected shape: {message}")]
    RowShape { row: usize, message: String },

    /// Task type not known to this build
    #[error("Unknown task type: {0}")]
    UnknownTaskType(String),

    /// Driver-level MySQL error
    #[error("Database error: {0}")]
    Database(#[from] mysql_async::Error),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    /// Create a Connection error with context about where it occurred
    pub fn connection(message: impl ToString, context: impl Into<String>) -> Self {
        SyncError::Connection {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Statement error
    pub fn statement(statement: impl Into<String>, message: impl ToString) -> Self {
        SyncError::Statement {
            statement: statement.into(),
            message: message.to_string(),
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }

    /// Process exit code for this error.
    ///
    /// Every failure maps to 1; wrappers only distinguish success from failure.
    pub fn exit_code(&self) -> u8 {
        1
    }
}

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
