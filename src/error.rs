use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerAuditError {
    #[error("Missing {role} file: {}", path.display())]
    MissingInputFile { role: String, path: PathBuf },

    #[error("Malformed input in {}: {details}", path.display())]
    MalformedInput { path: PathBuf, details: String },

    #[error("Opening balance post-check failed: {failed} rows still unbalanced after {adjusted} adjustments; nothing was written")]
    SolverPostCheckFailure { adjusted: usize, failed: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Date parsing error: {0}")]
    DateError(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments for tool '{tool}': {details}")]
    InvalidToolArguments { tool: String, details: String },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LedgerAuditError>;
