use std::path::PathBuf;

use thiserror::Error;

/// Problems with the run configuration. These abort the run before any file
/// is touched; everything that goes wrong later is handled per file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Input directory '{}' does not exist", .0.display())]
    InputMissing(PathBuf),

    #[error("Input directory '{}' is not a directory", .0.display())]
    InputNotDirectory(PathBuf),

    #[error("Cannot create output '{}' directory: {source}", .path.display())]
    OutputCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid filename date regex: {0}")]
    InvalidRegex(#[from] regex::Error),

    /// Range bounds are `YYYY-MM-DD`.
    #[error("Invalid date '{value}', expected YYYY-MM-DD")]
    InvalidDate {
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("Date range is empty: {from} is after {to}")]
    EmptyDateRange { from: String, to: String },

    #[error("Cannot start worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}
