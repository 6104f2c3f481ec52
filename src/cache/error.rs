use polars::error::PolarsError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("No cached weather files found in '{0}'")]
    CacheEmpty(PathBuf),

    #[error("Failed to determine cache directory")]
    CacheDirResolution,

    #[error("Cache path '{0}' exists but is not a directory")]
    NotADirectory(PathBuf),

    #[error("Failed to create cache directory '{0}'")]
    CacheDirCreation(PathBuf, #[source] std::io::Error),

    #[error("Failed to list cache directory '{0}'")]
    DirectoryRead(PathBuf, #[source] std::io::Error),

    #[error("Failed to read cache file '{0}'")]
    CacheRead(PathBuf, #[source] std::io::Error),

    #[error("Failed to write cache file '{0}'")]
    CacheWrite(PathBuf, #[source] std::io::Error),

    #[error("Parsing error reading weather rows from '{path}'")]
    CsvReadPolars {
        path: PathBuf,
        #[source]
        source: PolarsError,
    },

    #[error("Encoding error writing weather rows to '{path}'")]
    CsvWritePolars {
        path: PathBuf,
        #[source]
        source: PolarsError,
    },

    #[error("Failed to build weather frame: {0}")]
    DataFrameProcessing(#[from] PolarsError),

    #[error("Missing required column '{column}' in '{path}'")]
    MissingColumn { path: PathBuf, column: String },

    #[error("Malformed site header in '{path}': {message}")]
    MalformedHeader { path: PathBuf, message: String },

    #[error("Unparseable date '{value}' in '{path}'")]
    InvalidDate { path: PathBuf, value: String },
}
