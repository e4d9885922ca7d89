//! Error types and load result structures for the rule file loader.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A rule failed structural validation, or a file repeats a rule id.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Notify watcher error: {0}")]
    Notify(#[from] notify::Error),
}

pub type Result<T> = std::result::Result<T, LoaderError>;

/// Outcome of loading a single rule file.
#[derive(Debug)]
pub struct LoadResult {
    pub path: PathBuf,
    pub status: LoadStatus,
}

#[derive(Debug, PartialEq)]
pub enum LoadStatus {
    /// Every rule in the file was upserted.
    Loaded { rule_ids: Vec<String> },
    /// File was skipped (dotfile, non-YAML, etc.).
    Skipped { reason: String },
    /// Parse or validation error; nothing from this file was applied.
    Failed { error: String },
}
