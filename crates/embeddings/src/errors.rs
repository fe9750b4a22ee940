use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataLoadError {
    #[error("Failed to read reference table {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse reference table: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Reference table root must be a JSON object")]
    NotAnObject,

    #[error("Reference table contains no valid embeddings of dimension {dimension}")]
    Empty { dimension: usize },
}
