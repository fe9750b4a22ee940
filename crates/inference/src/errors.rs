use crate::session::SessionState;
use preprocess::PreprocessError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("{model} session is not ready (state: {state})")]
    NotReady { model: String, state: SessionState },

    #[error("Failed to read {model} model {path}: {source}")]
    Io {
        model: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to load {model} model: {source}")]
    Load {
        model: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{model} inference failed: {source}")]
    Execution {
        model: String,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Invalid detector output shape {actual:?}, expected (1, 4 + classes, proposals)")]
    InvalidOutputShape { actual: Vec<usize> },

    #[error("{model} produced no output tensor")]
    MissingOutput { model: String },

    #[error("Embedding size mismatch: expected {expected}, got {actual}")]
    EmbeddingSize { expected: usize, actual: usize },
}
