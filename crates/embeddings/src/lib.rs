//! Reference embedding table and nearest-category matching for the
//! recognition stage.

pub mod errors;
pub mod matcher;
pub mod table;

pub use errors::DataLoadError;
pub use matcher::{DEFAULT_EARLY_STOP, DEFAULT_MATCH_THRESHOLD, EmbeddingMatcher, MatchResult, UNKNOWN_LABEL};
pub use table::{Category, DEFAULT_EMBEDDING_DIM, ReferenceEmbedding, ReferenceTable};
