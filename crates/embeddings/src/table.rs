use crate::DataLoadError;
use common::geometry::l2_norm;
use serde_json::Value;
use std::path::Path;
use tracing::{debug, info, warn};

/// Output width of the recognizer.
pub const DEFAULT_EMBEDDING_DIM: usize = 1280;

/// One reference vector with its L2 norm computed at load time.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceEmbedding {
    values: Vec<f32>,
    norm: f32,
}

impl ReferenceEmbedding {
    pub fn new(values: Vec<f32>) -> Self {
        let norm = l2_norm(&values);
        Self { values, norm }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn norm(&self) -> f32 {
        self.norm
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Category {
    name: String,
    embeddings: Vec<ReferenceEmbedding>,
}

impl Category {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn embeddings(&self) -> &[ReferenceEmbedding] {
        &self.embeddings
    }
}

/// Read-only mapping from category name to its reference embeddings.
///
/// Categories keep the order in which they appear in the source document,
/// which is also the order the matcher scans them in. Every stored vector has
/// exactly [`ReferenceTable::dimension`] elements.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceTable {
    dimension: usize,
    categories: Vec<Category>,
}

impl ReferenceTable {
    /// Load a `{ "category": [[f32; dim], ...], ... }` document from disk.
    pub fn load(path: impl AsRef<Path>, dimension: usize) -> Result<Self, DataLoadError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| DataLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let table = Self::from_json_str(&text, dimension)?;
        info!(
            path = %path.display(),
            categories = table.category_count(),
            embeddings = table.embedding_count(),
            "Reference table loaded"
        );
        Ok(table)
    }

    /// Parse a reference document. Malformed or wrongly sized entries are
    /// skipped with a warning; a document with nothing usable is an error.
    pub fn from_json_str(text: &str, dimension: usize) -> Result<Self, DataLoadError> {
        let root: Value = serde_json::from_str(text)?;
        let Value::Object(entries) = root else {
            return Err(DataLoadError::NotAnObject);
        };

        let mut categories = Vec::with_capacity(entries.len());
        for (name, value) in entries {
            let Value::Array(items) = value else {
                warn!(category = %name, "Category value is not an array, skipping");
                continue;
            };

            let vectors = items
                .iter()
                .enumerate()
                .filter_map(|(index, item)| match parse_vector(item) {
                    Some(v) => Some(v),
                    None => {
                        warn!(category = %name, index, "Malformed embedding, skipping");
                        None
                    }
                })
                .collect();

            if let Some(category) = build_category(name, vectors, dimension) {
                categories.push(category);
            }
        }

        if categories.is_empty() {
            return Err(DataLoadError::Empty { dimension });
        }

        Ok(Self {
            dimension,
            categories,
        })
    }

    /// Build a table in memory. Unlike the loaders this accepts an empty
    /// result.
    pub fn from_categories<I, S>(dimension: usize, categories: I) -> Self
    where
        I: IntoIterator<Item = (S, Vec<Vec<f32>>)>,
        S: Into<String>,
    {
        let categories = categories
            .into_iter()
            .filter_map(|(name, vectors)| build_category(name.into(), vectors, dimension))
            .collect();

        Self {
            dimension,
            categories,
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn category_count(&self) -> usize {
        self.categories.len()
    }

    pub fn embedding_count(&self) -> usize {
        self.categories.iter().map(|c| c.embeddings.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    /// Every `(category, embedding)` pair in scan order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ReferenceEmbedding)> {
        self.categories
            .iter()
            .flat_map(|c| c.embeddings.iter().map(move |e| (c.name.as_str(), e)))
    }
}

fn parse_vector(value: &Value) -> Option<Vec<f32>> {
    value
        .as_array()?
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32))
        .collect()
}

fn build_category(name: String, vectors: Vec<Vec<f32>>, dimension: usize) -> Option<Category> {
    let mut embeddings = Vec::with_capacity(vectors.len());
    for (index, values) in vectors.into_iter().enumerate() {
        if values.len() != dimension {
            warn!(
                category = %name,
                index,
                expected = dimension,
                actual = values.len(),
                "Embedding size mismatch, skipping"
            );
            continue;
        }

        let embedding = ReferenceEmbedding::new(values);
        if embedding.norm == 0.0 {
            warn!(category = %name, index, "Zero-norm reference embedding will never match");
        }
        embeddings.push(embedding);
    }

    if embeddings.is_empty() {
        warn!(category = %name, "No valid embeddings, dropping category");
        return None;
    }

    debug!(category = %name, embeddings = embeddings.len(), "Category loaded");
    Some(Category { name, embeddings })
}
