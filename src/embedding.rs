use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::hash::fingerprint;
use crate::scoring::normalize;
use crate::storage::models::ItemId;

pub const MAX_EMBEDDING_CHARS: usize = 512;

pub type Vector = Arc<[f32]>;

pub trait Embedder: Send + Sync {
    /// Embed normalized text. `None` means no embedding is available.
    fn embed(&self, text: &str) -> Option<Vec<f32>>;
}

pub struct NoEmbeddings;

impl Embedder for NoEmbeddings {
    fn embed(&self, _text: &str) -> Option<Vec<f32>> {
        None
    }
}

pub fn embedding_input(text: &str) -> String {
    let normalized = normalize(text);
    match normalized.char_indices().nth(MAX_EMBEDDING_CHARS) {
        Some((cut, _)) => normalized[..cut].to_string(),
        None => normalized,
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    fingerprint: u64,
    vector: Option<Vector>,
}

/// Memoizes one embedding per item, keyed by item id and validated by a
/// fingerprint of the embedding input. An absent vector is cached too.
pub struct EmbeddingCache {
    embedder: Arc<dyn Embedder>,
    entries: HashMap<ItemId, CacheEntry>,
}

impl EmbeddingCache {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            entries: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn vector_for(&mut self, text: &str, owner: Option<ItemId>) -> Option<Vector> {
        let input = embedding_input(text);
        let print = fingerprint(&input);

        if let Some(id) = owner
            && let Some(entry) = self.entries.get(&id)
            && entry.fingerprint == print
        {
            return entry.vector.clone();
        }

        let vector: Option<Vector> = self.embedder.embed(&input).map(Vector::from);
        if let Some(id) = owner {
            self.entries.insert(
                id,
                CacheEntry {
                    fingerprint: print,
                    vector: vector.clone(),
                },
            );
        }
        vector
    }

    pub fn prune(&mut self, valid_ids: &HashSet<ItemId>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|id, _| valid_ids.contains(id));
        before - self.entries.len()
    }
}

#[cfg(feature = "semantic")]
pub use fast::FastEmbedder;

#[cfg(feature = "semantic")]
mod fast {
    use std::path::PathBuf;
    use std::sync::Mutex;

    use fastembed::{InitOptions, TextEmbedding};
    use tracing::{info, warn};

    use super::Embedder;
    use crate::errors::{ClipError, Result};

    // Local embeddings through fastembed. `embed` needs `&mut`, hence the Mutex.
    pub struct FastEmbedder {
        model: Mutex<TextEmbedding>,
        name: String,
    }

    impl FastEmbedder {
        pub fn new(model_name: &str, models_dir: PathBuf) -> Result<Self> {
            let model = parse_model_name(model_name)?;
            std::fs::create_dir_all(&models_dir)?;
            let options = InitOptions::new(model)
                .with_cache_dir(models_dir)
                .with_show_download_progress(false);
            let embedding = TextEmbedding::try_new(options)
                .map_err(|e| ClipError::Worker(format!("embedding model init failed: {e}")))?;
            info!(model = model_name, "embedding model loaded");
            Ok(Self {
                model: Mutex::new(embedding),
                name: model_name.to_string(),
            })
        }

        pub fn name(&self) -> &str {
            &self.name
        }
    }

    impl Embedder for FastEmbedder {
        fn embed(&self, text: &str) -> Option<Vec<f32>> {
            let mut model = match self.model.lock() {
                Ok(model) => model,
                Err(e) => {
                    warn!(error = %e, "embedding model lock poisoned");
                    return None;
                }
            };
            match model.embed(vec![text], None) {
                Ok(embeddings) => embeddings.into_iter().next(),
                Err(e) => {
                    warn!(error = %e, "embedding failed");
                    None
                }
            }
        }
    }

    fn parse_model_name(name: &str) -> Result<fastembed::EmbeddingModel> {
        match name.to_lowercase().as_str() {
            "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
            "all-minilm-l6-v2-q" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2Q),
            "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
            "bge-small-en-v1.5-q" => Ok(fastembed::EmbeddingModel::BGESmallENV15Q),
            "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
            "bge-base-en-v1.5-q" => Ok(fastembed::EmbeddingModel::BGEBaseENV15Q),
            _ => Err(ClipError::InvalidInput(format!(
                "unknown embedding model {name}; supported: all-MiniLM-L6-v2, \
                 bge-small-en-v1.5, bge-base-en-v1.5 (add -q for quantized)"
            ))),
        }
    }

}
