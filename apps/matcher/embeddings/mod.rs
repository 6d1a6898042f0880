//! Embedding providers
//!
//! This module provides:
//! - the `Embedder` seam the index builder, ranking and pollers embed through
//! - an Ollama client for model-backed embeddings
//! - an in-process all-MiniLM-L6-v2 model (`local-embeddings` feature)
//! - a deterministic feature-hashing embedder for offline runs

mod hashing;
#[cfg(feature = "local-embeddings")]
mod local;
mod ollama;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{EmbeddingConfig, EmbeddingProvider};

pub use hashing::HashingEmbedder;
#[cfg(feature = "local-embeddings")]
pub use local::LocalEmbedder;
pub use ollama::OllamaEmbedder;

/// Maps text to fixed-dimension vectors.
///
/// Implementations must be deterministic for a given configuration and
/// return exactly one vector of `dimension()` values per input text.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn dimension(&self) -> usize;

    fn model_version(&self) -> &str;
}

/// Build the embedder selected by configuration.
pub fn from_config(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    Ok(match config.provider {
        EmbeddingProvider::Ollama => Arc::new(OllamaEmbedder::with_config(
            &config.host,
            config.model.clone(),
            config.dimension,
            config.batch_size,
        )?),
        EmbeddingProvider::Fastembed => local_embedder(config)?,
        EmbeddingProvider::Hashing => Arc::new(HashingEmbedder::new(config.dimension)),
    })
}

#[cfg(feature = "local-embeddings")]
fn local_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    Ok(Arc::new(LocalEmbedder::with_config(
        config.dimension,
        config.batch_size,
    )?))
}

#[cfg(not(feature = "local-embeddings"))]
fn local_embedder(_config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    Err(crate::error::MatchError::ConfigurationFault(
        "embedding provider 'fastembed' requires the local-embeddings feature".to_string(),
    )
    .into())
}
