use anyhow::{Context, Result};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::Arc;
use tracing::{debug, info};
use utils::errors::{EMBEDDING_REQUEST_FAILED, EMBEDDING_RESPONSE_INVALID};

use super::Embedder;
use crate::error::MatchError;

/// Output width of all-MiniLM-L6-v2.
pub const LOCAL_MODEL_DIMENSION: usize = 384;

/// In-process embeddings with all-MiniLM-L6-v2 through fastembed.
pub struct LocalEmbedder {
    model: Arc<TextEmbedding>,
    batch_size: usize,
}

impl LocalEmbedder {
    pub fn with_config(dimension: usize, batch_size: usize) -> Result<Self> {
        if dimension != LOCAL_MODEL_DIMENSION {
            return Err(MatchError::ConfigurationFault(format!(
                "all-MiniLM-L6-v2 produces {LOCAL_MODEL_DIMENSION}-dimensional vectors, configured {dimension}"
            ))
            .into());
        }

        info!(batch_size, "Initializing local embedding model...");
        let model = TextEmbedding::try_new(
            InitOptions::new(EmbeddingModel::AllMiniLML6V2).with_show_download_progress(true),
        )
        .context("Failed to initialize embedding model")?;
        info!("Local embedding model initialized");

        Ok(Self {
            model: Arc::new(model),
            batch_size: batch_size.max(1),
        })
    }
}

#[async_trait]
impl Embedder for LocalEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        debug!(count = texts.len(), "Generating local embeddings");
        let model = self.model.clone();
        let batch = texts.to_vec();
        let batch_size = self.batch_size;
        let embeddings = tokio::task::spawn_blocking(move || model.embed(batch, Some(batch_size)))
            .await
            .context(EMBEDDING_REQUEST_FAILED)?
            .context(EMBEDDING_REQUEST_FAILED)?;

        if embeddings.len() != texts.len() {
            return Err(MatchError::ConfigurationFault(format!(
                "{EMBEDDING_RESPONSE_INVALID}: expected {} embeddings, got {}",
                texts.len(),
                embeddings.len()
            ))
            .into());
        }

        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        LOCAL_MODEL_DIMENSION
    }

    fn model_version(&self) -> &str {
        "fastembed/all-MiniLM-L6-v2"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrong_dimension_is_rejected_before_download() {
        let err = LocalEmbedder::with_config(768, 32).err().unwrap();
        assert!(err.downcast_ref::<MatchError>().unwrap().is_fatal());
    }
}
