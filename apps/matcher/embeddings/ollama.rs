use anyhow::{Context, Result};
use async_trait::async_trait;
use ollama_rs::{Ollama, generation::embeddings::request::GenerateEmbeddingsRequest};
use reqwest::Url;
use tracing::{debug, info};
use utils::errors::{EMBEDDING_REQUEST_FAILED, EMBEDDING_RESPONSE_INVALID};

use super::Embedder;
use crate::error::MatchError;

const DEFAULT_PORT: u16 = 11434;

/// Embeddings from an Ollama server.
pub struct OllamaEmbedder {
    client: Ollama,
    model: String,
    dimension: usize,
    batch_size: usize,
}

/// Split `host` into the base URL and port `Ollama::new` expects. A missing
/// scheme means `http`, a missing port means Ollama's default.
fn split_host(host: &str) -> Result<(String, u16)> {
    // Ensure host has a protocol prefix
    let host = if !host.starts_with("http://") && !host.starts_with("https://") {
        format!("http://{host}")
    } else {
        host.to_string()
    };
    let url = Url::parse(&host).with_context(|| format!("Invalid Ollama host '{host}'"))?;
    let name = url
        .host_str()
        .with_context(|| format!("Ollama host '{host}' has no host name"))?;
    Ok((
        format!("{}://{}", url.scheme(), name),
        url.port().unwrap_or(DEFAULT_PORT),
    ))
}

impl OllamaEmbedder {
    pub fn with_config(host: &str, model: String, dimension: usize, batch_size: usize) -> Result<Self> {
        let (host, port) = split_host(host)?;

        info!(
            host = %host,
            port,
            model = %model,
            dimension,
            batch_size,
            "Initializing Ollama embedder"
        );

        Ok(Self {
            client: Ollama::new(host, port),
            model,
            dimension,
            batch_size: batch_size.max(1),
        })
    }

    async fn embed_chunk(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = GenerateEmbeddingsRequest::new(self.model.clone(), texts.to_vec().into());

        let response = self
            .client
            .generate_embeddings(request)
            .await
            .context(EMBEDDING_REQUEST_FAILED)?;

        if response.embeddings.len() != texts.len() {
            return Err(MatchError::ConfigurationFault(format!(
                "{EMBEDDING_RESPONSE_INVALID}: expected {} embeddings, got {}",
                texts.len(),
                response.embeddings.len()
            ))
            .into());
        }

        if let Some(bad) = response.embeddings.iter().find(|e| e.len() != self.dimension) {
            return Err(MatchError::DimensionMismatch {
                expected: self.dimension,
                actual: bad.len(),
            }
            .into());
        }

        Ok(response.embeddings)
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    /// Embeds the whole batch, split into `batch_size` requests.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let mut all_embeddings = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            debug!(count = chunk.len(), "Requesting embeddings");
            all_embeddings.extend(self.embed_chunk(chunk).await?);
        }

        Ok(all_embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_version(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_embed_batch() {
        let mut server = Server::new_async().await;
        let embedder = OllamaEmbedder::with_config(&server.url(), "all-minilm".into(), 3, 8).unwrap();

        let mock = server
            .mock("POST", "/api/embed")
            .match_body(Matcher::PartialJson(json!({
                "model": "all-minilm",
                "input": ["skin rash", "chest pain"],
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"embeddings": [[0.1, 0.2, 0.3], [0.4, 0.5, 0.6]]}"#)
            .create_async()
            .await;

        let embeddings = embedder
            .embed_batch(&texts(&["skin rash", "chest pain"]))
            .await
            .unwrap();

        assert_eq!(embeddings.len(), 2);
        assert_eq!(embeddings[1], vec![0.4, 0.5, 0.6]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_embed_batch_splits_into_chunks() {
        let mut server = Server::new_async().await;
        let embedder = OllamaEmbedder::with_config(&server.url(), "m".into(), 2, 2).unwrap();

        let mock = server
            .mock("POST", "/api/embed")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"embeddings": [[1.0, 0.0], [0.0, 1.0]]}"#)
            .expect(2)
            .create_async()
            .await;

        let embeddings = embedder
            .embed_batch(&texts(&["a", "b", "c", "d"]))
            .await
            .unwrap();

        assert_eq!(embeddings.len(), 4);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_empty_batch_makes_no_request() {
        let server = Server::new_async().await;
        let embedder = OllamaEmbedder::with_config(&server.url(), "m".into(), 2, 2).unwrap();
        assert!(embedder.embed_batch(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_configuration_fault() {
        let mut server = Server::new_async().await;
        let embedder = OllamaEmbedder::with_config(&server.url(), "m".into(), 4, 8).unwrap();

        server
            .mock("POST", "/api/embed")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"embeddings": [[0.1, 0.2, 0.3]]}"#)
            .create_async()
            .await;

        let err = embedder.embed_batch(&texts(&["x"])).await.unwrap_err();
        let fault = err.downcast_ref::<MatchError>().unwrap();
        assert!(fault.is_fatal());
    }

    #[tokio::test]
    async fn test_count_mismatch_is_configuration_fault() {
        let mut server = Server::new_async().await;
        let embedder = OllamaEmbedder::with_config(&server.url(), "m".into(), 2, 8).unwrap();

        server
            .mock("POST", "/api/embed")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"embeddings": [[0.1, 0.2]]}"#)
            .create_async()
            .await;

        let err = embedder.embed_batch(&texts(&["x", "y"])).await.unwrap_err();
        let fault = err.downcast_ref::<MatchError>().unwrap();
        assert!(matches!(fault, MatchError::ConfigurationFault(_)));
        assert!(fault.is_fatal());
    }

    #[tokio::test]
    async fn test_server_error_propagates() {
        let mut server = Server::new_async().await;
        let embedder = OllamaEmbedder::with_config(&server.url(), "m".into(), 2, 8).unwrap();

        server
            .mock("POST", "/api/embed")
            .with_status(500)
            .create_async()
            .await;

        let err = embedder.embed_batch(&texts(&["x"])).await.unwrap_err();
        assert!(err.to_string().contains(EMBEDDING_REQUEST_FAILED));
        assert!(err.downcast_ref::<MatchError>().is_none());
    }

    #[test]
    fn test_split_host() {
        assert_eq!(
            split_host("localhost:11434/").unwrap(),
            ("http://localhost".to_string(), 11434)
        );
        assert_eq!(
            split_host("https://ollama.internal").unwrap(),
            ("https://ollama.internal".to_string(), 11434)
        );
        assert_eq!(
            split_host("http://127.0.0.1:9000").unwrap(),
            ("http://127.0.0.1".to_string(), 9000)
        );
        assert!(split_host("http://").is_err());
    }

    #[test]
    fn test_batch_size_is_at_least_one() {
        let embedder = OllamaEmbedder::with_config("localhost", "m".into(), 2, 0).unwrap();
        assert_eq!(embedder.batch_size, 1);
    }
}
