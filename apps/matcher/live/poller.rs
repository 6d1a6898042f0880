use std::{sync::Arc, time::Duration};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::{LiveEvent, LiveRow, RendererRegistry, content_version};
use crate::{
    document_store::DocumentStore,
    embeddings::Embedder,
    error::{MatchError, Result},
    snapshot::into_match_error,
    vector_index::l2_normalize,
};

/// Full re-snapshot poller for one collection.
///
/// Every cycle re-reads the entire collection and emits one upsert per
/// document plus a cycle-complete marker. Nothing is remembered between
/// cycles, so a cycle can be retried or repeated freely.
pub struct CollectionPoller {
    collection: String,
    store: Arc<dyn DocumentStore>,
    embedder: Arc<dyn Embedder>,
    renderers: Arc<RendererRegistry>,
    sender: mpsc::Sender<LiveEvent>,
    interval: Duration,
}

impl CollectionPoller {
    pub fn new(
        collection: impl Into<String>,
        store: Arc<dyn DocumentStore>,
        embedder: Arc<dyn Embedder>,
        renderers: Arc<RendererRegistry>,
        sender: mpsc::Sender<LiveEvent>,
        interval: Duration,
    ) -> Self {
        Self {
            collection: collection.into(),
            store,
            embedder,
            renderers,
            sender,
            interval,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Run one cycle. Returns the number of rows emitted.
    #[instrument(name = "poll_collection", skip(self), fields(collection = %self.collection))]
    pub async fn poll_once(&self) -> Result<usize> {
        let documents = self
            .store
            .fetch_all(&self.collection)
            .await
            .map_err(|source| MatchError::UpstreamFetch {
                collection: self.collection.clone(),
                source,
            })?;

        let mut rows: Vec<LiveRow> = documents
            .iter()
            .map(|doc| LiveRow {
                doc_id: doc.id.clone(),
                collection: self.collection.clone(),
                text: self.renderers.render(&self.collection, &doc.body),
                version: content_version(&doc.body),
                embedding: Vec::new(),
            })
            .collect();

        self.embed_rows(&mut rows).await?;

        let doc_ids: Vec<String> = rows.iter().map(|r| r.doc_id.clone()).collect();
        let emitted = rows.len();

        for row in rows {
            self.send(LiveEvent::Upsert(row)).await?;
        }
        self.send(LiveEvent::CycleComplete {
            collection: self.collection.clone(),
            doc_ids,
        })
        .await?;

        debug!(rows = emitted, "Reloaded collection");
        Ok(emitted)
    }

    /// One batch for the whole cycle; rows with empty text get a zero vector,
    /// the rest are L2-normalized like index vectors.
    async fn embed_rows(&self, rows: &mut [LiveRow]) -> Result<()> {
        let (pending, texts): (Vec<usize>, Vec<String>) = rows
            .iter()
            .enumerate()
            .filter(|(_, row)| !row.text.trim().is_empty())
            .map(|(i, row)| (i, row.text.clone()))
            .unzip();

        let embeddings = if texts.is_empty() {
            Vec::new()
        } else {
            self.embedder
                .embed_batch(&texts)
                .await
                .map_err(into_match_error)?
        };

        if embeddings.len() != texts.len() {
            return Err(MatchError::ConfigurationFault(format!(
                "embedder returned {} vectors for {} texts",
                embeddings.len(),
                texts.len()
            )));
        }

        for row in rows.iter_mut() {
            row.embedding = vec![0.0; self.embedder.dimension()];
        }
        for (i, mut embedding) in pending.into_iter().zip(embeddings) {
            l2_normalize(&mut embedding);
            rows[i].embedding = embedding;
        }
        Ok(())
    }

    async fn send(&self, event: LiveEvent) -> Result<()> {
        self.sender
            .send(event)
            .await
            .map_err(|_| MatchError::SinkClosed)
    }

    /// Poll until `cancel` fires or the sink goes away. Failed cycles are
    /// logged and retried after the normal interval.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            collection = %self.collection,
            interval_secs = self.interval.as_secs_f64(),
            "Starting collection poller"
        );

        loop {
            match self.poll_once().await {
                Ok(rows) => {
                    info!(collection = %self.collection, rows, "Reloaded collection");
                }
                Err(MatchError::SinkClosed) => {
                    warn!(collection = %self.collection, "Live sink closed, stopping poller");
                    return;
                }
                Err(e) => {
                    error!(
                        collection = %self.collection,
                        error = %e,
                        "Poll cycle failed, retrying next interval"
                    );
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(collection = %self.collection, "Poller cancelled");
                    return;
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}

/// Log each collection's size, then spawn one poller task per collection.
pub async fn spawn_pollers(
    collections: &[String],
    store: Arc<dyn DocumentStore>,
    embedder: Arc<dyn Embedder>,
    renderers: Arc<RendererRegistry>,
    sender: mpsc::Sender<LiveEvent>,
    interval: Duration,
    cancel: CancellationToken,
) -> Vec<JoinHandle<()>> {
    for collection in collections {
        match store.count(collection).await {
            Ok(count) => info!(collection = %collection, count, "Watching collection"),
            Err(e) => warn!(collection = %collection, error = %e, "Failed to count collection"),
        }
    }

    collections
        .iter()
        .map(|collection| {
            let poller = CollectionPoller::new(
                collection.clone(),
                Arc::clone(&store),
                Arc::clone(&embedder),
                Arc::clone(&renderers),
                sender.clone(),
                interval,
            );
            tokio::spawn(poller.run(cancel.child_token()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        document_store::{Document, MemoryDocumentStore},
        embeddings::HashingEmbedder,
    };
    use async_trait::async_trait;
    use serde_json::json;

    fn poller(
        collection: &str,
        store: Arc<dyn DocumentStore>,
        sender: mpsc::Sender<LiveEvent>,
    ) -> CollectionPoller {
        CollectionPoller::new(
            collection,
            store,
            Arc::new(HashingEmbedder::new(16)),
            Arc::new(RendererRegistry::default()),
            sender,
            Duration::from_millis(10),
        )
    }

    fn drain(receiver: &mut mpsc::Receiver<LiveEvent>) -> (Vec<LiveRow>, Vec<String>) {
        let mut rows = Vec::new();
        let mut completed = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            match event {
                LiveEvent::Upsert(row) => rows.push(row),
                LiveEvent::CycleComplete { doc_ids, .. } => completed = doc_ids,
            }
        }
        (rows, completed)
    }

    #[tokio::test]
    async fn test_poll_once_emits_versioned_rows() {
        let store = Arc::new(MemoryDocumentStore::new());
        store.upsert("reviews", "r1", json!({"user": "ana", "doctor": "rao", "content": "great"}));
        store.upsert("reviews", "r2", json!({"user": "bo", "doctor": "lee", "content": "ok"}));

        let (tx, mut rx) = mpsc::channel(16);
        let poller = poller("reviews", store, tx);
        assert_eq!(poller.poll_once().await.unwrap(), 2);

        let (rows, completed) = drain(&mut rx);
        assert_eq!(rows.len(), 2);
        assert_eq!(completed, vec!["r1", "r2"]);
        assert_eq!(rows[0].collection, "reviews");
        assert_eq!(rows[0].text, "Review by ana for rao: great");
        assert_eq!(rows[0].embedding.len(), 16);
        assert_eq!(rows[0].version.len(), 64);
    }

    #[tokio::test]
    async fn test_versions_track_document_changes() {
        let store = Arc::new(MemoryDocumentStore::new());
        store.upsert("doctors", "d1", json!({"name": "Dr. Rao", "fees": 40}));

        let (tx, mut rx) = mpsc::channel(16);
        let poller = poller("doctors", store.clone(), tx);

        poller.poll_once().await.unwrap();
        let first = drain(&mut rx).0.remove(0).version;
        poller.poll_once().await.unwrap();
        let second = drain(&mut rx).0.remove(0).version;
        assert_eq!(first, second);

        store.upsert("doctors", "d1", json!({"name": "Dr. Rao", "fees": 45}));
        poller.poll_once().await.unwrap();
        let third = drain(&mut rx).0.remove(0).version;
        assert_ne!(first, third);
    }

    #[tokio::test]
    async fn test_empty_text_gets_zero_vector() {
        fn blank(_: &serde_json::Value) -> String {
            String::new()
        }
        let mut renderers = RendererRegistry::default();
        renderers.register("notes", blank);

        let store = Arc::new(MemoryDocumentStore::new());
        store.upsert("notes", "n1", json!({"x": 1}));

        let (tx, mut rx) = mpsc::channel(16);
        let poller = CollectionPoller::new(
            "notes",
            store,
            Arc::new(HashingEmbedder::new(8)),
            Arc::new(renderers),
            tx,
            Duration::from_millis(10),
        );
        poller.poll_once().await.unwrap();
        let rows = drain(&mut rx).0;
        assert_eq!(rows[0].embedding, vec![0.0; 8]);
    }

    /// Returns the same unnormalized vector for every text.
    struct ScaledEmbedder;

    #[async_trait]
    impl Embedder for ScaledEmbedder {
        async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![3.0, 4.0]).collect())
        }

        fn dimension(&self) -> usize {
            2
        }

        fn model_version(&self) -> &str {
            "scaled"
        }
    }

    #[tokio::test]
    async fn test_row_embeddings_are_unit_length() {
        let store = Arc::new(MemoryDocumentStore::new());
        store.upsert("users", "u1", json!({"name": "Ana", "email": "a@x.io"}));

        let (tx, mut rx) = mpsc::channel(16);
        let poller = CollectionPoller::new(
            "users",
            store,
            Arc::new(ScaledEmbedder),
            Arc::new(RendererRegistry::default()),
            tx,
            Duration::from_millis(10),
        );
        poller.poll_once().await.unwrap();

        let rows = drain(&mut rx).0;
        assert!((rows[0].embedding[0] - 0.6).abs() < 1e-6);
        assert!((rows[0].embedding[1] - 0.8).abs() < 1e-6);
    }

    struct FailingStore;

    #[async_trait]
    impl DocumentStore for FailingStore {
        async fn fetch_all(&self, _collection: &str) -> anyhow::Result<Vec<Document>> {
            anyhow::bail!("connection refused")
        }

        async fn find_by_id(&self, _: &str, _: &str) -> anyhow::Result<Option<Document>> {
            anyhow::bail!("connection refused")
        }

        async fn count(&self, _: &str) -> anyhow::Result<u64> {
            anyhow::bail!("connection refused")
        }
    }

    #[tokio::test]
    async fn test_fetch_failure_is_upstream_error() {
        let (tx, _rx) = mpsc::channel(16);
        let poller = poller("users", Arc::new(FailingStore), tx);
        let err = poller.poll_once().await.unwrap_err();
        assert!(matches!(err, MatchError::UpstreamFetch { ref collection, .. } if collection == "users"));
    }

    #[tokio::test]
    async fn test_closed_sink_stops_poller() {
        let store = Arc::new(MemoryDocumentStore::new());
        store.upsert("users", "u1", json!({"name": "Ana"}));
        let (tx, rx) = mpsc::channel(16);
        drop(rx);

        let poller = poller("users", store, tx);
        assert!(matches!(poller.poll_once().await, Err(MatchError::SinkClosed)));
        // `run` must return on its own instead of looping forever.
        tokio::time::timeout(Duration::from_secs(5), poller.run(CancellationToken::new()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_failing_collection_does_not_stop_others() {
        let good: Arc<dyn DocumentStore> = {
            let store = MemoryDocumentStore::new();
            store.upsert("users", "u1", json!({"name": "Ana"}));
            Arc::new(store)
        };
        let (tx, mut rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();

        let bad = tokio::spawn(poller("users", Arc::new(FailingStore), tx.clone()).run(cancel.clone()));
        let ok = tokio::spawn(poller("users", good, tx).run(cancel.clone()));

        // Two complete cycles from the healthy poller.
        let mut cycles = 0;
        while cycles < 2 {
            match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap() {
                Some(LiveEvent::CycleComplete { .. }) => cycles += 1,
                Some(LiveEvent::Upsert(_)) => {}
                None => panic!("channel closed early"),
            }
        }

        cancel.cancel();
        bad.await.unwrap();
        ok.await.unwrap();
    }
}
