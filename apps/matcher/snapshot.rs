use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::{
    document_store::DocumentStore,
    embeddings::Embedder,
    error::{MatchError, Result},
    records::DoctorRecord,
    vector_index::LabeledIndex,
};

/// One complete, internally consistent build of the doctor and speciality
/// indexes. Never mutated after construction.
#[derive(Debug, Clone)]
pub struct IndexSnapshot {
    pub doctors: LabeledIndex,
    pub specialities: LabeledIndex,
}

impl IndexSnapshot {
    pub fn empty(dimension: usize) -> Self {
        Self {
            doctors: LabeledIndex::empty(dimension),
            specialities: LabeledIndex::empty(dimension),
        }
    }

    pub fn dimension(&self) -> usize {
        self.doctors.dimension()
    }

    pub fn len(&self) -> usize {
        self.doctors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doctors.is_empty()
    }
}

/// Shared handle to the current snapshot.
///
/// Readers take a cheap `Arc` clone and keep using it for the whole request;
/// a rebuild replaces the pointer in one write, so nobody ever sees half of
/// a build.
#[derive(Clone)]
pub struct SnapshotHandle {
    current: Arc<RwLock<Arc<IndexSnapshot>>>,
}

impl SnapshotHandle {
    pub fn new(snapshot: IndexSnapshot) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(snapshot))),
        }
    }

    pub fn load(&self) -> Arc<IndexSnapshot> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn publish(&self, snapshot: IndexSnapshot) {
        let next = Arc::new(snapshot);
        *self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = next;
    }
}

/// Rebuilds the doctor snapshot from the document store.
pub struct SnapshotBuilder {
    store: Arc<dyn DocumentStore>,
    embedder: Arc<dyn Embedder>,
    handle: SnapshotHandle,
    collection: String,
    rebuild_lock: Mutex<()>,
}

impl SnapshotBuilder {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        embedder: Arc<dyn Embedder>,
        handle: SnapshotHandle,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            store,
            embedder,
            handle,
            collection: collection.into(),
            rebuild_lock: Mutex::new(()),
        }
    }

    pub fn handle(&self) -> &SnapshotHandle {
        &self.handle
    }

    /// Build a fresh snapshot and publish it. Returns the number of indexed
    /// doctors. On error the previously published snapshot stays in place.
    #[instrument(name = "rebuild_index", skip(self), fields(collection = %self.collection))]
    pub async fn rebuild(&self) -> Result<usize> {
        // Two concurrent rebuilds would race on publish order.
        let _guard = self.rebuild_lock.lock().await;

        let documents = self
            .store
            .fetch_all(&self.collection)
            .await
            .map_err(MatchError::Store)?;

        let records: Vec<DoctorRecord> = documents
            .iter()
            .filter_map(|doc| match DoctorRecord::from_document(doc) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(doc_id = %doc.id, error = %e, "Skipping malformed doctor document");
                    None
                }
            })
            .collect();

        let snapshot = self.build_snapshot(&records).await?;
        let count = snapshot.len();

        info!(
            doctors = count,
            specialities = snapshot.specialities.len(),
            skipped = documents.len() - records.len(),
            "Indexed doctors"
        );

        self.handle.publish(snapshot);
        Ok(count)
    }

    async fn build_snapshot(&self, records: &[DoctorRecord]) -> Result<IndexSnapshot> {
        let dimension = self.embedder.dimension();
        if records.is_empty() {
            return Ok(IndexSnapshot::empty(dimension));
        }

        let texts: Vec<String> = records.iter().map(DoctorRecord::composite_text).collect();
        let ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
        let vectors = self.embed(&texts).await?;
        let doctors = LabeledIndex::build(dimension, ids, vectors)?;

        let specialities = distinct_specialities(records);
        let specialities = if specialities.is_empty() {
            LabeledIndex::empty(dimension)
        } else {
            let vectors = self.embed(&specialities).await?;
            LabeledIndex::build(dimension, specialities, vectors)?
        };

        Ok(IndexSnapshot {
            doctors,
            specialities,
        })
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let vectors = self
            .embedder
            .embed_batch(texts)
            .await
            .map_err(into_match_error)?;

        if vectors.len() != texts.len() {
            return Err(MatchError::ConfigurationFault(format!(
                "embedder returned {} vectors for {} texts",
                vectors.len(),
                texts.len()
            )));
        }
        Ok(vectors)
    }
}

/// Recover a typed fault raised inside an embedder; anything else is a
/// provider failure.
pub(crate) fn into_match_error(err: anyhow::Error) -> MatchError {
    match err.downcast::<MatchError>() {
        Ok(fault) => fault,
        Err(other) => MatchError::Embedding(other),
    }
}

/// Distinct non-empty specialities in first-seen order.
fn distinct_specialities(records: &[DoctorRecord]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    records
        .iter()
        .map(|r| r.speciality.as_str())
        .filter(|s| !s.trim().is_empty())
        .filter(|s| seen.insert(*s))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{document_store::MemoryDocumentStore, embeddings::HashingEmbedder};
    use async_trait::async_trait;
    use serde_json::json;

    fn builder(store: Arc<MemoryDocumentStore>) -> SnapshotBuilder {
        let embedder = Arc::new(HashingEmbedder::new(64));
        SnapshotBuilder::new(
            store,
            embedder,
            SnapshotHandle::new(IndexSnapshot::empty(64)),
            "doctors",
        )
    }

    #[tokio::test]
    async fn test_rebuild_indexes_all_doctors() {
        let store = Arc::new(MemoryDocumentStore::new());
        store.upsert("doctors", "a", json!({"speciality": "Cardiology"}));
        store.upsert("doctors", "b", json!({"speciality": "Dermatology"}));
        store.upsert("doctors", "c", json!({"speciality": "cardiology"}));
        store.upsert("doctors", "d", json!({"speciality": ""}));

        let builder = builder(store);
        assert_eq!(builder.rebuild().await.unwrap(), 4);

        let snapshot = builder.handle().load();
        assert_eq!(snapshot.doctors.labels(), &["a", "b", "c", "d"]);
        // Labels are stored case-sensitively, empties dropped.
        assert_eq!(
            snapshot.specialities.labels(),
            &["Cardiology", "Dermatology", "cardiology"]
        );
    }

    #[tokio::test]
    async fn test_rebuild_empty_collection() {
        let builder = builder(Arc::new(MemoryDocumentStore::new()));
        assert_eq!(builder.rebuild().await.unwrap(), 0);
        let snapshot = builder.handle().load();
        assert!(snapshot.is_empty());
        assert!(snapshot.specialities.is_empty());
    }

    #[tokio::test]
    async fn test_rebuild_skips_malformed_documents() {
        let store = Arc::new(MemoryDocumentStore::new());
        store.upsert("doctors", "good", json!({"speciality": "ENT"}));
        store.upsert("doctors", "bad", json!({"languagesKnown": 42}));

        let builder = builder(store);
        assert_eq!(builder.rebuild().await.unwrap(), 1);
        assert_eq!(builder.handle().load().doctors.labels(), &["good"]);
    }

    #[tokio::test]
    async fn test_rebuild_is_idempotent() {
        let store = Arc::new(MemoryDocumentStore::new());
        store.upsert("doctors", "a", json!({"speciality": "Cardiology", "about": "heart"}));
        store.upsert("doctors", "b", json!({"speciality": "Dermatology", "about": "skin"}));
        let builder = builder(store);

        builder.rebuild().await.unwrap();
        let first = builder.handle().load();
        builder.rebuild().await.unwrap();
        let second = builder.handle().load();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(first.doctors.labels(), second.doctors.labels());

        let query = HashingEmbedder::new(64).embed_text("skin");
        assert_eq!(
            first.doctors.search(&query, 2).unwrap(),
            second.doctors.search(&query, 2).unwrap()
        );
    }

    #[tokio::test]
    async fn test_reader_keeps_old_snapshot_across_rebuild() {
        let store = Arc::new(MemoryDocumentStore::new());
        store.upsert("doctors", "a", json!({"speciality": "Cardiology"}));
        let builder = builder(store.clone());
        builder.rebuild().await.unwrap();

        let held = builder.handle().load();
        store.upsert("doctors", "b", json!({"speciality": "Dermatology"}));
        builder.rebuild().await.unwrap();

        assert_eq!(held.len(), 1);
        assert_eq!(builder.handle().load().len(), 2);
    }

    struct ShortEmbedder;

    #[async_trait]
    impl Embedder for ShortEmbedder {
        async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            Ok(texts.iter().skip(1).map(|_| vec![1.0; 4]).collect())
        }

        fn dimension(&self) -> usize {
            4
        }

        fn model_version(&self) -> &str {
            "short"
        }
    }

    #[tokio::test]
    async fn test_failed_rebuild_keeps_previous_snapshot() {
        let store = Arc::new(MemoryDocumentStore::new());
        store.upsert("doctors", "a", json!({"speciality": "Cardiology"}));
        let handle = SnapshotHandle::new(IndexSnapshot::empty(4));
        let builder = SnapshotBuilder::new(store, Arc::new(ShortEmbedder), handle.clone(), "doctors");

        let err = builder.rebuild().await.unwrap_err();
        assert!(err.is_fatal());
        assert!(handle.load().is_empty());
    }
}
