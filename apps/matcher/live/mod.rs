//! Live re-indexing of the watched collections.
//!
//! Each collection gets a [`poller::CollectionPoller`] that re-reads the
//! whole collection every interval and pushes versioned rows down a bounded
//! channel. A single [`sink::LiveSink`] drains that channel, keeps the
//! materialized [`sink::LiveView`] and appends every change to a JSON Lines
//! file. The pollers keep no state between cycles; change detection is the
//! sink's job, keyed on `(collection, doc_id)` and the content version.

pub mod poller;
pub mod renderers;
pub mod sink;
pub mod version;

use serde::{Deserialize, Serialize};

pub use poller::{CollectionPoller, spawn_pollers};
pub use renderers::RendererRegistry;
pub use sink::{LiveSink, LiveView};
pub use version::content_version;

/// One versioned, embedded document as produced by a poll cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveRow {
    pub doc_id: String,
    pub collection: String,
    pub text: String,
    pub version: String,
    pub embedding: Vec<f32>,
}

impl LiveRow {
    /// Identity of the row across all collections.
    pub fn key(&self) -> RowKey {
        RowKey::new(&self.collection, &self.doc_id)
    }
}

/// `(collection, doc_id)`; ids from different collections never alias.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowKey {
    pub collection: String,
    pub doc_id: String,
}

impl RowKey {
    pub fn new(collection: &str, doc_id: &str) -> Self {
        Self {
            collection: collection.to_string(),
            doc_id: doc_id.to_string(),
        }
    }
}

/// Messages from pollers to the sink.
#[derive(Debug, Clone)]
pub enum LiveEvent {
    Upsert(LiveRow),
    /// A cycle finished; `doc_ids` is everything the collection held.
    CycleComplete {
        collection: String,
        doc_ids: Vec<String>,
    },
}
