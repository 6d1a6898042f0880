pub mod api;
pub mod config;
pub mod document_store;
pub mod embeddings;
pub mod error;
pub mod live;
pub mod ranking;
pub mod records;
pub mod snapshot;
pub mod vector_index;
