use anyhow::{Context, Result};
use async_trait::async_trait;
use sea_orm::{DatabaseBackend, DatabaseConnection, FromQueryResult, Statement};
use serde_json::Value;
use std::{
    collections::{BTreeMap, HashMap},
    sync::RwLock,
    time::Duration,
};
use tracing::{debug, info, instrument};
use utils::errors::{
    DATABASE_CONNECTION_FAILED, DATABASE_COUNT_DOCUMENTS_FAILED, DATABASE_FETCH_DOCUMENT_FAILED,
    DATABASE_FETCH_DOCUMENTS_FAILED,
};

/// A raw document as held by the external store.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub body: Value,
}

/// Read-only view of the external document collections.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Every document in `collection`, in a stable order.
    async fn fetch_all(&self, collection: &str) -> Result<Vec<Document>>;

    /// Point lookup; `None` when the id does not exist.
    async fn find_by_id(&self, collection: &str, id: &str) -> Result<Option<Document>>;

    async fn count(&self, collection: &str) -> Result<u64>;
}

#[derive(Debug, FromQueryResult)]
struct DocumentRow {
    id: String,
    body: Value,
}

#[derive(Debug, FromQueryResult)]
struct CountRow {
    count: i64,
}

/// Postgres-backed store over `public.document(collection, id, body jsonb)`.
pub struct PgDocumentStore {
    db: DatabaseConnection,
}

impl PgDocumentStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let mut opt = sea_orm::ConnectOptions::new(database_url.to_string());
        opt.max_connections(max_connections)
            .min_connections(1)
            .connect_timeout(Duration::from_secs(15))
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(5 * 60))
            .max_lifetime(Duration::from_secs(30 * 60))
            .sqlx_logging(false);

        let db = sea_orm::Database::connect(opt)
            .await
            .context(DATABASE_CONNECTION_FAILED)?;

        info!(max_connections, "Document store connected");
        Ok(Self::new(db))
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn fetch_all(&self, collection: &str) -> Result<Vec<Document>> {
        let stmt = Statement::from_sql_and_values(
            DatabaseBackend::Postgres,
            r#"
            SELECT id, body
            FROM public.document
            WHERE collection = $1
            ORDER BY id
            "#,
            vec![collection.into()],
        );

        let rows = DocumentRow::find_by_statement(stmt)
            .all(&self.db)
            .await
            .with_context(|| format!("{DATABASE_FETCH_DOCUMENTS_FAILED}: {collection}"))?;

        debug!(collection, rows = rows.len(), "Fetched collection");

        Ok(rows
            .into_iter()
            .map(|r| Document {
                id: r.id,
                body: r.body,
            })
            .collect())
    }

    async fn find_by_id(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let stmt = Statement::from_sql_and_values(
            DatabaseBackend::Postgres,
            r#"
            SELECT id, body
            FROM public.document
            WHERE collection = $1 AND id = $2
            "#,
            vec![collection.into(), id.into()],
        );

        let row = DocumentRow::find_by_statement(stmt)
            .one(&self.db)
            .await
            .with_context(|| format!("{DATABASE_FETCH_DOCUMENT_FAILED}: {collection}/{id}"))?;

        Ok(row.map(|r| Document {
            id: r.id,
            body: r.body,
        }))
    }

    async fn count(&self, collection: &str) -> Result<u64> {
        let stmt = Statement::from_sql_and_values(
            DatabaseBackend::Postgres,
            "SELECT COUNT(*) AS count FROM public.document WHERE collection = $1",
            vec![collection.into()],
        );

        let row = CountRow::find_by_statement(stmt)
            .one(&self.db)
            .await
            .with_context(|| format!("{DATABASE_COUNT_DOCUMENTS_FAILED}: {collection}"))?;

        Ok(row.map(|r| r.count.max(0) as u64).unwrap_or(0))
    }
}

/// In-process store. Handy for local runs and for exercising the service
/// without a database.
#[derive(Default)]
pub struct MemoryDocumentStore {
    collections: RwLock<HashMap<String, BTreeMap<String, Value>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a document.
    pub fn upsert(&self, collection: &str, id: &str, body: Value) {
        let mut collections = self
            .collections
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), body);
    }

    pub fn remove(&self, collection: &str, id: &str) -> Option<Value> {
        let mut collections = self
            .collections
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        collections.get_mut(collection)?.remove(id)
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn fetch_all(&self, collection: &str) -> Result<Vec<Document>> {
        let collections = self
            .collections
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, body)| Document {
                        id: id.clone(),
                        body: body.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn find_by_id(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let collections = self
            .collections
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|body| Document {
                id: id.to_string(),
                body: body.clone(),
            }))
    }

    async fn count(&self, collection: &str) -> Result<u64> {
        let collections = self
            .collections
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(collections.get(collection).map_or(0, |docs| docs.len() as u64))
    }
}
