use anyhow::{Context, Result};
use serde::Serialize;
use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
};
use tokio::{
    fs::OpenOptions,
    io::{AsyncWrite, AsyncWriteExt, BufWriter},
    sync::mpsc,
};
use tracing::{debug, error, info, instrument};
use utils::errors::{LIVE_OUTPUT_OPEN_FAILED, LIVE_OUTPUT_WRITE_FAILED};

use super::{LiveEvent, LiveRow, RowKey};

/// Materialized view of every watched collection, keyed by
/// `(collection, doc_id)`.
#[derive(Debug, Default)]
pub struct LiveView {
    rows: HashMap<RowKey, LiveRow>,
}

impl LiveView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `row` if its key is new or its version differs from the stored
    /// one. Returns whether anything changed.
    pub fn apply_upsert(&mut self, row: LiveRow) -> bool {
        let key = row.key();
        if let Some(existing) = self.rows.get(&key) {
            if existing.version == row.version {
                return false;
            }
        }
        self.rows.insert(key, row);
        true
    }

    /// Drop rows of `collection` whose id is not in `doc_ids`. Returns the
    /// removed keys in sorted order.
    pub fn complete_cycle(&mut self, collection: &str, doc_ids: &[String]) -> Vec<RowKey> {
        let present: HashSet<&str> = doc_ids.iter().map(String::as_str).collect();
        let mut removed: Vec<RowKey> = self
            .rows
            .keys()
            .filter(|key| key.collection == collection && !present.contains(key.doc_id.as_str()))
            .cloned()
            .collect();
        removed.sort();

        for key in &removed {
            self.rows.remove(key);
        }
        removed
    }

    pub fn get(&self, collection: &str, doc_id: &str) -> Option<&LiveRow> {
        self.rows.get(&RowKey::new(collection, doc_id))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// One line of the JSONL change log.
#[derive(Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum Change<'a> {
    Upsert(&'a LiveRow),
    Delete {
        doc_id: &'a str,
        collection: &'a str,
    },
}

type ChangeWriter = BufWriter<Box<dyn AsyncWrite + Send + Unpin>>;

/// Drains poller events into a [`LiveView`] and appends each change to a
/// JSON Lines file.
///
/// The view is updated before the change line is written, so a failed write
/// costs a log line but never a view update.
pub struct LiveSink {
    path: PathBuf,
    writer: ChangeWriter,
    view: LiveView,
}

impl LiveSink {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("{LIVE_OUTPUT_OPEN_FAILED}: {}", path.display()))?;

        Ok(Self::with_writer(path, Box::new(file)))
    }

    /// Sink writing its change lines to `writer`; `path` only labels logs.
    pub fn with_writer(path: PathBuf, writer: Box<dyn AsyncWrite + Send + Unpin>) -> Self {
        Self {
            path,
            writer: BufWriter::new(writer),
            view: LiveView::new(),
        }
    }

    pub fn view(&self) -> &LiveView {
        &self.view
    }

    /// Handle one event, writing any resulting change lines.
    pub async fn apply(&mut self, event: LiveEvent) -> Result<()> {
        match event {
            LiveEvent::Upsert(row) => {
                let key = row.key();
                if self.view.apply_upsert(row) {
                    if let Some(stored) = self.view.get(&key.collection, &key.doc_id) {
                        let line = serde_json::to_string(&Change::Upsert(stored))?;
                        write_line(&mut self.writer, &line).await?;
                    }
                }
            }
            LiveEvent::CycleComplete {
                collection,
                doc_ids,
            } => {
                let removed = self.view.complete_cycle(&collection, &doc_ids);
                for key in &removed {
                    let line = serde_json::to_string(&Change::Delete {
                        doc_id: &key.doc_id,
                        collection: &key.collection,
                    })?;
                    write_line(&mut self.writer, &line).await?;
                }
                if !removed.is_empty() {
                    debug!(collection = %collection, removed = removed.len(), "Retracted rows");
                }
                self.writer
                    .flush()
                    .await
                    .context(LIVE_OUTPUT_WRITE_FAILED)?;
            }
        }
        Ok(())
    }

    /// Run until every sender is dropped, then flush and hand back the view.
    ///
    /// Write failures are logged and the loop keeps consuming events. Lines
    /// still buffered after a failed flush go out with the next one.
    #[instrument(name = "live_sink", skip(self, receiver), fields(path = %self.path.display()))]
    pub async fn run(mut self, mut receiver: mpsc::Receiver<LiveEvent>) -> Result<LiveView> {
        info!("Live sink started");
        let mut failed_writes = 0usize;
        while let Some(event) = receiver.recv().await {
            if let Err(e) = self.apply(event).await {
                failed_writes += 1;
                error!(error = ?e, failed_writes, "Failed to record live change");
            }
        }
        if let Err(e) = self.writer.flush().await {
            error!(error = %e, "{LIVE_OUTPUT_WRITE_FAILED}");
        }
        info!(rows = self.view.len(), failed_writes, "Live sink stopped");
        Ok(self.view)
    }
}

async fn write_line(writer: &mut ChangeWriter, line: &str) -> Result<()> {
    writer
        .write_all(line.as_bytes())
        .await
        .context(LIVE_OUTPUT_WRITE_FAILED)?;
    writer
        .write_all(b"\n")
        .await
        .context(LIVE_OUTPUT_WRITE_FAILED)?;
    Ok(())
}
