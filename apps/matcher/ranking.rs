use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::{
    document_store::DocumentStore,
    embeddings::Embedder,
    error::{MatchError, Result},
    records::DoctorRecord,
    snapshot::{SnapshotHandle, into_match_error},
    vector_index::l2_normalize,
};

pub const INSURANCE_MISMATCH_PENALTY: f64 = 0.2;
pub const LANGUAGE_MATCH_BONUS: f64 = 0.1;
pub const LANGUAGE_MISMATCH_PENALTY: f64 = 0.1;
pub const CATEGORY_MATCH_BONUS: f64 = 0.3;

/// Caller preferences attached to a match request.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Preferences {
    #[serde(default)]
    pub insurance: Option<String>,
    #[serde(default)]
    pub languages: Vec<String>,
}

impl Preferences {
    /// Requested insurance, if any. Blank counts as unset.
    fn insurance(&self) -> Option<&str> {
        self.insurance
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredDoctor {
    pub doctor_id: String,
    pub name: String,
    pub speciality: String,
    #[serde(rename = "languagesKnown")]
    pub languages_known: Vec<String>,
    #[serde(rename = "acceptedInsurances")]
    pub accepted_insurances: Vec<String>,
    pub score: f64,
}

pub fn insurance_adjustment(record: &DoctorRecord, prefs: &Preferences) -> f64 {
    match prefs.insurance() {
        Some(wanted) if !record.accepted_insurances.iter().any(|i| i == wanted) => {
            -INSURANCE_MISMATCH_PENALTY
        }
        _ => 0.0,
    }
}

pub fn language_adjustment(record: &DoctorRecord, prefs: &Preferences) -> f64 {
    if prefs.languages.is_empty() {
        return 0.0;
    }
    let overlap = prefs
        .languages
        .iter()
        .any(|wanted| record.languages_known.contains(wanted));
    if overlap {
        LANGUAGE_MATCH_BONUS
    } else {
        -LANGUAGE_MISMATCH_PENALTY
    }
}

pub fn category_adjustment(record: &DoctorRecord, predicted: Option<&str>) -> f64 {
    match predicted {
        Some(category) if category.to_lowercase() == record.speciality.to_lowercase() => {
            CATEGORY_MATCH_BONUS
        }
        _ => 0.0,
    }
}

/// Base similarity plus every preference adjustment, unrounded.
pub fn adjust_score(
    base: f64,
    record: &DoctorRecord,
    prefs: &Preferences,
    predicted: Option<&str>,
) -> f64 {
    base + insurance_adjustment(record, prefs)
        + language_adjustment(record, prefs)
        + category_adjustment(record, predicted)
}

pub fn round3(score: f64) -> f64 {
    (score * 1000.0).round() / 1000.0
}

/// Hybrid ranking over the current snapshot: vector similarity, one
/// predicted speciality, then rule-based adjustments.
pub struct RankingEngine {
    store: Arc<dyn DocumentStore>,
    embedder: Arc<dyn Embedder>,
    handle: SnapshotHandle,
    collection: String,
    default_top_k: usize,
    max_top_k: usize,
}

impl RankingEngine {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        embedder: Arc<dyn Embedder>,
        handle: SnapshotHandle,
        collection: impl Into<String>,
        default_top_k: usize,
        max_top_k: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            handle,
            collection: collection.into(),
            default_top_k,
            max_top_k,
        }
    }

    fn resolve_top_k(&self, top_k: Option<usize>) -> Result<usize> {
        match top_k.unwrap_or(self.default_top_k) {
            0 => Err(MatchError::InvalidQuery("top_k must be at least 1".into())),
            k => Ok(k.min(self.max_top_k)),
        }
    }

    #[instrument(skip(self, query, prefs), fields(query_len = query.len()))]
    pub async fn rank(
        &self,
        query: &str,
        prefs: &Preferences,
        top_k: Option<usize>,
    ) -> Result<Vec<ScoredDoctor>> {
        if query.trim().is_empty() {
            return Err(MatchError::InvalidQuery("query is required".into()));
        }
        let top_k = self.resolve_top_k(top_k)?;

        // Held for the whole request; a concurrent rebuild publishes a new
        // snapshot without touching this one.
        let snapshot = self.handle.load();
        if snapshot.is_empty() {
            return Ok(Vec::new());
        }

        let query_vector = self.embed_query(query).await?;
        if query_vector.len() != snapshot.dimension() {
            return Err(MatchError::DimensionMismatch {
                expected: snapshot.dimension(),
                actual: query_vector.len(),
            });
        }

        let hits = snapshot.doctors.search(&query_vector, top_k)?;
        let predicted = snapshot
            .specialities
            .search(&query_vector, 1)?
            .first()
            .map(|(label, _)| *label);
        debug!(hits = hits.len(), predicted = ?predicted, "Searched snapshot");

        let mut results = Vec::with_capacity(hits.len());
        for (doctor_id, similarity) in hits {
            let Some(document) = self
                .store
                .find_by_id(&self.collection, doctor_id)
                .await
                .map_err(MatchError::Store)?
            else {
                debug!(doctor_id, "Indexed doctor no longer in store, skipping");
                continue;
            };

            let record = match DoctorRecord::from_document(&document) {
                Ok(record) => record,
                Err(e) => {
                    warn!(doctor_id, error = %e, "Skipping malformed doctor document");
                    continue;
                }
            };

            let score = round3(adjust_score(similarity as f64, &record, prefs, predicted));
            results.push(ScoredDoctor {
                doctor_id: doctor_id.to_string(),
                name: record.name,
                speciality: record.speciality,
                languages_known: record.languages_known,
                accepted_insurances: record.accepted_insurances,
                score,
            });
        }

        // `sort_by` is stable, so ties keep similarity order.
        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(results)
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let mut vectors = self
            .embedder
            .embed_batch(&[query.to_string()])
            .await
            .map_err(into_match_error)?;

        let mut vector = vectors.pop().ok_or_else(|| {
            MatchError::ConfigurationFault("embedder returned no vector for the query".into())
        })?;
        l2_normalize(&mut vector);
        Ok(vector)
    }
}
