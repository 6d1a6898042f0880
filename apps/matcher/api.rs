use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    error::MatchError,
    ranking::{Preferences, RankingEngine},
    snapshot::SnapshotBuilder,
};

#[derive(Clone)]
pub struct AppState {
    pub ranking: Arc<RankingEngine>,
    pub builder: Arc<SnapshotBuilder>,
    /// Cancelled when a request hits a fatal index fault.
    pub shutdown: CancellationToken,
}

#[derive(Debug, Deserialize)]
pub struct MatchRequest {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub preferences: Option<Preferences>,
    #[serde(default)]
    pub top_k: Option<usize>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/match", post(match_doctors))
        .route("/rebuild_index", post(rebuild_index))
        .with_state(state)
}

struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn from_match_error(err: MatchError, shutdown: &CancellationToken) -> Self {
        match err {
            MatchError::InvalidQuery(message) => Self {
                status: StatusCode::BAD_REQUEST,
                message,
            },
            err => {
                if err.is_fatal() {
                    error!(error = %err, "Fatal index fault, requesting shutdown");
                    shutdown.cancel();
                } else {
                    warn!(error = %err, "Request failed");
                }
                Self {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    message: err.to_string(),
                }
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

async fn match_doctors(
    State(state): State<AppState>,
    Json(request): Json<MatchRequest>,
) -> Result<Response, ApiError> {
    let query = request.query.unwrap_or_default();
    let preferences = request.preferences.unwrap_or_default();

    let matches = state
        .ranking
        .rank(&query, &preferences, request.top_k)
        .await
        .map_err(|e| ApiError::from_match_error(e, &state.shutdown))?;

    info!(matches = matches.len(), "Matched doctors");
    Ok(Json(json!({ "matches": matches })).into_response())
}

async fn rebuild_index(State(state): State<AppState>) -> Result<Response, ApiError> {
    let count = state
        .builder
        .rebuild()
        .await
        .map_err(|e| ApiError::from_match_error(e, &state.shutdown))?;

    Ok(Json(json!({ "status": "ok", "count": count })).into_response())
}
