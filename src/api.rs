//! Reference receiver for delivered complaints and feedback

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::Utc;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::db::Database;
use crate::models::{Collection, Complaint, Feedback, Record};

/// Application state shared across handlers
pub struct AppState {
    pub db: Database,
}

impl AppState {
    pub fn new(db: Database) -> Arc<Self> {
        Arc::new(Self { db })
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            Collection::Complaints.default_endpoint(),
            get(list::<Complaint>).post(receive::<Complaint>),
        )
        .route(
            Collection::Feedback.default_endpoint(),
            get(list::<Feedback>).post(receive::<Feedback>),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "hostel-sync",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Accept one record; redelivery of the same id replaces the earlier copy
async fn receive<R: Record>(
    State(state): State<Arc<AppState>>,
    Json(record): Json<R>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let collection = R::COLLECTION;
    let body = serde_json::to_string(&record)?;
    state.db.upsert_received(
        &collection.to_string(),
        record.id(),
        &body,
        &Utc::now().to_rfc3339(),
    )?;

    tracing::info!(%collection, id = record.id(), "Record received");

    Ok(Json(serde_json::json!({ "status": "ok", "id": record.id() })))
}

async fn list<R: Record>(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<serde_json::Value>>, ApiError> {
    Ok(Json(
        state.db.list_received(&R::COLLECTION.to_string())?,
    ))
}

/// API error type
#[derive(Debug)]
pub struct ApiError(anyhow::Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self.0, "API error");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": self.0.to_string() })),
        )
            .into_response()
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
