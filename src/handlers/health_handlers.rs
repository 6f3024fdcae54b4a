//! Health & database connectivity handlers.
//!
//! - GET /health   -> liveness with timestamp and environment tag
//! - GET /test-db  -> asks the database for its current time

use crate::{errors::AppError, state::AppState};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

/// `GET /health`
///
/// Cheap liveness probe; never performs I/O.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "OK",
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            env: state.app_env.to_string(),
        }),
    )
}

/// `GET /test-db`
pub async fn test_db(State(state): State<AppState>) -> Result<Json<DbTimeResponse>, AppError> {
    let time = state
        .service
        .database_time()
        .await
        .map_err(|err| AppError::internal("Database connection failed").with_details(err))?;

    Ok(Json(DbTimeResponse {
        message: "Database connection successful",
        time,
    }))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: String,
    env: String,
}

#[derive(Serialize)]
pub struct DbTimeResponse {
    message: &'static str,
    time: DateTime<Utc>,
}
