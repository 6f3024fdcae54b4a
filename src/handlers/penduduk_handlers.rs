//! HTTP handlers for resident records.
//! Photo uploads are streamed to the intake store as they arrive; the rest of
//! the work is delegated to `PendudukService`.

use crate::{
    errors::{AppError, MISSING_FILE, NOT_FOUND},
    models::penduduk::{Penduduk, PendudukFields},
    services::{
        intake::{IntakeStore, TempUpload},
        penduduk_service::ServiceError,
    },
    state::AppState,
};
use axum::{
    Json,
    extract::{
        Multipart, Path, State,
        multipart::{MultipartError, MultipartRejection},
        rejection::JsonRejection,
    },
    http::StatusCode,
    response::IntoResponse,
};
use futures::StreamExt;
use serde::Serialize;
use std::io;
use tracing::{debug, info};

/// Multipart part carrying the identity photo.
pub const FILE_FIELD: &str = "foto_ktp";

#[derive(Serialize)]
pub struct ListResponse {
    success: bool,
    count: usize,
    data: Vec<Penduduk>,
}

/// POST `/penduduk` — create a record from a multipart form with a photo.
pub async fn create_penduduk(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<impl IntoResponse, AppError> {
    let mut multipart = multipart
        .map_err(|rejection| AppError::bad_request(MISSING_FILE).with_details(rejection.body_text()))?;

    let intake = state.service.intake();
    let mut fields = PendudukFields::default();
    let mut upload = None;
    if let Err(err) = read_form(intake, &mut multipart, &mut fields, &mut upload).await {
        if let Some(upload) = &upload {
            intake.discard(upload).await;
        }
        return Err(err);
    }

    info!(
        file = %upload.as_ref().map(|u| u.stored_name()).unwrap_or_default(),
        "POST /penduduk"
    );

    let row = state
        .service
        .create(fields, upload)
        .await
        .map_err(|err| AppError::from_service(err, "Gagal menambahkan penduduk"))?;

    Ok((StatusCode::CREATED, Json(row)))
}

/// GET `/penduduk` — every record, ordered by id.
pub async fn list_penduduk(State(state): State<AppState>) -> Result<Json<ListResponse>, AppError> {
    let data = state
        .service
        .list()
        .await
        .map_err(|err| AppError::from_service(err, "Gagal mengambil data"))?;

    Ok(Json(ListResponse {
        success: true,
        count: data.len(),
        data,
    }))
}

/// PUT `/penduduk/{id}` — overwrite metadata; the photo is kept.
pub async fn update_penduduk(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<PendudukFields>, JsonRejection>,
) -> Result<Json<Penduduk>, AppError> {
    let id = parse_id(&id)?;
    let Json(fields) = body.map_err(|rejection| {
        AppError::new(rejection.status(), "Invalid JSON body").with_details(rejection.body_text())
    })?;
    debug!(id, ?fields, "PUT /penduduk");

    let row = state
        .service
        .update(id, fields)
        .await
        .map_err(|err| AppError::from_service(err, "Gagal mengupdate penduduk"))?;

    Ok(Json(row))
}

/// DELETE `/penduduk/{id}` — remove the row; the stored photo is not touched.
pub async fn delete_penduduk(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = parse_id(&id)?;
    debug!(id, "DELETE /penduduk");

    state
        .service
        .delete(id)
        .await
        .map_err(|err| AppError::from_service(err, "Gagal menghapus penduduk"))?;

    Ok(StatusCode::NO_CONTENT)
}

/// Fallback for unmatched routes.
pub async fn endpoint_not_found() -> AppError {
    AppError::not_found("Endpoint not found")
}

/// Ids that are not integers can never match a row.
fn parse_id(raw: &str) -> Result<i32, AppError> {
    raw.parse::<i32>().map_err(|_| AppError::not_found(NOT_FOUND))
}

/// Collect the text parts and buffer the photo part.
///
/// `upload` is filled as soon as the photo is on disk so the caller can
/// clean it up if a later part fails.
async fn read_form(
    intake: &IntakeStore,
    multipart: &mut Multipart,
    fields: &mut PendudukFields,
    upload: &mut Option<TempUpload>,
) -> Result<(), AppError> {
    while let Some(field) = multipart.next_field().await.map_err(malformed)? {
        let name = field.name().unwrap_or_default().to_string();

        if name == FILE_FIELD {
            let file_name = field.file_name().unwrap_or_default().to_string();
            // Browsers send an empty file part when nothing was selected.
            if file_name.is_empty() || upload.is_some() {
                continue;
            }
            let content_type = field.content_type().map(str::to_string);
            let stream = field.map(|chunk| chunk.map_err(|e| io::Error::other(e.to_string())));
            let stored = intake
                .write_stream(&file_name, content_type, stream)
                .await
                .map_err(|err| {
                    AppError::from_service(ServiceError::Intake(err), "Gagal menambahkan penduduk")
                })?;
            *upload = Some(stored);
        } else {
            let value = field.text().await.map_err(malformed)?;
            if !fields.set(&name, value) {
                debug!(field = %name, "ignoring unknown form field");
            }
        }
    }
    Ok(())
}

fn malformed(err: MultipartError) -> AppError {
    AppError::new(err.status(), "Invalid multipart body").with_details(err.body_text())
}
