//! PendudukService — the create/list/update/delete workflows.
//!
//! Creation is the only multi-step path: the buffered photo is uploaded to
//! object storage, the row is inserted with the resulting public URL, and the
//! temp file is removed whatever the outcome. There is no compensation for
//! an uploaded object whose row insert fails, and deleting a row leaves its
//! photo in the bucket.

use crate::{
    models::penduduk::{NewPenduduk, Penduduk, PendudukFields},
    services::{
        intake::{IntakeStore, TempUpload},
        object_store::{ObjectStore, ObjectStoreError, UploadRequest},
        penduduk_store::PendudukStore,
    },
};
use chrono::{DateTime, Utc};
use std::{io, sync::Arc};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Key prefix for every photo in the bucket.
pub const IMAGE_PREFIX: &str = "images/";

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("missing file part")]
    MissingFile,
    #[error("penduduk `{0}` not found")]
    NotFound(i32),
    #[error("buffering upload: {0}")]
    Intake(#[from] io::Error),
    #[error(transparent)]
    Upload(#[from] ObjectStoreError),
    #[error(transparent)]
    Persist(#[from] sqlx::Error),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Clone)]
pub struct PendudukService {
    store: Arc<dyn PendudukStore>,
    objects: Arc<dyn ObjectStore>,
    intake: IntakeStore,
}

impl PendudukService {
    pub fn new(
        store: Arc<dyn PendudukStore>,
        objects: Arc<dyn ObjectStore>,
        intake: IntakeStore,
    ) -> Self {
        Self {
            store,
            objects,
            intake,
        }
    }

    pub fn intake(&self) -> &IntakeStore {
        &self.intake
    }

    /// Create a record from its fields and a buffered photo.
    ///
    /// The temp file is removed before returning, on success and on every
    /// failure.
    #[instrument(skip_all)]
    pub async fn create(
        &self,
        fields: PendudukFields,
        upload: Option<TempUpload>,
    ) -> ServiceResult<Penduduk> {
        let upload = upload.ok_or(ServiceError::MissingFile)?;
        let result = self.upload_and_insert(fields, &upload).await;
        self.intake.discard(&upload).await;
        result
    }

    async fn upload_and_insert(
        &self,
        fields: PendudukFields,
        upload: &TempUpload,
    ) -> ServiceResult<Penduduk> {
        let key = object_key(upload);
        let content_type = upload
            .content_type
            .as_deref()
            .unwrap_or(DEFAULT_CONTENT_TYPE);

        debug!(key = %key, bytes = upload.size_bytes, "uploading photo");
        self.objects
            .upload(UploadRequest {
                local_path: &upload.path,
                key: &key,
                content_type,
                md5_base64: Some(upload.md5_base64()),
            })
            .await
            .inspect_err(|err| warn!(key = %key, "photo upload failed: {}", err))?;

        let foto_ktp = self.objects.public_url(&key);
        info!(url = %foto_ktp, "photo uploaded");

        let row = self
            .store
            .insert(&NewPenduduk { fields, foto_ktp })
            .await
            .inspect_err(|err| warn!(key = %key, "insert after upload failed: {}", err))?;

        info!(id = row.id_penduduk, "penduduk created");
        Ok(row)
    }

    pub async fn list(&self) -> ServiceResult<Vec<Penduduk>> {
        let rows = self.store.list().await?;
        debug!(count = rows.len(), "listed penduduk");
        Ok(rows)
    }

    /// Overwrite the metadata of a record. The photo URL is left untouched.
    pub async fn update(&self, id: i32, fields: PendudukFields) -> ServiceResult<Penduduk> {
        let row = self
            .store
            .update(id, &fields)
            .await?
            .ok_or(ServiceError::NotFound(id))?;
        info!(id, "penduduk updated");
        Ok(row)
    }

    /// Delete a record row. Its photo stays in object storage.
    pub async fn delete(&self, id: i32) -> ServiceResult<()> {
        if !self.store.delete(id).await? {
            return Err(ServiceError::NotFound(id));
        }
        info!(id, "penduduk deleted");
        Ok(())
    }

    pub async fn database_time(&self) -> ServiceResult<DateTime<Utc>> {
        Ok(self.store.now().await?)
    }
}

/// `images/<stamp>-<filename>`
pub fn object_key(upload: &TempUpload) -> String {
    format!("{}{}", IMAGE_PREFIX, upload.stored_name())
}
