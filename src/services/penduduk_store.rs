//! Relational store for resident rows.
//!
//! `PendudukStore` is the seam the workflows use; `PgPendudukStore` runs the
//! parameterized statements against PostgreSQL through a shared `sqlx` pool.

use crate::models::penduduk::{NewPenduduk, Penduduk, PendudukFields};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

pub type StoreResult<T> = Result<T, sqlx::Error>;

#[async_trait]
pub trait PendudukStore: Send + Sync {
    /// All rows ordered by ascending identifier.
    async fn list(&self) -> StoreResult<Vec<Penduduk>>;

    /// Insert a row and return it with its assigned identifier.
    async fn insert(&self, record: &NewPenduduk) -> StoreResult<Penduduk>;

    /// Overwrite the metadata fields of a row. `None` when no row matches.
    async fn update(&self, id: i32, fields: &PendudukFields) -> StoreResult<Option<Penduduk>>;

    /// Delete a row. `false` when no row matched.
    async fn delete(&self, id: i32) -> StoreResult<bool>;

    /// Current time as seen by the database; used as a connectivity probe.
    async fn now(&self) -> StoreResult<DateTime<Utc>>;
}

const COLUMNS: &str = "id_penduduk, nik, nama, telp, alamat, foto_ktp, tipe";

#[derive(Clone)]
pub struct PgPendudukStore {
    pool: PgPool,
}

impl PgPendudukStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PendudukStore for PgPendudukStore {
    async fn list(&self) -> StoreResult<Vec<Penduduk>> {
        sqlx::query_as::<_, Penduduk>(&format!(
            "SELECT {} FROM penduduk ORDER BY id_penduduk ASC",
            COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
    }

    async fn insert(&self, record: &NewPenduduk) -> StoreResult<Penduduk> {
        let f = &record.fields;
        sqlx::query_as::<_, Penduduk>(&format!(
            "INSERT INTO penduduk (nik, nama, telp, alamat, foto_ktp, tipe)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {}",
            COLUMNS
        ))
        .bind(&f.nik)
        .bind(&f.nama)
        .bind(&f.telp)
        .bind(&f.alamat)
        .bind(&record.foto_ktp)
        .bind(&f.tipe)
        .fetch_one(&self.pool)
        .await
    }

    async fn update(&self, id: i32, fields: &PendudukFields) -> StoreResult<Option<Penduduk>> {
        sqlx::query_as::<_, Penduduk>(&format!(
            "UPDATE penduduk SET nik = $1, nama = $2, telp = $3, alamat = $4, tipe = $5
             WHERE id_penduduk = $6
             RETURNING {}",
            COLUMNS
        ))
        .bind(&fields.nik)
        .bind(&fields.nama)
        .bind(&fields.telp)
        .bind(&fields.alamat)
        .bind(&fields.tipe)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn delete(&self, id: i32) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM penduduk WHERE id_penduduk = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn now(&self) -> StoreResult<DateTime<Utc>> {
        sqlx::query_scalar::<_, DateTime<Utc>>("SELECT NOW()")
            .fetch_one(&self.pool)
            .await
    }
}
