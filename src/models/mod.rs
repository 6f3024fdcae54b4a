//! Data models for the penduduk service.
//!
//! Rows map onto the `penduduk` table via `sqlx::FromRow` and serialize as
//! JSON via `serde`.

pub mod penduduk;
