//! In-memory stand-ins for the storage and database clients.

use crate::{
    models::penduduk::{NewPenduduk, Penduduk, PendudukFields},
    services::{
        object_store::{ObjectStore, ObjectStoreError, UploadRequest},
        penduduk_store::{PendudukStore, StoreResult},
    },
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{
    collections::BTreeMap,
    io,
    sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

/// Keeps uploaded objects in a map keyed by object key.
pub struct MemoryObjectStore {
    bucket: String,
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    fail: AtomicBool,
}

impl MemoryObjectStore {
    pub fn new(bucket: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            objects: Mutex::default(),
            fail: AtomicBool::new(false),
        }
    }

    pub fn fail_uploads(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn public_base_url(&self) -> &str {
        "https://storage.googleapis.com"
    }

    async fn upload(&self, req: UploadRequest<'_>) -> Result<(), ObjectStoreError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ObjectStoreError::Rejected {
                status: 503,
                body: "backend unavailable".into(),
            });
        }
        let bytes = tokio::fs::read(req.local_path).await?;
        self.objects
            .lock()
            .unwrap()
            .insert(req.key.to_string(), bytes);
        Ok(())
    }
}

/// A `penduduk` table held in a `BTreeMap`, with a SERIAL-style counter.
#[derive(Default)]
pub struct MemoryPendudukStore {
    inner: Mutex<Table>,
    fail: AtomicBool,
}

#[derive(Default)]
struct Table {
    next_id: i32,
    rows: BTreeMap<i32, Penduduk>,
}

impl MemoryPendudukStore {
    pub fn fail_queries(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn rows(&self) -> Vec<Penduduk> {
        self.inner.lock().unwrap().rows.values().cloned().collect()
    }

    fn check(&self) -> StoreResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(sqlx::Error::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl PendudukStore for MemoryPendudukStore {
    async fn list(&self) -> StoreResult<Vec<Penduduk>> {
        self.check()?;
        Ok(self.rows())
    }

    async fn insert(&self, record: &NewPenduduk) -> StoreResult<Penduduk> {
        self.check()?;
        let mut table = self.inner.lock().unwrap();
        table.next_id += 1;
        let f = record.fields.clone();
        let row = Penduduk {
            id_penduduk: table.next_id,
            nik: f.nik,
            nama: f.nama,
            telp: f.telp,
            alamat: f.alamat,
            foto_ktp: record.foto_ktp.clone(),
            tipe: f.tipe,
        };
        table.rows.insert(row.id_penduduk, row.clone());
        Ok(row)
    }

    async fn update(&self, id: i32, fields: &PendudukFields) -> StoreResult<Option<Penduduk>> {
        self.check()?;
        let mut table = self.inner.lock().unwrap();
        Ok(table.rows.get_mut(&id).map(|row| {
            let f = fields.clone();
            row.nik = f.nik;
            row.nama = f.nama;
            row.telp = f.telp;
            row.alamat = f.alamat;
            row.tipe = f.tipe;
            row.clone()
        }))
    }

    async fn delete(&self, id: i32) -> StoreResult<bool> {
        self.check()?;
        Ok(self.inner.lock().unwrap().rows.remove(&id).is_some())
    }

    async fn now(&self) -> StoreResult<DateTime<Utc>> {
        self.check()?;
        Ok(Utc::now())
    }
}
