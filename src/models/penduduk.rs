//! Represents a resident record and the payloads that create or edit one.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A resident ("penduduk") row.
///
/// `id_penduduk` is assigned by the database and `foto_ktp` is written once,
/// when the record is created.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct Penduduk {
    /// Store-assigned identifier (`SERIAL PRIMARY KEY`).
    pub id_penduduk: i32,

    /// National identity number (NIK).
    pub nik: Option<String>,

    pub nama: Option<String>,

    pub telp: Option<String>,

    pub alamat: Option<String>,

    /// Public URL of the uploaded identity photo.
    pub foto_ktp: String,

    /// Free-form category tag.
    pub tipe: Option<String>,
}

/// The editable metadata of a record.
///
/// Used both for the text parts of a create request and for the JSON body of
/// an update. Absent fields are stored as NULL.
#[derive(Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct PendudukFields {
    #[serde(default)]
    pub nik: Option<String>,
    #[serde(default)]
    pub nama: Option<String>,
    #[serde(default)]
    pub telp: Option<String>,
    #[serde(default)]
    pub alamat: Option<String>,
    #[serde(default)]
    pub tipe: Option<String>,
}

impl PendudukFields {
    /// Assign a multipart text part to its field. Returns `false` for names
    /// that are not record fields.
    pub fn set(&mut self, name: &str, value: String) -> bool {
        let slot = match name {
            "nik" => &mut self.nik,
            "nama" => &mut self.nama,
            "telp" => &mut self.telp,
            "alamat" => &mut self.alamat,
            "tipe" => &mut self.tipe,
            _ => return false,
        };
        *slot = Some(value);
        true
    }
}

/// A record ready for insertion: metadata plus the photo URL produced by the
/// upload step.
#[derive(Clone, Debug)]
pub struct NewPenduduk {
    pub fields: PendudukFields,
    pub foto_ktp: String,
}
