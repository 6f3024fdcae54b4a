//! Temporary intake store: buffers an uploaded file part on local disk until
//! it has been forwarded to object storage.
//!
//! Files are named `<unix millis>-<original filename>`. The same timestamp is
//! reused for the remote key, so the local name and the object name match.

use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt, pin_mut};
use md5::Context;
use std::{
    io::{self, ErrorKind},
    path::PathBuf,
};
use tokio::{
    fs::{self, File, OpenOptions},
    io::AsyncWriteExt,
};
use tracing::{debug, warn};

/// How many times a colliding name is retried with a bumped timestamp.
const MAX_NAME_ATTEMPTS: i64 = 32;

/// A file part that has fully arrived on local disk.
#[derive(Debug, Clone)]
pub struct TempUpload {
    pub path: PathBuf,
    /// Last path component of the client-supplied filename.
    pub file_name: String,
    /// Milliseconds since the epoch used in the stored name.
    pub stamp: i64,
    pub content_type: Option<String>,
    pub size_bytes: u64,
    pub md5: [u8; 16],
}

impl TempUpload {
    /// `<stamp>-<file_name>`, shared by the temp file and the remote object.
    pub fn stored_name(&self) -> String {
        format!("{}-{}", self.stamp, self.file_name)
    }

    /// MD5 digest in the base64 form object stores expect.
    pub fn md5_base64(&self) -> String {
        general_purpose::STANDARD.encode(self.md5)
    }
}

#[derive(Clone, Debug)]
pub struct IntakeStore {
    dir: PathBuf,
}

impl IntakeStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Create the intake directory if it does not exist yet.
    pub async fn ensure_dir(&self) -> io::Result<()> {
        fs::create_dir_all(&self.dir).await
    }

    /// Stream a file part to disk under a fresh timestamped name.
    pub async fn write_stream<S>(
        &self,
        original_name: &str,
        content_type: Option<String>,
        stream: S,
    ) -> io::Result<TempUpload>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        self.write_stream_at(
            Utc::now().timestamp_millis(),
            original_name,
            content_type,
            stream,
        )
        .await
    }

    /// Same as [`write_stream`](Self::write_stream) with an explicit starting
    /// timestamp.
    pub async fn write_stream_at<S>(
        &self,
        stamp: i64,
        original_name: &str,
        content_type: Option<String>,
        stream: S,
    ) -> io::Result<TempUpload>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        let file_name = sanitize_file_name(original_name);
        let (mut file, path, stamp) = self.create_unique(stamp, &file_name).await?;

        let mut size_bytes: u64 = 0;
        let mut digest = Context::new();
        pin_mut!(stream);
        while let Some(chunk_res) = stream.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&path).await;
                    return Err(err);
                }
            };
            size_bytes += chunk.len() as u64;
            digest.consume(&chunk);
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&path).await;
                return Err(err);
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&path).await;
            return Err(err);
        }

        debug!(path = %path.display(), size_bytes, "buffered upload to temp file");

        Ok(TempUpload {
            path,
            file_name,
            stamp,
            content_type,
            size_bytes,
            md5: digest.compute().0,
        })
    }

    /// Remove a buffered file if it is still present.
    ///
    /// Failures are logged and swallowed; the workflow result is already
    /// decided when this runs.
    pub async fn discard(&self, upload: &TempUpload) {
        match fs::try_exists(&upload.path).await {
            Ok(true) => match fs::remove_file(&upload.path).await {
                Ok(_) => debug!(path = %upload.path.display(), "removed temp file"),
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => warn!(
                    path = %upload.path.display(),
                    "failed to remove temp file: {}", err
                ),
            },
            Ok(false) => debug!(path = %upload.path.display(), "temp file already gone"),
            Err(err) => warn!(
                path = %upload.path.display(),
                "could not check temp file: {}", err
            ),
        }
    }

    /// Open `<stamp>-<name>` with create-new semantics, bumping the stamp on
    /// collision.
    async fn create_unique(&self, stamp: i64, file_name: &str) -> io::Result<(File, PathBuf, i64)> {
        let mut stamp = stamp;
        for _ in 0..MAX_NAME_ATTEMPTS {
            let path = self.dir.join(format!("{}-{}", stamp, file_name));
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => return Ok((file, path, stamp)),
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    debug!(path = %path.display(), "temp name taken, bumping timestamp");
                    stamp += 1;
                }
                Err(err) => return Err(err),
            }
        }
        Err(io::Error::new(
            ErrorKind::AlreadyExists,
            format!("no free temp name for `{}`", file_name),
        ))
    }
}

/// Keep only the final path component of a client filename.
fn sanitize_file_name(name: &str) -> String {
    let last = name.rsplit(['/', '\\']).next().unwrap_or("").trim();
    match last {
        "" | "." | ".." => "upload".to_string(),
        other => other.chars().filter(|c| !c.is_control()).collect(),
    }
}
