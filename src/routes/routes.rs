//! Defines routes for the penduduk API.
//!
//! ## Structure
//! - **Probes**
//!   - `GET    /health`  — liveness, timestamp and environment tag
//!   - `GET    /test-db` — database round trip
//!
//! - **Records**
//!   - `POST   /penduduk`      — create (multipart, photo in `foto_ktp`)
//!   - `GET    /penduduk`      — list
//!   - `PUT    /penduduk/{id}` — update metadata
//!   - `DELETE /penduduk/{id}` — delete row
//!
//! Anything else, including a known path with the wrong method, answers 404
//! with a JSON body. Panics inside a handler are
//! turned into a JSON 500.

use crate::{
    handlers::{
        health_handlers::{health, test_db},
        penduduk_handlers::{
            create_penduduk, delete_penduduk, endpoint_not_found, list_penduduk, update_penduduk,
        },
    },
    state::AppState,
};
use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use serde_json::json;
use std::any::Any;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

/// Build and return the application router.
///
/// `upload_limit` caps the request body of the create route, which carries
/// the photo.
pub fn routes(state: AppState, upload_limit: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/test-db", get(test_db))
        .route(
            "/penduduk",
            post(create_penduduk)
                .layer(DefaultBodyLimit::max(upload_limit))
                .get(list_penduduk),
        )
        .route("/penduduk/{id}", put(update_penduduk).delete(delete_penduduk))
        .fallback(endpoint_not_found)
        .method_not_allowed_fallback(endpoint_not_found)
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let details = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    tracing::error!("Unhandled error: {}", details);

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": "Internal server error",
            "status": 500,
            "details": details
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{
        intake::IntakeStore,
        penduduk_service::PendudukService,
        testing::{MemoryObjectStore, MemoryPendudukStore},
    };
    use axum::{
        body::{Body, to_bytes},
        http::Request,
    };
    use serde_json::Value;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const BOUNDARY: &str = "X-PENDUDUK-BOUNDARY";

    struct TestApp {
        router: Router,
        store: Arc<MemoryPendudukStore>,
        objects: Arc<MemoryObjectStore>,
        tmp: TempDir,
    }

    fn test_app() -> TestApp {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(MemoryPendudukStore::default());
        let objects = Arc::new(MemoryObjectStore::new("bucket_uas"));
        let service = PendudukService::new(
            store.clone(),
            objects.clone(),
            IntakeStore::new(tmp.path()),
        );
        let router = routes(AppState::new(service, "test"), 1024 * 1024);
        TestApp {
            router,
            store,
            objects,
            tmp,
        }
    }

    fn multipart_body(fields: &[(&str, &str)], file: Option<(&str, &[u8])>) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                )
                .as_bytes(),
            );
        }
        if let Some((file_name, bytes)) = file {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"foto_ktp\"; filename=\"{file_name}\"\r\nContent-Type: image/jpeg\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn budi_fields() -> Vec<(&'static str, &'static str)> {
        vec![
            ("nik", "1234567890123456"),
            ("nama", "Budi"),
            ("telp", "08123"),
            ("alamat", "Jl. A"),
            ("tipe", "tetap"),
        ]
    }

    fn post_penduduk(body: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/penduduk")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn request(method: &str, uri: &str, json: Option<Value>) -> Request<Body> {
        let builder = Request::builder().method(method).uri(uri);
        match json {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn send(router: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn temp_dir_is_empty(tmp: &TempDir) -> bool {
        std::fs::read_dir(tmp.path()).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn create_returns_row_with_public_photo_url() {
        let app = test_app();
        let body = multipart_body(&budi_fields(), Some(("ktp.jpg", &b"\xff\xd8\xffjpeg"[..])));

        let (status, row) = send(&app.router, post_penduduk(body)).await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(row["id_penduduk"], 1);
        assert_eq!(row["nik"], "1234567890123456");
        assert_eq!(row["tipe"], "tetap");
        let url = row["foto_ktp"].as_str().unwrap();
        assert!(url.starts_with("https://storage.googleapis.com/bucket_uas/images/"));
        assert!(url.ends_with("-ktp.jpg"));
        let key = url.trim_start_matches("https://storage.googleapis.com/bucket_uas/");
        assert_eq!(app.objects.keys(), vec![key.to_string()]);
        assert!(temp_dir_is_empty(&app.tmp));
    }

    #[tokio::test]
    async fn create_without_file_is_rejected() {
        let app = test_app();

        let (status, body) =
            send(&app.router, post_penduduk(multipart_body(&budi_fields(), None))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Foto KTP wajib diupload");

        let (status, _) = send(
            &app.router,
            request("POST", "/penduduk", Some(serde_json::json!({"nama": "Budi"}))),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        assert!(app.store.rows().is_empty());
        assert!(temp_dir_is_empty(&app.tmp));
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogBuffer {
        type Writer = LogBuffer;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[tokio::test]
    async fn create_logs_stored_file_but_not_resident_name() {
        let app = test_app();
        let logs = LogBuffer::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let fields = [("nik", "3201010101010001"), ("nama", "Siti Rahmawati")];
        let body = multipart_body(&fields, Some(("ktp.jpg", &b"data"[..])));
        let (status, _) = send(&app.router, post_penduduk(body)).await;
        assert_eq!(status, StatusCode::CREATED);

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("POST /penduduk"));
        assert!(output.contains("-ktp.jpg"));
        assert!(!output.contains("Siti Rahmawati"));
        assert!(!output.contains("3201010101010001"));
    }

    #[tokio::test]
    async fn upload_failure_is_a_server_error_with_details() {
        let app = test_app();
        app.objects.fail_uploads(true);
        let body = multipart_body(&budi_fields(), Some(("ktp.jpg", &b"data"[..])));

        let (status, body) = send(&app.router, post_penduduk(body)).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Gagal menambahkan penduduk");
        assert!(body["details"].as_str().unwrap().contains("503"));
        assert!(app.store.rows().is_empty());
        assert!(temp_dir_is_empty(&app.tmp));
    }

    #[tokio::test]
    async fn list_on_empty_table() {
        let app = test_app();
        let (status, body) = send(&app.router, request("GET", "/penduduk", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["count"], 0);
        assert_eq!(body["data"], Value::Array(vec![]));
    }

    #[tokio::test]
    async fn list_failure_is_a_server_error() {
        let app = test_app();
        app.store.fail_queries(true);
        let (status, body) = send(&app.router, request("GET", "/penduduk", None)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Gagal mengambil data");
    }

    #[tokio::test]
    async fn update_changes_metadata_but_not_photo() {
        let app = test_app();
        let body = multipart_body(&budi_fields(), Some(("ktp.jpg", &b"data"[..])));
        let (_, created) = send(&app.router, post_penduduk(body)).await;

        let (status, updated) = send(
            &app.router,
            request(
                "PUT",
                "/penduduk/1",
                Some(serde_json::json!({
                    "nik": "1234567890123456",
                    "nama": "Budi S",
                    "telp": "0899",
                    "alamat": "Jl. B",
                    "tipe": "sementara",
                    "foto_ktp": "https://elsewhere.example/x.jpg"
                })),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["nama"], "Budi S");
        assert_eq!(updated["alamat"], "Jl. B");
        assert_eq!(updated["foto_ktp"], created["foto_ktp"]);
    }

    #[tokio::test]
    async fn update_unknown_id_is_not_found() {
        let app = test_app();
        for uri in ["/penduduk/999", "/penduduk/abc"] {
            let (status, body) = send(
                &app.router,
                request("PUT", uri, Some(serde_json::json!({"nama": "X"}))),
            )
            .await;
            assert_eq!(status, StatusCode::NOT_FOUND);
            assert_eq!(body["error"], "Penduduk tidak ditemukan");
        }
        assert!(app.store.rows().is_empty());
    }

    #[tokio::test]
    async fn delete_then_list_and_delete_again() {
        let app = test_app();
        for name in ["a.jpg", "b.jpg"] {
            let body = multipart_body(&budi_fields(), Some((name, &b"data"[..])));
            let (status, _) = send(&app.router, post_penduduk(body)).await;
            assert_eq!(status, StatusCode::CREATED);
        }

        let (status, body) = send(&app.router, request("DELETE", "/penduduk/1", None)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(body, Value::Null);

        let (_, list) = send(&app.router, request("GET", "/penduduk", None)).await;
        assert_eq!(list["count"], 1);
        assert_eq!(list["data"][0]["id_penduduk"], 2);

        for _ in 0..2 {
            let (status, _) = send(&app.router, request("DELETE", "/penduduk/1", None)).await;
            assert_eq!(status, StatusCode::NOT_FOUND);
        }
        assert_eq!(app.objects.keys().len(), 2);
    }

    #[tokio::test]
    async fn health_reports_environment() {
        let app = test_app();
        let (status, body) = send(&app.router, request("GET", "/health", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "OK");
        assert_eq!(body["env"], "test");
        assert!(body["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[tokio::test]
    async fn test_db_reports_database_state() {
        let app = test_app();
        let (status, body) = send(&app.router, request("GET", "/test-db", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Database connection successful");
        assert!(body["time"].is_string());

        app.store.fail_queries(true);
        let (status, body) = send(&app.router, request("GET", "/test-db", None)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Database connection failed");
    }

    #[tokio::test]
    async fn unknown_routes_answer_json_404() {
        let app = test_app();
        let (status, body) = send(&app.router, request("GET", "/nope", None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Endpoint not found");
    }

    #[tokio::test]
    async fn wrong_method_on_known_path_answers_json_404() {
        let app = test_app();
        for (method, uri) in [("GET", "/penduduk/1"), ("PATCH", "/penduduk"), ("POST", "/health")] {
            let (status, body) = send(&app.router, request(method, uri, None)).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{method} {uri}");
            assert_eq!(body["error"], "Endpoint not found");
        }
    }

    #[tokio::test]
    async fn truncated_part_after_photo_removes_temp_file() {
        let app = test_app();
        let mut body = multipart_body(&[], Some(("ktp.jpg", &b"data"[..])));
        // Drop the closing delimiter and append a text part that never ends.
        body.truncate(body.len() - format!("--{BOUNDARY}--\r\n").len());
        body.extend_from_slice(
            format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"nama\"\r\n\r\nBud")
                .as_bytes(),
        );

        let (status, body) = send(&app.router, post_penduduk(body)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid multipart body");
        assert!(app.store.rows().is_empty());
        assert!(app.objects.keys().is_empty());
        assert!(temp_dir_is_empty(&app.tmp));
    }

    #[test]
    fn panics_become_json_500() {
        let resp = handle_panic(Box::new("boom"));
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
