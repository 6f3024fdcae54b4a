use crate::services::penduduk_service::PendudukService;
use std::sync::Arc;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub service: PendudukService,

    /// Runtime environment tag reported by `/health`.
    pub app_env: Arc<str>,
}

impl AppState {
    pub fn new(service: PendudukService, app_env: impl Into<Arc<str>>) -> Self {
        Self {
            service,
            app_env: app_env.into(),
        }
    }
}
