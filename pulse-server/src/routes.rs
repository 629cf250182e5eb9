use axum::{
    Router,
    routing::{get, post},
};

use crate::{
    handlers::{
        health::health_handler,
        progress_ws::stream_progress_handler,
        wallet::{import_key_handler, rescan_handler, sync_progress_handler},
    },
    infra::app_state::AppState,
};

pub mod paths {
    pub const HEALTH: &str = "/api/health";
    pub const RESCAN: &str = "/api/wallet/rescan";
    pub const IMPORT_KEY: &str = "/api/wallet/import-key";
    pub const SYNC_PROGRESS: &str = "/api/wallet/sync-progress";
    pub const STREAM_PROGRESS: &str = "/api/wallet/stream-progress";
}

/// API routes without middleware layers.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(paths::HEALTH, get(health_handler))
        .route(paths::RESCAN, post(rescan_handler))
        .route(paths::IMPORT_KEY, post(import_key_handler))
        .route(paths::SYNC_PROGRESS, get(sync_progress_handler))
        .route(paths::STREAM_PROGRESS, get(stream_progress_handler))
        .with_state(state)
}
