use axum::{Json, extract::State};
use serde_json::{Value, json};

use crate::infra::app_state::AppState;

pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    let snapshot = state.coordinator.snapshot();
    let upstreams = state.upstreams;

    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "upstreams": {
            "node": upstreams.node,
            "wallet": upstreams.wallet,
            "walletGrpc": upstreams.wallet_grpc,
            "walletLog": state.wallet_log.as_ref().map(|log| log.describe()),
        },
        "rescan": {
            "busy": snapshot.busy(),
            "phase": snapshot.phase().map(|phase| phase.as_str()),
            "pending": snapshot.pending.is_some(),
            "subscribers": snapshot.subscribers,
            "droppedUpdates": snapshot.dropped_updates,
        },
    }))
}
