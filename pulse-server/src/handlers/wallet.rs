use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use pulse_core::{
    RescanError,
    api::{ActionResponse, ImportKeyRequest, ProgressReport, RescanRequest},
    rescan::point_in_time_report,
};
use tracing::warn;

use crate::infra::{
    app_state::AppState,
    errors::{AppError, AppResult},
};

/// Starts a rescan from `beginHeight`. A missing or unreadable body
/// rescans from genesis.
pub async fn rescan_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> AppResult<impl IntoResponse> {
    let request = serde_json::from_slice::<RescanRequest>(&body)
        .unwrap_or_default();

    let accepted = state.coordinator.trigger_rescan(request.begin_height)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ActionResponse::accepted(format!(
            "Discovering addresses and rescanning blockchain from block {}. This may take 30+ minutes.",
            accepted.begin_height
        ))),
    ))
}

/// Imports an extended public key, then discovers and rescans. A key with
/// the wrong prefix is answered with `success: false`, not an HTTP error.
pub async fn import_key_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> AppResult<Json<ActionResponse>> {
    let request: ImportKeyRequest = serde_json::from_slice(&body)
        .map_err(|_| AppError::bad_request("Invalid request body"))?;

    match state
        .coordinator
        .trigger_import(&request.key, &request.account_name)
    {
        Ok(accepted) => {
            let account = accepted.account.unwrap_or_default();
            Ok(Json(ActionResponse::accepted(format!(
                "Xpub import started for account '{account}'. Now discovering addresses and rescanning blockchain. This typically takes 5-30 minutes."
            ))))
        }
        Err(RescanError::Validation(message)) => {
            warn!(%message, "xpub import rejected");
            Ok(Json(ActionResponse::rejected(message)))
        }
        Err(err) => Err(err.into()),
    }
}

/// Point-in-time progress for clients that poll.
pub async fn sync_progress_handler(
    State(state): State<AppState>,
) -> AppResult<Json<ProgressReport>> {
    let report = point_in_time_report(
        &state.coordinator,
        &state.chain,
        state.wallet_log.as_deref(),
    )
    .await?;
    Ok(Json(report))
}
