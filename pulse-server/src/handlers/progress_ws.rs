use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use pulse_core::{
    api::ProgressReport,
    rescan::{ReportSink, SinkClosed},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::infra::app_state::AppState;

/// Upgrades to a WebSocket carrying live rescan progress.
pub async fn stream_progress_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (sender, receiver) = socket.split();
    let session = state.progress_session();
    let cancel = session.cancellation();

    let reader = tokio::spawn(watch_client(receiver, cancel.clone()));

    let mut sink = WsReportSink { sender };
    let end = session.run(&mut sink).await;
    debug!(?end, "progress websocket finished");

    reader.abort();
    if !cancel.is_cancelled() {
        let _ = sink.sender.send(Message::Close(None)).await;
    }
}

/// Drains the inbound half so pongs and close frames are processed;
/// cancels the session once the client goes away.
async fn watch_client(
    mut receiver: SplitStream<WebSocket>,
    cancel: CancellationToken,
) {
    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                debug!(error = %err, "progress websocket read failed");
                break;
            }
        }
    }
    cancel.cancel();
}

struct WsReportSink {
    sender: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl ReportSink for WsReportSink {
    async fn send_report(
        &mut self,
        report: &ProgressReport,
    ) -> Result<(), SinkClosed> {
        let text = serde_json::to_string(report).map_err(|err| {
            warn!(error = %err, "could not encode progress report");
            SinkClosed
        })?;
        self.sender
            .send(Message::Text(text.into()))
            .await
            .map_err(|_| SinkClosed)
    }

    async fn ping(&mut self) -> Result<(), SinkClosed> {
        self.sender
            .send(Message::Ping(Bytes::new()))
            .await
            .map_err(|_| SinkClosed)
    }
}
