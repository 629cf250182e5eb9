use std::{fmt, future::Future, str::FromStr, sync::Arc, time::Duration};

use chrono::Utc;
use futures::StreamExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::{task::JoinHandle, time::timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::{
    heuristic::{CompletionHeuristic, HeuristicConfig},
    hub::{BroadcastHub, DEFAULT_SUBSCRIBER_CAPACITY},
    sample::{ProgressSource, RescanSample},
    state::{
        ActiveRescan, DEFAULT_PENDING_MAX_AGE, PendingRescan, RescanKind,
        RescanPhase, RescanState,
    },
};
use crate::{
    error::{RescanError, Result},
    rpc::{RescanStream, RpcError, WalletRpc},
};

pub const DEFAULT_ACCOUNT_NAME: &str = "imported";
const XPUB_PREFIXES: [&str; 2] = ["dpub", "tpub"];

/// Which progress channels the service may use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    /// Stream when a rescan stream is open, log otherwise.
    #[default]
    Auto,
    /// Rescan stream only; the wallet log is never read.
    Stream,
    /// Wallet log only; rescans run through blocking JSON-RPC.
    Log,
}

impl SourceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceMode::Auto => "auto",
            SourceMode::Stream => "stream",
            SourceMode::Log => "log",
        }
    }

    pub fn allows_stream(&self) -> bool {
        !matches!(self, SourceMode::Log)
    }

    pub fn allows_log(&self) -> bool {
        !matches!(self, SourceMode::Stream)
    }
}

impl FromStr for SourceMode {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(SourceMode::Auto),
            "stream" | "grpc" => Ok(SourceMode::Stream),
            "log" => Ok(SourceMode::Log),
            other => Err(format!(
                "unknown progress source '{other}' (expected auto, stream or log)"
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// Pause between address discovery and the rescan call.
    pub settle_delay: Duration,
    /// Timeout for each preparatory wallet call and for opening the stream.
    pub step_timeout: Duration,
    pub rescan_grace_seconds: u32,
    pub import_grace_seconds: u32,
    pub pending_max_age: Duration,
    pub source_mode: SourceMode,
    pub hub_capacity: usize,
    /// Sampling cadence while watching a rescan whose call timed out.
    pub watch_interval: Duration,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(5),
            step_timeout: Duration::from_secs(15),
            rescan_grace_seconds: 8,
            import_grace_seconds: 30,
            pending_max_age: DEFAULT_PENDING_MAX_AGE,
            source_mode: SourceMode::Auto,
            hub_capacity: DEFAULT_SUBSCRIBER_CAPACITY,
            watch_interval: Duration::from_secs(1),
        }
    }
}

/// Upstream handles the coordinator drives. Any of them may be absent.
#[derive(Clone, Default)]
pub struct WalletClients {
    pub wallet: Option<Arc<dyn WalletRpc>>,
    pub stream: Option<Arc<dyn RescanStream>>,
    /// Used to hold the slot while a rescan keeps running after its
    /// JSON-RPC call timed out.
    pub log_watch: Option<Arc<dyn ProgressSource>>,
}

impl fmt::Debug for WalletClients {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletClients")
            .field("wallet", &self.wallet.is_some())
            .field("stream", &self.stream.is_some())
            .field("log_watch", &self.log_watch.as_ref().map(|s| s.describe()))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RescanAccepted {
    pub rescan_id: Uuid,
    pub begin_height: i64,
    /// Account receiving an imported key.
    pub account: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RescanSnapshot {
    pub active: Option<ActiveRescan>,
    pub pending: Option<PendingRescan>,
    pub subscribers: usize,
    pub dropped_updates: u64,
    pub latest: Option<RescanSample>,
}

impl RescanSnapshot {
    pub fn busy(&self) -> bool {
        self.active.is_some()
    }

    pub fn phase(&self) -> Option<RescanPhase> {
        self.active.as_ref().map(|active| active.phase)
    }
}

#[derive(Debug, Clone)]
enum Operation {
    Rescan { begin_height: i64 },
    Import { account: String, xpub: String },
}

struct CoordinatorInner {
    clients: WalletClients,
    settings: CoordinatorSettings,
    state: Mutex<RescanState>,
    hub: Arc<BroadcastHub<RescanSample>>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Owns "a rescan is in progress" and runs wallet operations in the
/// background. Cheap to clone.
#[derive(Clone)]
pub struct RescanCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl fmt::Debug for RescanCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RescanCoordinator")
            .field("clients", &self.inner.clients)
            .field("settings", &self.inner.settings)
            .field("active", &self.inner.state.lock().active().cloned())
            .field("shutdown", &self.inner.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl RescanCoordinator {
    pub fn new(clients: WalletClients, settings: CoordinatorSettings) -> Self {
        let hub = BroadcastHub::new(settings.hub_capacity);
        let state = RescanState::new(settings.pending_max_age);

        Self {
            inner: Arc::new(CoordinatorInner {
                clients,
                settings,
                state: Mutex::new(state),
                hub,
                shutdown: CancellationToken::new(),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.inner.settings
    }

    pub fn hub(&self) -> Arc<BroadcastHub<RescanSample>> {
        Arc::clone(&self.inner.hub)
    }

    pub fn has_wallet(&self) -> bool {
        self.inner.clients.wallet.is_some()
    }

    /// Whether rescans will be driven through the progress stream.
    pub fn uses_stream(&self) -> bool {
        self.inner.clients.stream.is_some()
            && self.inner.settings.source_mode.allows_stream()
    }

    /// Token cancelled on shutdown; sessions derive their own from it.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    #[instrument(skip(self), err)]
    pub fn trigger_rescan(&self, begin_height: i64) -> Result<RescanAccepted> {
        if !self.has_wallet() {
            return Err(RescanError::UpstreamUnavailable("Wallet RPC"));
        }
        validate_begin_height(begin_height)?;

        let rescan_id = self.reserve(
            RescanKind::Rescan,
            begin_height,
            self.inner.settings.rescan_grace_seconds,
        )?;
        info!(%rescan_id, begin_height, "wallet rescan accepted");

        self.spawn(rescan_id, Operation::Rescan { begin_height });

        Ok(RescanAccepted {
            rescan_id,
            begin_height,
            account: None,
        })
    }

    #[instrument(skip(self, xpub), err)]
    pub fn trigger_import(
        &self,
        xpub: &str,
        account_name: &str,
    ) -> Result<RescanAccepted> {
        if !self.has_wallet() {
            return Err(RescanError::UpstreamUnavailable("Wallet RPC"));
        }

        let xpub = xpub.trim();
        if !XPUB_PREFIXES.iter().any(|prefix| xpub.starts_with(prefix)) {
            return Err(RescanError::validation(
                crate::api::INVALID_XPUB_MESSAGE,
            ));
        }

        let account = match account_name.trim() {
            "" => DEFAULT_ACCOUNT_NAME.to_string(),
            name => name.to_string(),
        };

        let rescan_id = self.reserve(
            RescanKind::Import,
            0,
            self.inner.settings.import_grace_seconds,
        )?;
        info!(%rescan_id, account = %account, "xpub import accepted");

        self.spawn(
            rescan_id,
            Operation::Import {
                account: account.clone(),
                xpub: xpub.to_string(),
            },
        );

        Ok(RescanAccepted {
            rescan_id,
            begin_height: 0,
            account: Some(account),
        })
    }

    pub fn mark_pending(&self, grace_seconds: u32) {
        self.inner.state.lock().mark_pending(grace_seconds, Utc::now());
    }

    pub fn clear_pending(&self) {
        if self.inner.state.lock().clear_pending() {
            debug!("pending rescan flag cleared");
        }
    }

    pub fn pending(&self) -> Option<PendingRescan> {
        self.inner.state.lock().pending_at(Utc::now())
    }

    pub fn active(&self) -> Option<ActiveRescan> {
        self.inner.state.lock().active().cloned()
    }

    /// True while a rescan stream is open and feeding the hub.
    pub fn is_streaming(&self) -> bool {
        self.inner.state.lock().is_streaming()
    }

    pub fn snapshot(&self) -> RescanSnapshot {
        let (active, pending) = {
            let mut state = self.inner.state.lock();
            (state.active().cloned(), state.pending_at(Utc::now()))
        };

        RescanSnapshot {
            active,
            pending,
            subscribers: self.inner.hub.subscriber_count(),
            dropped_updates: self.inner.hub.dropped_count(),
            latest: self.inner.hub.latest(),
        }
    }

    /// Cancels background operations and waits for them to unwind.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();

        let handles = std::mem::take(&mut *self.inner.tasks.lock());
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(error = %err, "rescan task ended abnormally");
            }
        }
    }

    fn reserve(
        &self,
        kind: RescanKind,
        begin_height: i64,
        grace_seconds: u32,
    ) -> Result<Uuid> {
        if self.inner.shutdown.is_cancelled() {
            return Err(RescanError::UpstreamUnavailable("Rescan coordinator"));
        }

        let mut state = self.inner.state.lock();
        let now = Utc::now();
        let id = state.reserve(kind, begin_height, now)?;
        state.mark_pending(grace_seconds, now);
        Ok(id)
    }

    fn spawn(&self, id: Uuid, operation: Operation) {
        let inner = Arc::clone(&self.inner);
        let token = self.inner.shutdown.child_token();
        let handle = tokio::spawn(inner.run(id, operation, token));

        let mut tasks = self.inner.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }
}

fn validate_begin_height(begin_height: i64) -> Result<()> {
    if begin_height < 0 {
        return Err(RescanError::validation("beginHeight must not be negative"));
    }
    if i32::try_from(begin_height).is_err() {
        return Err(RescanError::validation(format!(
            "beginHeight {begin_height} is out of range"
        )));
    }
    Ok(())
}

/// Frees the slot and the pending flag however the task ends.
struct SlotGuard {
    inner: Arc<CoordinatorInner>,
    id: Uuid,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        state.release(self.id);
        state.clear_pending();
    }
}

impl CoordinatorInner {
    async fn run(
        self: Arc<Self>,
        id: Uuid,
        operation: Operation,
        token: CancellationToken,
    ) {
        let _slot = SlotGuard {
            inner: Arc::clone(&self),
            id,
        };

        tokio::select! {
            _ = token.cancelled() => {
                warn!(rescan_id = %id, "rescan task cancelled");
                let streaming = self
                    .state
                    .lock()
                    .active()
                    .is_some_and(|active| active.id == id && active.phase == RescanPhase::Streaming);
                if streaming {
                    self.finish_stream(id);
                }
            }
            outcome = self.drive(id, &operation) => match outcome {
                Ok(()) => info!(rescan_id = %id, "rescan task finished"),
                Err(err) => error!(rescan_id = %id, error = %err, "rescan task failed"),
            },
        }
    }

    async fn drive(&self, id: Uuid, operation: &Operation) -> Result<()> {
        let wallet = self
            .clients
            .wallet
            .clone()
            .ok_or(RescanError::UpstreamUnavailable("Wallet RPC"))?;

        let begin_height = match operation {
            Operation::Rescan { begin_height } => *begin_height,
            Operation::Import { account, xpub } => {
                info!(account = %account, "importing xpub");
                self.step("importxpub", wallet.import_xpub(account, xpub))
                    .await?;
                info!(account = %account, "xpub imported");
                0
            }
        };

        info!("discovering address usage");
        match self.step("discoverusage", wallet.discover_usage()).await {
            Ok(()) => info!("address discovery completed"),
            Err(err) => {
                warn!(error = %err, "address discovery failed, rescanning anyway")
            }
        }

        debug!(
            settle_ms = self.settings.settle_delay.as_millis() as u64,
            "waiting for wallet to load its transaction filter"
        );
        tokio::time::sleep(self.settings.settle_delay).await;

        match self.stream_client() {
            Some(stream) => self.stream_rescan(id, stream, begin_height).await,
            None => self.poll_rescan(id, wallet, begin_height).await,
        }
    }

    fn stream_client(&self) -> Option<Arc<dyn RescanStream>> {
        if self.settings.source_mode.allows_stream() {
            self.clients.stream.clone()
        } else {
            None
        }
    }

    async fn step<T>(
        &self,
        name: &'static str,
        call: impl Future<Output = std::result::Result<T, RpcError>>,
    ) -> Result<T> {
        match timeout(self.settings.step_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(RescanError::transient(name, err)),
            Err(_) => Err(RescanError::transient(
                name,
                RpcError::Timeout {
                    method: name,
                    after: self.settings.step_timeout,
                },
            )),
        }
    }

    async fn stream_rescan(
        &self,
        id: Uuid,
        stream: Arc<dyn RescanStream>,
        begin_height: i64,
    ) -> Result<()> {
        let start = i32::try_from(begin_height).map_err(|_| {
            RescanError::validation(format!(
                "beginHeight {begin_height} is out of range"
            ))
        })?;

        info!(begin_height, "opening wallet rescan stream");
        let mut updates = self.step("rescan", stream.rescan(start)).await?;
        self.state.lock().set_phase(id, RescanPhase::Streaming);

        let mut received = 0u64;
        let mut outcome = Ok(());
        while let Some(update) = updates.next().await {
            match update {
                Ok(height) => {
                    if received == 0 {
                        self.state.lock().clear_pending();
                    }
                    received += 1;
                    debug!(rescanned_through = height, "rescan progress");
                    self.hub.publish(RescanSample::from_stream(height));
                }
                Err(err) => {
                    warn!(error = %err, "rescan stream failed");
                    outcome = Err(RescanError::transient("rescan", err));
                    break;
                }
            }
        }

        info!(updates = received, "rescan stream ended");
        self.finish_stream(id);
        outcome
    }

    /// Frees the slot, then closes every subscription. A session that
    /// subscribes after the close no longer finds a streaming slot, so it
    /// cannot wait on a stream that already ended.
    fn finish_stream(&self, id: Uuid) {
        self.state.lock().release(id);
        self.hub.close_all();
    }

    async fn poll_rescan(
        &self,
        id: Uuid,
        wallet: Arc<dyn WalletRpc>,
        begin_height: i64,
    ) -> Result<()> {
        self.state.lock().set_phase(id, RescanPhase::Polling);
        info!(begin_height, "starting wallet rescan over JSON-RPC");

        match self
            .step("rescanwallet", wallet.rescan_wallet(begin_height))
            .await
        {
            Ok(()) => Ok(()),
            Err(err) if err.is_timeout() => {
                warn!(
                    error = %err,
                    "rescanwallet did not answer in time; wallet keeps rescanning"
                );
                self.watch_until_idle().await;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Holds the slot until the wallet log stops showing rescan activity.
    async fn watch_until_idle(&self) {
        let Some(source) = self.clients.log_watch.clone() else {
            return;
        };

        let mut heuristic = CompletionHeuristic::new(HeuristicConfig::default());
        let mut ticker = tokio::time::interval(self.settings.watch_interval);
        let mut seen_activity = false;

        loop {
            ticker.tick().await;
            let sample = match source.sample().await {
                Ok(sample) => sample,
                Err(err) => {
                    debug!(error = %err, "wallet log sample failed");
                    RescanSample::inactive()
                }
            };

            if sample.is_active && !seen_activity {
                seen_activity = true;
                self.state.lock().clear_pending();
            }

            if heuristic
                .observe(&sample, sample.scanned_height)
                .is_some_and(|status| status.is_terminal())
            {
                info!("wallet log shows no further rescan activity");
                return;
            }
        }
    }
}
