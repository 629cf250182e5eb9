//! Wallet rescan tracking.
//!
//! dcrwallet gives no reliable "rescan finished" signal. Progress is
//! inferred from the gRPC rescan stream when this service started the
//! rescan itself, and from the wallet log otherwise. The pieces:
//!
//! * [`sample`]: the normalized observation and the [`ProgressSource`] seam
//! * [`log_source`]: the wallet log tail adapter
//! * [`heuristic`]: grace periods and miss counting
//! * [`hub`]: bounded fan-out to connected clients
//! * [`coordinator`]: the single rescan slot and its background task
//! * [`session`]: per-connection reporting

pub mod chain;
pub mod coordinator;
pub mod heuristic;
pub mod hub;
pub mod log_source;
pub mod sample;
pub mod session;
pub mod state;

pub use chain::ChainHeightCache;
pub use coordinator::{
    CoordinatorSettings, RescanAccepted, RescanCoordinator, RescanSnapshot,
    SourceMode, WalletClients,
};
pub use heuristic::{CompletionHeuristic, HeuristicConfig, ProgressStatus};
pub use hub::{BroadcastHub, Subscription};
pub use log_source::{DEFAULT_WALLET_LOG_PATH, WalletLogSource};
pub use sample::{ProgressSource, RescanSample};
pub use session::{
    ProgressSession, ReportSink, SessionEnd, SessionTiming, SinkClosed,
    point_in_time_report,
};
pub use state::{
    ActiveRescan, PendingRescan, RescanKind, RescanPhase, RescanState,
};
