use std::{fmt, sync::Arc};

use pulse_core::rescan::{
    ChainHeightCache, ProgressSession, ProgressSource, RescanCoordinator,
    SessionTiming,
};

/// What was wired at startup, reported by the health endpoint.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpstreamWiring {
    pub node: bool,
    pub wallet: bool,
    pub wallet_grpc: bool,
}

#[derive(Clone)]
pub struct AppState {
    pub coordinator: RescanCoordinator,
    pub chain: Arc<ChainHeightCache>,
    /// Wallet log adapter. Absent when the progress source is `stream`.
    pub wallet_log: Option<Arc<dyn ProgressSource>>,
    pub session_timing: SessionTiming,
    pub upstreams: UpstreamWiring,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("upstreams", &self.upstreams)
            .field(
                "wallet_log",
                &self.wallet_log.as_ref().map(|log| log.describe()),
            )
            .finish_non_exhaustive()
    }
}

impl AppState {
    pub fn new(
        coordinator: RescanCoordinator,
        chain: Arc<ChainHeightCache>,
        wallet_log: Option<Arc<dyn ProgressSource>>,
    ) -> Self {
        let upstreams = UpstreamWiring {
            node: chain.has_node(),
            wallet: coordinator.has_wallet(),
            wallet_grpc: coordinator.uses_stream(),
        };
        Self {
            coordinator,
            chain,
            wallet_log,
            session_timing: SessionTiming::default(),
            upstreams,
        }
    }

    pub fn with_session_timing(mut self, timing: SessionTiming) -> Self {
        self.session_timing = timing;
        self
    }

    /// A fresh per-connection progress session.
    pub fn progress_session(&self) -> ProgressSession {
        ProgressSession::new(self.coordinator.clone(), Arc::clone(&self.chain))
            .with_log_source(self.wallet_log.clone())
            .with_timing(self.session_timing)
    }
}
