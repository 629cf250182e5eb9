use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicI64, Ordering},
    },
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use tokio::time::timeout;
use tracing::debug;

use crate::rpc::NodeRpc;

pub const DEFAULT_HEIGHT_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

/// Shared view of the chain tip. Refreshed from the node at most once per
/// interval no matter how many sessions ask; a failed refresh keeps the
/// previous value. Zero means unknown.
pub struct ChainHeightCache {
    node: Option<Arc<dyn NodeRpc>>,
    height: AtomicI64,
    last_refresh: Mutex<Option<Instant>>,
    refresh_interval: Duration,
    call_timeout: Duration,
}

impl fmt::Debug for ChainHeightCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainHeightCache")
            .field("has_node", &self.node.is_some())
            .field("height", &self.current())
            .field("refresh_interval", &self.refresh_interval)
            .finish_non_exhaustive()
    }
}

impl ChainHeightCache {
    pub fn new(node: Option<Arc<dyn NodeRpc>>) -> Self {
        Self {
            node,
            height: AtomicI64::new(0),
            last_refresh: Mutex::new(None),
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            call_timeout: DEFAULT_HEIGHT_TIMEOUT,
        }
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn has_node(&self) -> bool {
        self.node.is_some()
    }

    pub fn current(&self) -> i64 {
        self.height.load(Ordering::Relaxed)
    }

    /// Returns the tip, querying the node if the cached value is older than
    /// the refresh interval.
    pub async fn refresh(&self) -> i64 {
        let Some(node) = self.node.as_ref() else {
            return self.current();
        };

        {
            let mut last = self.last_refresh.lock();
            let now = Instant::now();
            if last.is_some_and(|at| now.duration_since(at) < self.refresh_interval)
            {
                return self.current();
            }
            // claim this refresh so concurrent callers reuse the cached value
            *last = Some(now);
        }

        match timeout(self.call_timeout, node.block_count()).await {
            Ok(Ok(height)) => {
                self.height.store(height, Ordering::Relaxed);
                height
            }
            Ok(Err(err)) => {
                debug!(error = %err, "getblockcount failed, keeping cached height");
                self.current()
            }
            Err(_) => {
                debug!(
                    timeout_ms = self.call_timeout.as_millis() as u64,
                    "getblockcount timed out, keeping cached height"
                );
                self.current()
            }
        }
    }
}
