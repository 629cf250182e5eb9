//! Per-connection progress reporting.
//!
//! A [`ProgressSession`] turns the hub's sample sequence and the wallet log
//! into timed [`ProgressReport`]s for one client. It moves between three
//! modes:
//!
//! * **Idle**: nothing running. The client got one "fully synced" report;
//!   the log is polled every sampling tick and the client is pinged every
//!   keep-alive tick.
//! * **Monitoring**: the log shows activity or an operation is pending. Each
//!   tick is classified by a [`CompletionHeuristic`] and reported, with an
//!   unreadable log counted as inactive; the session ends on `Complete`.
//! * **Streaming**: the rescan stream feeds the hub. Each sample is reported
//!   and the last report is repeated when the stream goes quiet; hub closure
//!   ends the session with a final "Rescan complete".

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::{Instant, MissedTickBehavior, interval, interval_at, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    chain::ChainHeightCache,
    coordinator::RescanCoordinator,
    heuristic::{CompletionHeuristic, HeuristicConfig, ProgressStatus},
    hub::Subscription,
    sample::{ProgressSource, RescanSample},
};
use crate::{api::ProgressReport, error::Result};

#[derive(Debug, Error)]
#[error("progress client disconnected")]
pub struct SinkClosed;

/// Outbound half of a progress connection.
#[async_trait]
pub trait ReportSink: Send {
    async fn send_report(
        &mut self,
        report: &ProgressReport,
    ) -> std::result::Result<(), SinkClosed>;

    /// Liveness probe while nothing is reported.
    async fn ping(&mut self) -> std::result::Result<(), SinkClosed>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTiming {
    pub sample_interval: Duration,
    pub keepalive_interval: Duration,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(1),
            keepalive_interval: Duration::from_secs(5),
        }
    }
}

/// Why a session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The rescan finished and the final report was delivered.
    Completed,
    ClientGone,
    Cancelled,
}

enum Next {
    Monitor {
        config: HeuristicConfig,
        first: Option<RescanSample>,
    },
    Stream {
        first: Option<RescanSample>,
    },
    End(SessionEnd),
}

pub struct ProgressSession {
    coordinator: RescanCoordinator,
    chain: Arc<ChainHeightCache>,
    log: Option<Arc<dyn ProgressSource>>,
    timing: SessionTiming,
    cancel: CancellationToken,
}

impl fmt::Debug for ProgressSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressSession")
            .field("log", &self.log.as_ref().map(|log| log.describe()))
            .field("timing", &self.timing)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl ProgressSession {
    pub fn new(
        coordinator: RescanCoordinator,
        chain: Arc<ChainHeightCache>,
    ) -> Self {
        let cancel = coordinator.shutdown_token().child_token();
        Self {
            coordinator,
            chain,
            log: None,
            timing: SessionTiming::default(),
            cancel,
        }
    }

    /// Enables log-based monitoring.
    pub fn with_log_source(mut self, log: Option<Arc<dyn ProgressSource>>) -> Self {
        self.log = log;
        self
    }

    pub fn with_timing(mut self, timing: SessionTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Token that stops the session, e.g. when the client hangs up.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run<S: ReportSink>(self, sink: &mut S) -> SessionEnd {
        let hub = self.coordinator.hub();
        let mut subscription = hub.subscribe();

        let mut next = if self.coordinator.is_streaming() {
            Next::Stream { first: None }
        } else if let Some(pending) = self.coordinator.pending()
            && self.log.is_some()
        {
            Next::Monitor {
                config: HeuristicConfig::pending(pending.grace_seconds),
                first: None,
            }
        } else {
            let chain_height = self.chain.refresh().await;
            let greeting = if self.coordinator.pending().is_some() {
                ProgressReport::from_status(
                    ProgressStatus::Starting { pending: true },
                    chain_height,
                )
            } else {
                ProgressReport::synced(chain_height)
            };
            if sink.send_report(&greeting).await.is_err() {
                return SessionEnd::ClientGone;
            }
            self.idle(sink, &mut subscription).await
        };

        loop {
            next = match next {
                Next::Monitor { config, first } => {
                    self.monitor(sink, &mut subscription, config, first).await
                }
                Next::Stream { first } => {
                    self.stream(sink, &mut subscription, first).await
                }
                Next::End(end) => {
                    debug!(subscriber = %subscription.id(), ?end, "progress session ended");
                    return end;
                }
            };
        }
    }

    async fn idle<S: ReportSink>(
        &self,
        sink: &mut S,
        subscription: &mut Subscription<RescanSample>,
    ) -> Next {
        let start = Instant::now();
        let mut sample_tick =
            interval_at(start + self.timing.sample_interval, self.timing.sample_interval);
        sample_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ping_tick = interval_at(
            start + self.timing.keepalive_interval,
            self.timing.keepalive_interval,
        );
        ping_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Next::End(SessionEnd::Cancelled),
                item = subscription.recv() => match item {
                    Some(sample) => return Next::Stream { first: Some(sample) },
                    None => {
                        debug!("progress hub closed while idle, resubscribing");
                        *subscription = self.coordinator.hub().subscribe();
                    }
                },
                _ = sample_tick.tick() => {
                    if self.coordinator.is_streaming() {
                        return Next::Stream { first: None };
                    }
                    let Some(log) = self.log.as_ref() else {
                        continue;
                    };
                    if let Some(pending) = self.coordinator.pending() {
                        return Next::Monitor {
                            config: HeuristicConfig::pending(pending.grace_seconds),
                            first: None,
                        };
                    }
                    match log.sample().await {
                        Ok(sample) if sample.is_active => {
                            info!(scanned_height = sample.scanned_height, "rescan activity detected in wallet log");
                            return Next::Monitor {
                                config: HeuristicConfig::default(),
                                first: Some(sample),
                            };
                        }
                        Ok(_) => {}
                        Err(err) => debug!(error = %err, "wallet log sample failed"),
                    }
                }
                _ = ping_tick.tick() => {
                    if sink.ping().await.is_err() {
                        return Next::End(SessionEnd::ClientGone);
                    }
                }
            }
        }
    }

    async fn monitor<S: ReportSink>(
        &self,
        sink: &mut S,
        subscription: &mut Subscription<RescanSample>,
        config: HeuristicConfig,
        first: Option<RescanSample>,
    ) -> Next {
        let Some(log) = self.log.clone() else {
            return Next::Stream { first: None };
        };

        debug!(
            grace_ticks = config.grace_ticks,
            close_threshold = config.close_threshold,
            "monitoring wallet log"
        );
        let mut heuristic = CompletionHeuristic::new(config);

        if let Some(sample) = first
            && let Some(end) = self.report(sink, &mut heuristic, &sample).await
        {
            return Next::End(end);
        }

        let start = Instant::now();
        let mut tick =
            interval_at(start + self.timing.sample_interval, self.timing.sample_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ping_tick = interval_at(
            start + self.timing.keepalive_interval,
            self.timing.keepalive_interval,
        );
        ping_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Next::End(SessionEnd::Cancelled),
                item = subscription.recv() => match item {
                    Some(sample) => return Next::Stream { first: Some(sample) },
                    None => *subscription = self.coordinator.hub().subscribe(),
                },
                _ = tick.tick() => {
                    if self.coordinator.is_streaming() {
                        return Next::Stream { first: None };
                    }
                    // An unreadable log counts as a tick without activity.
                    let sample = match log.sample().await {
                        Ok(sample) => sample,
                        Err(err) => {
                            warn!(error = %err, "wallet log sample failed");
                            RescanSample::inactive()
                        }
                    };
                    if let Some(end) = self.report(sink, &mut heuristic, &sample).await {
                        return Next::End(end);
                    }
                }
                _ = ping_tick.tick() => {
                    if sink.ping().await.is_err() {
                        return Next::End(SessionEnd::ClientGone);
                    }
                }
            }
        }
    }

    /// Classifies and sends one sample. Returns the session end if the
    /// client is gone or the heuristic declared completion.
    async fn report<S: ReportSink>(
        &self,
        sink: &mut S,
        heuristic: &mut CompletionHeuristic,
        sample: &RescanSample,
    ) -> Option<SessionEnd> {
        let chain_height = self.chain.refresh().await;
        let status = heuristic.observe(sample, chain_height)?;
        let report = ProgressReport::from_status(status, chain_height);

        if sink.send_report(&report).await.is_err() {
            return Some(SessionEnd::ClientGone);
        }

        if status.is_terminal() {
            info!("no rescan activity left, closing progress session");
            self.coordinator.clear_pending();
            return Some(SessionEnd::Completed);
        }
        None
    }

    async fn stream<S: ReportSink>(
        &self,
        sink: &mut S,
        subscription: &mut Subscription<RescanSample>,
        first: Option<RescanSample>,
    ) -> Next {
        let mut heuristic = CompletionHeuristic::new(HeuristicConfig::default());
        let mut last_height = 0;
        let mut last_report: Option<ProgressReport> = None;

        let mut pending_sample =
            first.or_else(|| self.coordinator.hub().latest());

        loop {
            if let Some(sample) = pending_sample.take() {
                let chain_height = self.chain.refresh().await;
                last_height = sample.scanned_height;
                if let Some(status) = heuristic.observe(&sample, chain_height) {
                    let report = ProgressReport::from_status(status, chain_height);
                    if sink.send_report(&report).await.is_err() {
                        return Next::End(SessionEnd::ClientGone);
                    }
                    last_report = Some(report);
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return Next::End(SessionEnd::Cancelled),
                item = subscription.recv() => match item {
                    Some(sample) => pending_sample = Some(sample),
                    None => {
                        let chain_height = self.chain.refresh().await;
                        let height = if chain_height > 0 { chain_height } else { last_height };
                        let report = ProgressReport::complete(height, chain_height);
                        info!(rescanned_through = last_height, "rescan stream closed, sending final report");
                        if sink.send_report(&report).await.is_err() {
                            return Next::End(SessionEnd::ClientGone);
                        }
                        self.coordinator.clear_pending();
                        return Next::End(SessionEnd::Completed);
                    }
                },
                _ = sleep(self.timing.keepalive_interval) => {
                    let delivered = match last_report.as_ref() {
                        Some(report) => sink.send_report(report).await,
                        None => sink.ping().await,
                    };
                    if delivered.is_err() {
                        return Next::End(SessionEnd::ClientGone);
                    }
                }
            }
        }
    }
}

/// One-shot report for polling clients. Prefers the latest stream sample,
/// then the wallet log.
pub async fn point_in_time_report(
    coordinator: &RescanCoordinator,
    chain: &ChainHeightCache,
    log: Option<&dyn ProgressSource>,
) -> Result<ProgressReport> {
    let sample = match coordinator.hub().latest() {
        Some(sample) if coordinator.is_streaming() => sample,
        _ => match log {
            Some(log) => log.sample().await?,
            None => RescanSample::inactive(),
        },
    };

    let chain_height = chain.refresh().await;
    if sample.is_active {
        Ok(ProgressReport::from_status(
            ProgressStatus::Rescanning {
                height: sample.scanned_height,
            },
            chain_height,
        ))
    } else {
        Ok(ProgressReport::no_active_rescan(chain_height))
    }
}
