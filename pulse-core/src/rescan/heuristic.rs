use super::sample::RescanSample;

pub const DEFAULT_GRACE_TICKS: u32 = 5;
pub const DEFAULT_CLOSE_THRESHOLD: u32 = 5;
pub const PENDING_CLOSE_THRESHOLD: u32 = 30;

/// Thresholds for [`CompletionHeuristic`], in sampling ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeuristicConfig {
    /// Ticks after start during which inactive samples are not counted.
    pub grace_ticks: u32,
    /// Consecutive post-grace inactive samples that end the rescan.
    pub close_threshold: u32,
    /// A triggered operation is still preparing (address discovery, import).
    pub pending: bool,
}

impl Default for HeuristicConfig {
    fn default() -> Self {
        Self {
            grace_ticks: DEFAULT_GRACE_TICKS,
            close_threshold: DEFAULT_CLOSE_THRESHOLD,
            pending: false,
        }
    }
}

impl HeuristicConfig {
    /// Extended thresholds while a triggered operation has not yet reached
    /// the rescan phase. One tick per second, so the grace is in seconds.
    pub fn pending(grace_seconds: u32) -> Self {
        Self {
            grace_ticks: grace_seconds,
            close_threshold: PENDING_CLOSE_THRESHOLD,
            pending: true,
        }
    }
}

/// Classification of one tick of rescan observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStatus {
    Rescanning { height: i64 },
    /// Inactive but still inside the grace window.
    Starting { pending: bool },
    /// Inactive after the grace window; `misses` consecutive so far.
    Checking { misses: u32 },
    /// Terminal. Emitted exactly once.
    Complete { height: i64 },
    /// Nothing was running when observation began.
    Synced { height: i64 },
}

impl ProgressStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressStatus::Complete { .. })
    }
}

/// Decides from noisy samples when a rescan with no "done" signal has ended.
#[derive(Debug, Clone)]
pub struct CompletionHeuristic {
    config: HeuristicConfig,
    ticks_since_start: u32,
    consecutive_inactive: u32,
    finished: bool,
}

impl CompletionHeuristic {
    pub fn new(config: HeuristicConfig) -> Self {
        Self {
            config,
            ticks_since_start: 0,
            consecutive_inactive: 0,
            finished: false,
        }
    }

    pub fn config(&self) -> HeuristicConfig {
        self.config
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Classifies one sample. Returns `None` once `Complete` has been
    /// emitted.
    pub fn observe(
        &mut self,
        sample: &RescanSample,
        chain_height: i64,
    ) -> Option<ProgressStatus> {
        if self.finished {
            return None;
        }

        self.ticks_since_start = self.ticks_since_start.saturating_add(1);

        if sample.is_active {
            self.consecutive_inactive = 0;
            return Some(ProgressStatus::Rescanning {
                height: sample.scanned_height,
            });
        }

        if self.ticks_since_start <= self.config.grace_ticks {
            return Some(ProgressStatus::Starting {
                pending: self.config.pending,
            });
        }

        self.consecutive_inactive += 1;
        if self.consecutive_inactive >= self.config.close_threshold {
            self.finished = true;
            return Some(ProgressStatus::Complete {
                height: chain_height,
            });
        }

        Some(ProgressStatus::Checking {
            misses: self.consecutive_inactive,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inactive() -> RescanSample {
        RescanSample::inactive()
    }

    fn active(height: i64) -> RescanSample {
        RescanSample::from_stream(height)
    }

    #[test]
    fn grace_window_never_accumulates_misses() {
        let mut heuristic = CompletionHeuristic::new(HeuristicConfig::default());

        for _ in 0..DEFAULT_GRACE_TICKS {
            assert_eq!(
                heuristic.observe(&inactive(), 1000),
                Some(ProgressStatus::Starting { pending: false })
            );
        }

        assert_eq!(
            heuristic.observe(&inactive(), 1000),
            Some(ProgressStatus::Checking { misses: 1 })
        );
    }

    #[test]
    fn completes_once_after_threshold_then_goes_quiet() {
        let mut heuristic = CompletionHeuristic::new(HeuristicConfig {
            grace_ticks: 2,
            close_threshold: 3,
            pending: false,
        });

        let statuses: Vec<_> = (0..5)
            .filter_map(|_| heuristic.observe(&inactive(), 777))
            .collect();

        assert_eq!(
            statuses,
            vec![
                ProgressStatus::Starting { pending: false },
                ProgressStatus::Starting { pending: false },
                ProgressStatus::Checking { misses: 1 },
                ProgressStatus::Checking { misses: 2 },
                ProgressStatus::Complete { height: 777 },
            ]
        );
        assert!(heuristic.is_finished());
        assert_eq!(heuristic.observe(&inactive(), 777), None);
        assert_eq!(heuristic.observe(&active(10), 777), None);
    }

    #[test]
    fn active_sample_resets_miss_count() {
        let mut heuristic = CompletionHeuristic::new(HeuristicConfig {
            grace_ticks: 0,
            close_threshold: 3,
            pending: false,
        });

        heuristic.observe(&inactive(), 100);
        heuristic.observe(&inactive(), 100);
        assert_eq!(
            heuristic.observe(&active(50), 100),
            Some(ProgressStatus::Rescanning { height: 50 })
        );
        assert_eq!(
            heuristic.observe(&inactive(), 100),
            Some(ProgressStatus::Checking { misses: 1 })
        );
        assert_eq!(
            heuristic.observe(&inactive(), 100),
            Some(ProgressStatus::Checking { misses: 2 })
        );
        assert_eq!(
            heuristic.observe(&inactive(), 100),
            Some(ProgressStatus::Complete { height: 100 })
        );
    }

    #[test]
    fn pending_thresholds_extend_the_window() {
        let config = HeuristicConfig::pending(30);
        assert_eq!(config.grace_ticks, 30);
        assert_eq!(config.close_threshold, PENDING_CLOSE_THRESHOLD);

        let mut heuristic = CompletionHeuristic::new(config);
        for _ in 0..30 {
            assert_eq!(
                heuristic.observe(&inactive(), 1),
                Some(ProgressStatus::Starting { pending: true })
            );
        }
        for misses in 1..PENDING_CLOSE_THRESHOLD {
            assert_eq!(
                heuristic.observe(&inactive(), 1),
                Some(ProgressStatus::Checking { misses })
            );
        }
        assert!(
            heuristic
                .observe(&inactive(), 1)
                .is_some_and(|status| status.is_terminal())
        );
    }
}
