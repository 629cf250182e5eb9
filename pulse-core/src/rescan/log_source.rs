use std::{
    io::{ErrorKind, SeekFrom},
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt},
};
use tracing::{debug, warn};

use super::sample::{ProgressSource, RescanSample};
use crate::error::{RescanError, Result};

pub const DEFAULT_WALLET_LOG_PATH: &str =
    "/wallet-data/logs/mainnet/dcrwallet.log";

const DEFAULT_TAIL_LINES: usize = 100;
const DEFAULT_TAIL_BYTES: u64 = 64 * 1024;
const DEFAULT_MAX_AGE: Duration = Duration::from_secs(120);

const LOG_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

// 2025-10-05 15:23:16.672 [INF] WLLT: Rescanning block range [414000, 415999]...
static RESCAN_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}\.\d{3}).*Rescanning block range \[(\d+), (\d+)\]",
    )
    .expect("rescan log regex should compile")
});

/// Infers rescan activity from the tail of dcrwallet's log file.
#[derive(Debug, Clone)]
pub struct WalletLogSource {
    path: PathBuf,
    tail_lines: usize,
    tail_bytes: u64,
    max_age: Duration,
}

impl WalletLogSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            tail_lines: DEFAULT_TAIL_LINES,
            tail_bytes: DEFAULT_TAIL_BYTES,
            max_age: DEFAULT_MAX_AGE,
        }
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn with_tail_lines(mut self, tail_lines: usize) -> Self {
        self.tail_lines = tail_lines.max(1);
        self
    }

    pub fn with_tail_bytes(mut self, tail_bytes: u64) -> Self {
        self.tail_bytes = tail_bytes.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Samples the log as if the current time were `now`.
    pub async fn sample_at(&self, now: DateTime<Utc>) -> Result<RescanSample> {
        let Some(tail) = self.read_tail().await? else {
            return Ok(RescanSample::inactive_at(now));
        };

        Ok(scan_tail(&tail, now, self.tail_lines, self.max_age))
    }

    /// Returns `None` when the log does not exist yet.
    async fn read_tail(&self) -> Result<Option<String>> {
        let read_error = |source| RescanError::LogRead {
            path: self.path.clone(),
            source,
        };

        let mut file = match File::open(&self.path).await {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "wallet log not present yet");
                return Ok(None);
            }
            Err(err) => return Err(read_error(err)),
        };

        let len = file.metadata().await.map_err(read_error)?.len();
        let offset = len.saturating_sub(self.tail_bytes);
        if offset > 0 {
            file.seek(SeekFrom::Start(offset)).await.map_err(read_error)?;
        }

        let mut buf = Vec::with_capacity((len - offset) as usize);
        file.read_to_end(&mut buf).await.map_err(read_error)?;

        let text = String::from_utf8_lossy(&buf);
        let text = if offset > 0 {
            // drop the partial first line of the window
            match text.find('\n') {
                Some(idx) => &text[idx + 1..],
                None => "",
            }
        } else {
            &text[..]
        };

        Ok(Some(text.to_owned()))
    }
}

#[async_trait]
impl ProgressSource for WalletLogSource {
    async fn sample(&self) -> Result<RescanSample> {
        self.sample_at(Utc::now()).await
    }

    fn describe(&self) -> String {
        format!("wallet log {}", self.path.display())
    }
}

/// Walks the last `tail_lines` lines newest-first. The newest parseable
/// rescan line decides: fresh means active at its end height, stale means
/// inactive.
pub(crate) fn scan_tail(
    text: &str,
    now: DateTime<Utc>,
    tail_lines: usize,
    max_age: Duration,
) -> RescanSample {
    let max_age = chrono::Duration::from_std(max_age)
        .unwrap_or_else(|_| chrono::Duration::MAX);

    for line in text.lines().rev().take(tail_lines) {
        let Some(caps) = RESCAN_LINE.captures(line) else {
            continue;
        };

        let stamp = &caps[1];
        let logged_at =
            match NaiveDateTime::parse_from_str(stamp, LOG_TIMESTAMP_FORMAT) {
                Ok(naive) => naive.and_utc(),
                Err(err) => {
                    warn!(timestamp = stamp, error = %err, "unparseable wallet log timestamp");
                    continue;
                }
            };

        let age = now.signed_duration_since(logged_at);
        if age > max_age {
            debug!(
                age_secs = age.num_seconds(),
                "newest rescan line is stale, treating rescan as inactive"
            );
            return RescanSample::inactive_at(now);
        }

        let Ok(end_height) = caps[3].parse::<i64>() else {
            continue;
        };

        return RescanSample::active_at(end_height, now);
    }

    RescanSample::inactive_at(now)
}
