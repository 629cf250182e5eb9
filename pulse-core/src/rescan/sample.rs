use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;

/// One observation of the wallet's rescan activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RescanSample {
    pub is_active: bool,
    pub scanned_height: i64,
    pub sampled_at: DateTime<Utc>,
}

impl RescanSample {
    pub fn inactive() -> Self {
        Self::inactive_at(Utc::now())
    }

    pub fn inactive_at(sampled_at: DateTime<Utc>) -> Self {
        Self {
            is_active: false,
            scanned_height: 0,
            sampled_at,
        }
    }

    pub fn active_at(scanned_height: i64, sampled_at: DateTime<Utc>) -> Self {
        Self {
            is_active: true,
            scanned_height,
            sampled_at,
        }
    }

    /// A push update from the wallet's rescan stream. Every update means the
    /// rescan is still running.
    pub fn from_stream(rescanned_through: i64) -> Self {
        Self::active_at(rescanned_through, Utc::now())
    }
}

/// Pull-based source of rescan samples.
#[async_trait]
pub trait ProgressSource: Send + Sync {
    async fn sample(&self) -> Result<RescanSample>;

    /// Short label used in logs and health output.
    fn describe(&self) -> String;
}
