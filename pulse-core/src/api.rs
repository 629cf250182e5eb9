//! JSON shapes exchanged with dashboard clients.

use serde::{Deserialize, Serialize};

use crate::rescan::ProgressStatus;

pub const SYNCED_MESSAGE: &str = "Wallet fully synced";
pub const COMPLETE_MESSAGE: &str = "Rescan complete";
pub const NO_ACTIVE_RESCAN_MESSAGE: &str = "No active rescan";
pub const INVALID_XPUB_MESSAGE: &str =
    "Invalid xpub format. Decred mainnet xpubs must start with 'dpub'";

/// Percentage of the chain covered, clamped to `0..=100`. Unknown chain
/// height yields 0.
pub fn progress_percent(scanned: i64, chain: i64) -> f64 {
    if chain <= 0 {
        return 0.0;
    }
    (scanned as f64 / chain as f64 * 100.0).clamp(0.0, 100.0)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressReport {
    pub is_rescanning: bool,
    pub scan_height: i64,
    pub chain_height: i64,
    pub progress: f64,
    pub message: String,
}

impl ProgressReport {
    pub fn from_status(status: ProgressStatus, chain_height: i64) -> Self {
        match status {
            ProgressStatus::Rescanning { height } => Self {
                is_rescanning: true,
                scan_height: height,
                chain_height,
                progress: progress_percent(height, chain_height),
                message: format!(
                    "Rescanning... {height}/{chain_height} blocks"
                ),
            },
            ProgressStatus::Starting { pending } => Self::waiting(
                chain_height,
                if pending {
                    "Discovering addresses, rescan will start soon..."
                } else {
                    "Starting rescan..."
                },
            ),
            ProgressStatus::Checking { .. } => {
                Self::waiting(chain_height, "Checking rescan status...")
            }
            ProgressStatus::Complete { height } => Self {
                is_rescanning: false,
                scan_height: height,
                chain_height,
                progress: progress_percent(height, chain_height),
                message: COMPLETE_MESSAGE.to_string(),
            },
            ProgressStatus::Synced { height } => Self::synced(height),
        }
    }

    /// Idle answer when no rescan was running at connect time.
    pub fn synced(chain_height: i64) -> Self {
        Self {
            is_rescanning: false,
            scan_height: chain_height,
            chain_height,
            progress: 100.0,
            message: SYNCED_MESSAGE.to_string(),
        }
    }

    /// Point-in-time answer when nothing is rescanning.
    pub fn no_active_rescan(chain_height: i64) -> Self {
        Self {
            is_rescanning: false,
            scan_height: 0,
            chain_height,
            progress: 100.0,
            message: NO_ACTIVE_RESCAN_MESSAGE.to_string(),
        }
    }

    /// Final report sent when the rescan stream ends.
    pub fn complete(scan_height: i64, chain_height: i64) -> Self {
        Self {
            is_rescanning: false,
            scan_height,
            chain_height,
            progress: progress_percent(scan_height, chain_height),
            message: COMPLETE_MESSAGE.to_string(),
        }
    }

    fn waiting(chain_height: i64, message: &str) -> Self {
        Self {
            is_rescanning: false,
            scan_height: 0,
            chain_height,
            progress: 0.0,
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RescanRequest {
    #[serde(default)]
    pub begin_height: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportKeyRequest {
    #[serde(default, alias = "xpub")]
    pub key: String,
    #[serde(default)]
    pub account_name: String,
}

/// Acknowledgement for wallet actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResponse {
    pub success: bool,
    pub message: String,
}

impl ActionResponse {
    pub fn accepted(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn progress_is_clamped() {
        assert_eq!(progress_percent(500, 1000), 50.0);
        assert_eq!(progress_percent(1500, 1000), 100.0);
        assert_eq!(progress_percent(-5, 1000), 0.0);
        assert_eq!(progress_percent(500, 0), 0.0);
    }

    #[test]
    fn report_uses_camel_case_wire_names() {
        let report = ProgressReport::from_status(
            ProgressStatus::Rescanning { height: 500 },
            1000,
        );
        assert_eq!(
            serde_json::to_value(&report).unwrap(),
            json!({
                "isRescanning": true,
                "scanHeight": 500,
                "chainHeight": 1000,
                "progress": 50.0,
                "message": "Rescanning... 500/1000 blocks",
            })
        );
    }

    #[test]
    fn pending_start_mentions_discovery() {
        let report = ProgressReport::from_status(
            ProgressStatus::Starting { pending: true },
            10,
        );
        assert!(!report.is_rescanning);
        assert!(report.message.starts_with("Discovering addresses"));
    }

    #[test]
    fn import_request_accepts_xpub_alias() {
        let request: ImportKeyRequest =
            serde_json::from_value(json!({ "xpub": "dpubABC" })).unwrap();
        assert_eq!(request.key, "dpubABC");
        assert_eq!(request.account_name, "");
    }

    #[test]
    fn synced_report_is_full() {
        let report = ProgressReport::synced(0);
        assert_eq!(report.progress, 100.0);
        assert_eq!(report.message, SYNCED_MESSAGE);
    }
}
