//! Upstream daemon clients.
//!
//! The rescan machinery only needs a handful of calls from dcrd and
//! dcrwallet. They are expressed as narrow traits so the coordinator can be
//! driven by scripted clients in tests; [`jsonrpc`] and [`grpc`] hold the
//! production implementations.

pub mod grpc;
pub mod jsonrpc;

use std::{path::PathBuf, time::Duration};

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

pub use grpc::{GrpcEndpoint, WalletGrpcClient};
pub use jsonrpc::{JsonRpcClient, JsonRpcEndpoint};

/// Cumulative "rescanned through height H" updates from the wallet.
pub type HeightStream = BoxStream<'static, Result<i64, RpcError>>;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("{method} timed out after {after:?}")]
    Timeout {
        method: &'static str,
        after: Duration,
    },

    #[error("{method} transport error: {source}")]
    Transport {
        method: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{method} returned error {code}: {message}")]
    Rpc {
        method: &'static str,
        code: i64,
        message: String,
    },

    #[error("{method} response could not be decoded: {reason}")]
    Decode {
        method: &'static str,
        reason: String,
    },

    #[error("gRPC call failed: {0}")]
    Status(Box<tonic::Status>),

    #[error("gRPC channel error: {0}")]
    Channel(#[from] tonic::transport::Error),

    #[error("failed to read certificate {path}: {source}")]
    Certificate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid client configuration: {0}")]
    Config(String),
}

impl RpcError {
    pub fn is_timeout(&self) -> bool {
        match self {
            RpcError::Timeout { .. } => true,
            RpcError::Status(status) => {
                status.code() == tonic::Code::DeadlineExceeded
            }
            _ => false,
        }
    }
}

impl From<tonic::Status> for RpcError {
    fn from(status: tonic::Status) -> Self {
        RpcError::Status(Box::new(status))
    }
}

/// Queries against the full node (dcrd).
#[async_trait]
pub trait NodeRpc: Send + Sync {
    /// Current chain tip height.
    async fn block_count(&self) -> Result<i64, RpcError>;
}

/// Long-running maintenance calls against the wallet (dcrwallet JSON-RPC).
#[async_trait]
pub trait WalletRpc: Send + Sync {
    async fn discover_usage(&self) -> Result<(), RpcError>;

    async fn import_xpub(
        &self,
        account: &str,
        xpub: &str,
    ) -> Result<(), RpcError>;

    /// Blocking rescan without a progress channel; returns when the wallet
    /// finishes.
    async fn rescan_wallet(&self, begin_height: i64) -> Result<(), RpcError>;
}

/// Streaming rescan call (dcrwallet gRPC `WalletService.Rescan`).
#[async_trait]
pub trait RescanStream: Send + Sync {
    async fn rescan(&self, begin_height: i32) -> Result<HeightStream, RpcError>;
}
