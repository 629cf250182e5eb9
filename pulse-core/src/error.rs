use std::path::PathBuf;

use thiserror::Error;

use crate::rpc::RpcError;

#[derive(Error, Debug)]
pub enum RescanError {
    #[error("{0} client not initialized")]
    UpstreamUnavailable(&'static str),

    #[error("{0}")]
    Validation(String),

    #[error("{step} failed: {source}")]
    TransientRpc {
        step: &'static str,
        #[source]
        source: RpcError,
    },

    #[error("failed to read wallet log {path}: {source}")]
    LogRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("a wallet rescan is already running")]
    AlreadyRunning,
}

impl RescanError {
    pub fn validation(message: impl Into<String>) -> Self {
        RescanError::Validation(message.into())
    }

    pub(crate) fn transient(step: &'static str, source: RpcError) -> Self {
        RescanError::TransientRpc { step, source }
    }

    /// The upstream call ran out of time; the daemon may still be working.
    pub fn is_timeout(&self) -> bool {
        matches!(self, RescanError::TransientRpc { source, .. } if source.is_timeout())
    }
}

pub type Result<T> = std::result::Result<T, RescanError>;
