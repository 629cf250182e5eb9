//! # Pulse Core
//!
//! Wallet rescan progress tracking for the Decred Pulse backend.
//!
//! ## Overview
//!
//! A dcrwallet rescan can run for half an hour and never announces that it
//! is done. `pulse-core` infers its progress and end:
//!
//! - **Progress sources**: the gRPC rescan stream and the wallet log tail,
//!   normalized into [`rescan::RescanSample`]s
//! - **Completion heuristic**: grace windows and consecutive-miss counting
//! - **Broadcast hub**: bounded, non-blocking fan-out to every client
//! - **Coordinator**: one rescan at a time, run in the background
//! - **Progress sessions**: per-connection reporting with keep-alives
//!
//! ## Architecture
//!
//! - [`rpc`]: dcrd/dcrwallet client traits and their JSON-RPC and gRPC
//!   implementations
//! - [`rescan`]: sources, heuristic, hub, coordinator and sessions
//! - [`api`]: JSON bodies exchanged with dashboard clients
//! - [`error`]: the crate error type
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use pulse_core::rescan::{
//!     ChainHeightCache, CoordinatorSettings, RescanCoordinator, WalletClients,
//!     WalletLogSource,
//! };
//!
//! # async fn demo() -> pulse_core::Result<()> {
//! let coordinator = RescanCoordinator::new(
//!     WalletClients {
//!         log_watch: Some(Arc::new(WalletLogSource::new(
//!             "/wallet-data/logs/mainnet/dcrwallet.log",
//!         ))),
//!         ..WalletClients::default()
//!     },
//!     CoordinatorSettings::default(),
//! );
//! let chain = ChainHeightCache::new(None);
//!
//! let report =
//!     pulse_core::rescan::point_in_time_report(&coordinator, &chain, None)
//!         .await?;
//! println!("{}", report.message);
//! # Ok(())
//! # }
//! ```

#![allow(missing_docs)]

pub mod api;
pub mod error;
pub mod rescan;
pub mod rpc;

pub use error::{RescanError, Result};
