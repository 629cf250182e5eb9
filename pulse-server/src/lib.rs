//! # Pulse Server
//!
//! REST and WebSocket surface for wallet rescans.
//!
//! - `POST /api/wallet/rescan` and `POST /api/wallet/import-key` start a
//!   background operation on the shared [`pulse_core::rescan::RescanCoordinator`]
//! - `GET /api/wallet/sync-progress` answers with a point-in-time report
//! - `GET /api/wallet/stream-progress` upgrades to a WebSocket that carries
//!   live progress reports until the rescan ends
//! - `GET /api/health` summarizes upstream wiring and rescan state

pub mod handlers;
pub mod infra;
pub mod routes;
