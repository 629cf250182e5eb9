//! Configuration for the Decred Pulse backend.
//!
//! Values are layered: environment variables (optionally seeded from a
//! `.env` file) override an optional `pulse.toml`, which overrides built-in
//! defaults. [`ConfigLoader`] performs the composition and runs the guard
//! rails in [`validation`] before handing back a typed [`Config`].

#![allow(missing_docs)]

pub mod loader;
pub mod models;
pub mod validation;

pub use loader::{ConfigLoad, ConfigLoadError, ConfigLoader, ConfigLoaderOptions};
pub use models::{
    Config, ConfigMetadata, CorsConfig, RescanConfig, RpcEndpointConfig,
    ServerConfig, WalletGrpcConfig, WalletLogConfig,
};
pub use validation::{ConfigGuardRailError, ConfigWarning, ConfigWarnings};
