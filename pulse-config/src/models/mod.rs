pub mod sources;

use std::{fmt, path::PathBuf, time::Duration};

use pulse_core::rescan::SourceMode;

pub const DEFAULT_SERVER_HOST: &str = "0.0.0.0";
pub const DEFAULT_SERVER_PORT: u16 = 8080;
pub const DEFAULT_NODE_PORT: u16 = 9109;
pub const DEFAULT_WALLET_PORT: u16 = 9110;
pub const DEFAULT_WALLET_GRPC_PORT: u16 = 9111;
pub const DEFAULT_RPC_HOST: &str = "localhost";
pub const DEFAULT_LOG_MAX_AGE_SECS: u64 = 120;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    /// dcrd JSON-RPC.
    pub node: RpcEndpointConfig,
    /// dcrwallet JSON-RPC.
    pub wallet: RpcEndpointConfig,
    pub wallet_grpc: WalletGrpcConfig,
    pub wallet_log: WalletLogConfig,
    pub rescan: RescanConfig,
    pub cors: CorsConfig,
    pub metadata: ConfigMetadata,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A btcd-style JSON-RPC daemon.
#[derive(Clone)]
pub struct RpcEndpointConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub cert: Option<PathBuf>,
}

impl RpcEndpointConfig {
    /// Clients are only built when both credentials are present.
    pub fn is_configured(&self) -> bool {
        !self.user.is_empty() && !self.password.is_empty()
    }
}

impl fmt::Debug for RpcEndpointConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcEndpointConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field(
                "password",
                &if self.password.is_empty() { "" } else { "<redacted>" },
            )
            .field("cert", &self.cert)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct WalletGrpcConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    /// dcrwallet's `rpc.cert`; verifies the wallet and, with `key`, is
    /// presented back as the client certificate.
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct WalletLogConfig {
    pub path: PathBuf,
    pub max_age: Duration,
}

#[derive(Debug, Clone)]
pub struct RescanConfig {
    pub progress_source: SourceMode,
    pub settle_delay: Duration,
    pub step_timeout: Duration,
    pub rescan_grace_seconds: u32,
    pub import_grace_seconds: u32,
}

#[derive(Debug, Clone)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub allow_credentials: bool,
}

impl CorsConfig {
    pub fn is_wildcard_included(&self) -> bool {
        self.allowed_origins.iter().any(|origin| origin == "*")
    }

    pub fn allows_any_header(&self) -> bool {
        self.allowed_headers.iter().any(|header| header == "*")
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}
