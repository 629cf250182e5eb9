use serde::{Deserialize, Serialize};
use std::{path::PathBuf, str::FromStr};

/// Raw configuration as defined in a TOML file.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub server: FileServerConfig,
    #[serde(default)]
    pub node: FileRpcConfig,
    #[serde(default)]
    pub wallet: FileRpcConfig,
    #[serde(default)]
    pub wallet_grpc: FileWalletGrpcConfig,
    #[serde(default)]
    pub wallet_log: FileWalletLogConfig,
    #[serde(default)]
    pub rescan: FileRescanConfig,
    #[serde(default)]
    pub cors: FileCorsConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileServerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileRpcConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert: Option<PathBuf>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileWalletGrpcConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<PathBuf>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileWalletLogConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_age_secs: Option<u64>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileRescanConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settle_delay_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rescan_grace_seconds: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub import_grace_seconds: Option<u32>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileCorsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_origins: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_methods: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_headers: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_credentials: Option<bool>,
}

/// Environment-derived configuration values.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub server_host: Option<String>,
    pub server_port: Option<u16>,
    pub node: EnvRpcConfig,
    pub wallet: EnvRpcConfig,
    pub wallet_grpc_enabled: Option<bool>,
    pub wallet_grpc_host: Option<String>,
    pub wallet_grpc_port: Option<u16>,
    pub wallet_grpc_cert: Option<PathBuf>,
    pub wallet_grpc_key: Option<PathBuf>,
    pub wallet_log_path: Option<PathBuf>,
    pub progress_source: Option<String>,
    pub settle_delay_secs: Option<u64>,
    pub rescan_grace_seconds: Option<u32>,
    pub import_grace_seconds: Option<u32>,
    pub cors_allowed_origins: Option<Vec<String>>,
    pub cors_allowed_methods: Option<Vec<String>>,
    pub cors_allowed_headers: Option<Vec<String>>,
    pub cors_allow_credentials: Option<bool>,
}

#[derive(Debug, Default, Clone)]
pub struct EnvRpcConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub cert: Option<PathBuf>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the environment layer from an arbitrary variable lookup.
    /// Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);

        Self {
            config_path: vars.path("PULSE_CONFIG"),
            server_host: vars.string("SERVER_HOST"),
            server_port: vars
                .parsed("SERVER_PORT")
                .or_else(|| vars.parsed("PORT")),
            node: vars.rpc("DCRD_RPC"),
            wallet: vars.rpc("DCRWALLET_RPC"),
            wallet_grpc_enabled: vars.flag("DCRWALLET_GRPC_ENABLED"),
            wallet_grpc_host: vars.string("DCRWALLET_GRPC_HOST"),
            wallet_grpc_port: vars.parsed("DCRWALLET_GRPC_PORT"),
            wallet_grpc_cert: vars.path("DCRWALLET_GRPC_CERT"),
            wallet_grpc_key: vars.path("DCRWALLET_GRPC_KEY"),
            wallet_log_path: vars.path("DCRWALLET_LOG_PATH"),
            progress_source: vars.string("RESCAN_PROGRESS_SOURCE"),
            settle_delay_secs: vars.parsed("RESCAN_SETTLE_DELAY_SECS"),
            rescan_grace_seconds: vars.parsed("RESCAN_GRACE_SECONDS"),
            import_grace_seconds: vars.parsed("IMPORT_GRACE_SECONDS"),
            cors_allowed_origins: vars.csv("CORS_ALLOWED_ORIGINS"),
            cors_allowed_methods: vars.csv("CORS_ALLOWED_METHODS"),
            cors_allowed_headers: vars.csv("CORS_ALLOWED_HEADERS"),
            cors_allow_credentials: vars.flag("CORS_ALLOW_CREDENTIALS"),
        }
    }
}

struct Vars<F>(F);

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.0)(name).filter(|value| !value.is_empty())
    }

    fn parsed<T: FromStr>(&self, name: &str) -> Option<T> {
        self.string(name).and_then(|raw| raw.trim().parse().ok())
    }

    fn path(&self, name: &str) -> Option<PathBuf> {
        self.string(name).map(PathBuf::from)
    }

    fn csv(&self, name: &str) -> Option<Vec<String>> {
        self.string(name).map(|raw| split_csv(&raw))
    }

    fn flag(&self, name: &str) -> Option<bool> {
        self.string(name).and_then(|raw| parse_bool(&raw))
    }

    fn rpc(&self, prefix: &str) -> EnvRpcConfig {
        EnvRpcConfig {
            host: self.string(&format!("{prefix}_HOST")),
            port: self.parsed(&format!("{prefix}_PORT")),
            user: self.string(&format!("{prefix}_USER")),
            password: self.string(&format!("{prefix}_PASS")),
            cert: self.path(&format!("{prefix}_CERT")),
        }
    }
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .filter_map(|part| {
            let trimmed = part.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
        .collect()
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
