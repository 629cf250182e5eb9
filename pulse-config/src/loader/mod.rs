mod error;

pub use error::ConfigLoadError;

use once_cell::sync::Lazy;
use pulse_core::rescan::{DEFAULT_WALLET_LOG_PATH, SourceMode};
use std::{fs, path::PathBuf, str::FromStr, time::Duration};
use tracing::debug;

use crate::{
    models::{
        Config, ConfigMetadata, CorsConfig, DEFAULT_LOG_MAX_AGE_SECS,
        DEFAULT_NODE_PORT, DEFAULT_RPC_HOST, DEFAULT_SERVER_HOST,
        DEFAULT_SERVER_PORT, DEFAULT_WALLET_GRPC_PORT, DEFAULT_WALLET_PORT,
        RescanConfig, RpcEndpointConfig, ServerConfig, WalletGrpcConfig,
        WalletLogConfig,
        sources::{EnvConfig, EnvRpcConfig, FileConfig, FileRpcConfig},
    },
    validation::{self, ConfigWarnings},
};

static DEFAULT_CONFIG_LOCATIONS: Lazy<Vec<PathBuf>> = Lazy::new(|| {
    vec![PathBuf::from("pulse.toml"), PathBuf::from("config/pulse.toml")]
});

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    /// Loads `.env`, reads the process environment and composes the result
    /// with the configuration file.
    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true).or_else(
                |err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                },
            )?,
            None => {
                dotenvy::dotenv().map(|_| true).or_else(|err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                })?
            }
        };

        let mut load = self.load_with_env(EnvConfig::gather())?;
        load.config.metadata.env_file_loaded = env_file_loaded;
        Ok(load)
    }

    /// Composes configuration from an already gathered environment layer.
    /// The process environment and `.env` files are not consulted.
    pub fn load_with_env(
        &self,
        env: EnvConfig,
    ) -> Result<ConfigLoad, ConfigLoadError> {
        let (file_config, config_path) = self.load_file_config(&env)?;
        let (config, warnings) =
            compose_config(file_config, env, config_path)?;
        Ok(ConfigLoad { config, warnings })
    }

    fn load_file_config(
        &self,
        env: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        let explicit = self
            .options
            .config_path
            .clone()
            .or_else(|| env.config_path.clone());

        let path = match explicit {
            Some(path) if !path.exists() => {
                return Err(ConfigLoadError::MissingConfig { path });
            }
            Some(path) => path,
            None => match DEFAULT_CONFIG_LOCATIONS
                .iter()
                .find(|candidate| candidate.exists())
            {
                Some(path) => path.clone(),
                None => return Ok((None, None)),
            },
        };

        let contents =
            fs::read_to_string(&path).map_err(|err| ConfigLoadError::Io {
                path: path.clone(),
                source: err,
            })?;
        let file_config: FileConfig =
            toml::from_str(&contents).map_err(|err| ConfigLoadError::Parse {
                path: path.clone(),
                source: err,
            })?;

        debug!(path = %path.display(), "loaded configuration file");
        Ok((Some(file_config), Some(path)))
    }
}

fn compose_config(
    file_config: Option<FileConfig>,
    env: EnvConfig,
    config_path: Option<PathBuf>,
) -> Result<(Config, ConfigWarnings), ConfigLoadError> {
    let mut warnings = ConfigWarnings::default();

    if config_path.is_none() {
        warnings.push_with_hint(
            "No pulse.toml detected; using environment variables and defaults",
            "Copy pulse.example.toml to pulse.toml or set PULSE_CONFIG",
        );
    }

    let file = file_config.unwrap_or_default();
    let FileConfig {
        server: file_server,
        node: file_node,
        wallet: file_wallet,
        wallet_grpc: file_grpc,
        wallet_log: file_log,
        rescan: file_rescan,
        cors: file_cors,
    } = file;

    let server = ServerConfig {
        host: env
            .server_host
            .or(file_server.host)
            .unwrap_or_else(|| DEFAULT_SERVER_HOST.to_string()),
        port: env
            .server_port
            .or(file_server.port)
            .unwrap_or(DEFAULT_SERVER_PORT),
    };

    let node = rpc_endpoint(env.node, file_node, DEFAULT_NODE_PORT);
    let wallet = rpc_endpoint(env.wallet, file_wallet, DEFAULT_WALLET_PORT);

    let grpc_cert = env.wallet_grpc_cert.or(file_grpc.cert);
    let wallet_grpc = WalletGrpcConfig {
        enabled: env
            .wallet_grpc_enabled
            .or(file_grpc.enabled)
            .unwrap_or(grpc_cert.is_some()),
        host: env
            .wallet_grpc_host
            .or(file_grpc.host)
            .unwrap_or_else(|| wallet.host.clone()),
        port: env
            .wallet_grpc_port
            .or(file_grpc.port)
            .unwrap_or(DEFAULT_WALLET_GRPC_PORT),
        cert: grpc_cert,
        key: env.wallet_grpc_key.or(file_grpc.key),
    };

    let wallet_log = WalletLogConfig {
        path: env
            .wallet_log_path
            .or(file_log.path)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_WALLET_LOG_PATH)),
        max_age: Duration::from_secs(
            file_log.max_age_secs.unwrap_or(DEFAULT_LOG_MAX_AGE_SECS),
        ),
    };

    let progress_source = match env.progress_source.or(file_rescan.progress_source)
    {
        Some(raw) => SourceMode::from_str(&raw).map_err(|reason| {
            ConfigLoadError::InvalidValue {
                field: "RESCAN_PROGRESS_SOURCE",
                reason,
            }
        })?,
        None => SourceMode::default(),
    };

    let rescan = RescanConfig {
        progress_source,
        settle_delay: Duration::from_secs(
            env.settle_delay_secs
                .or(file_rescan.settle_delay_secs)
                .unwrap_or(5),
        ),
        step_timeout: Duration::from_secs(
            file_rescan.step_timeout_secs.unwrap_or(15),
        ),
        rescan_grace_seconds: env
            .rescan_grace_seconds
            .or(file_rescan.rescan_grace_seconds)
            .unwrap_or(8),
        import_grace_seconds: env
            .import_grace_seconds
            .or(file_rescan.import_grace_seconds)
            .unwrap_or(30),
    };

    let cors = CorsConfig {
        allowed_origins: env
            .cors_allowed_origins
            .or(file_cors.allowed_origins)
            .unwrap_or_else(|| vec!["*".to_string()]),
        allowed_methods: env
            .cors_allowed_methods
            .or(file_cors.allowed_methods)
            .unwrap_or_else(default_cors_methods),
        allowed_headers: env
            .cors_allowed_headers
            .or(file_cors.allowed_headers)
            .unwrap_or_else(|| vec!["*".to_string()]),
        allow_credentials: env
            .cors_allow_credentials
            .or(file_cors.allow_credentials)
            .unwrap_or(false),
    };

    let config = Config {
        server,
        node,
        wallet,
        wallet_grpc,
        wallet_log,
        rescan,
        cors,
        metadata: ConfigMetadata {
            config_path,
            env_file_loaded: false,
        },
    };

    let guard_warnings = validation::apply_guard_rails(&config)?;
    warnings.extend(guard_warnings);

    Ok((config, warnings))
}

fn rpc_endpoint(
    env: EnvRpcConfig,
    file: FileRpcConfig,
    default_port: u16,
) -> RpcEndpointConfig {
    RpcEndpointConfig {
        host: env
            .host
            .or(file.host)
            .unwrap_or_else(|| DEFAULT_RPC_HOST.to_string()),
        port: env.port.or(file.port).unwrap_or(default_port),
        user: env.user.or(file.user).unwrap_or_default(),
        password: env.password.or(file.password).unwrap_or_default(),
        cert: env.cert.or(file.cert),
    }
}

fn default_cors_methods() -> Vec<String> {
    ["GET", "POST", "PUT", "DELETE", "OPTIONS"]
        .into_iter()
        .map(String::from)
        .collect()
}
