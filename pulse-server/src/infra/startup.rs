//! Turns a loaded [`Config`] into the shared application state and the
//! HTTP layers around the router.

use std::{path::PathBuf, sync::Arc};

use axum::http::{HeaderName, HeaderValue, Method};
use pulse_config::{Config, CorsConfig, RpcEndpointConfig};
use pulse_core::rescan::{
    ChainHeightCache, CoordinatorSettings, ProgressSource, RescanCoordinator,
    WalletClients, WalletLogSource,
};
use pulse_core::rpc::{
    GrpcEndpoint, JsonRpcClient, JsonRpcEndpoint, NodeRpc, RescanStream,
    WalletGrpcClient, WalletRpc,
};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tracing::{info, warn};

use super::app_state::AppState;

/// Builds upstream clients, the coordinator and the chain height cache.
///
/// A client that cannot be built is logged and left out; the endpoints
/// depending on it answer `503` instead of failing startup.
pub fn build_state(config: &Config) -> AppState {
    let node = json_rpc_client("dcrd", &config.node);
    let wallet = json_rpc_client("dcrwallet", &config.wallet);

    let mode = config.rescan.progress_source;
    let stream = if config.wallet_grpc.enabled && mode.allows_stream() {
        grpc_client(config)
    } else {
        None
    };

    let wallet_log: Option<Arc<dyn ProgressSource>> = if mode.allows_log() {
        let source = WalletLogSource::new(config.wallet_log.path.clone())
            .with_max_age(config.wallet_log.max_age);
        info!(path = %config.wallet_log.path.display(), "wallet log monitoring enabled");
        Some(Arc::new(source))
    } else {
        None
    };

    let settings = CoordinatorSettings {
        settle_delay: config.rescan.settle_delay,
        step_timeout: config.rescan.step_timeout,
        rescan_grace_seconds: config.rescan.rescan_grace_seconds,
        import_grace_seconds: config.rescan.import_grace_seconds,
        source_mode: mode,
        ..CoordinatorSettings::default()
    };

    let coordinator = RescanCoordinator::new(
        WalletClients {
            wallet: wallet.map(|client| client as Arc<dyn WalletRpc>),
            stream,
            log_watch: wallet_log.clone(),
        },
        settings,
    );
    let chain = Arc::new(ChainHeightCache::new(
        node.map(|client| client as Arc<dyn NodeRpc>),
    ));

    info!(
        progress_source = mode.as_str(),
        node = chain.has_node(),
        wallet = coordinator.has_wallet(),
        wallet_grpc = coordinator.uses_stream(),
        "rescan coordinator ready"
    );

    AppState::new(coordinator, chain, wallet_log)
}

fn json_rpc_client(
    label: &'static str,
    config: &RpcEndpointConfig,
) -> Option<Arc<JsonRpcClient>> {
    if !config.is_configured() {
        info!(daemon = label, "no RPC credentials provided, client disabled");
        return None;
    }

    let endpoint = JsonRpcEndpoint {
        user: config.user.clone(),
        password: config.password.clone(),
        ca_cert: config.cert.clone(),
        ..JsonRpcEndpoint::new(label, config.host.clone(), config.port)
    };
    let url = endpoint.url();

    match JsonRpcClient::new(endpoint) {
        Ok(client) => {
            info!(daemon = label, %url, "JSON-RPC client configured");
            Some(Arc::new(client))
        }
        Err(err) => {
            warn!(daemon = label, error = %err, "could not build JSON-RPC client");
            None
        }
    }
}

fn grpc_client(config: &Config) -> Option<Arc<dyn RescanStream>> {
    let grpc = &config.wallet_grpc;
    let client_cert: Option<PathBuf> =
        grpc.key.as_ref().and(grpc.cert.clone());
    let endpoint = GrpcEndpoint {
        host: grpc.host.clone(),
        port: grpc.port,
        ca_cert: grpc.cert.clone(),
        client_cert,
        client_key: grpc.key.clone(),
    };

    match WalletGrpcClient::connect_lazy(&endpoint) {
        Ok(client) => {
            info!(uri = client.uri(), tls = endpoint.uses_tls(), "dcrwallet gRPC client configured");
            Some(Arc::new(client))
        }
        Err(err) => {
            warn!(error = %err, "could not build dcrwallet gRPC client, falling back to the wallet log");
            None
        }
    }
}

/// CORS from configuration. Values were validated when the config loaded.
pub fn cors_layer(cors: &CorsConfig) -> CorsLayer {
    let allow_origin = if cors.is_wildcard_included() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            cors.allowed_origins
                .iter()
                .filter_map(|origin| HeaderValue::from_str(origin).ok()),
        )
    };

    let allow_methods = AllowMethods::list(
        cors.allowed_methods
            .iter()
            .filter_map(|method| Method::from_bytes(method.as_bytes()).ok()),
    );

    let allow_headers = if cors.allows_any_header() {
        AllowHeaders::any()
    } else {
        AllowHeaders::list(
            cors.allowed_headers
                .iter()
                .filter_map(|header| HeaderName::from_bytes(header.as_bytes()).ok()),
        )
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(allow_methods)
        .allow_headers(allow_headers)
        .allow_credentials(cors.allow_credentials)
}
