use std::{collections::HashMap, fs, path::PathBuf, time::Duration};

use pulse_config::{
    ConfigGuardRailError, ConfigLoadError, ConfigLoader,
    models::sources::EnvConfig,
};
use pulse_core::rescan::SourceMode;
use tempfile::TempDir;

fn env(pairs: &[(&str, &str)]) -> EnvConfig {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    EnvConfig::from_lookup(|name| vars.get(name).cloned())
}

fn write_config(dir: &TempDir, contents: &str) -> PathBuf {
    let path = dir.path().join("pulse.toml");
    fs::write(&path, contents).unwrap();
    path
}

#[test]
fn defaults_apply_without_file_or_environment() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "");

    let load = ConfigLoader::new()
        .with_config_path(&path)
        .load_with_env(EnvConfig::default())
        .unwrap();
    let config = load.config;

    assert_eq!(config.server.bind_address(), "0.0.0.0:8080");
    assert_eq!(config.node.host, "localhost");
    assert_eq!(config.node.port, 9109);
    assert_eq!(config.wallet.port, 9110);
    assert_eq!(config.wallet_grpc.port, 9111);
    assert!(!config.wallet_grpc.enabled);
    assert_eq!(
        config.wallet_log.path,
        PathBuf::from("/wallet-data/logs/mainnet/dcrwallet.log")
    );
    assert_eq!(config.wallet_log.max_age, Duration::from_secs(120));
    assert_eq!(config.rescan.progress_source, SourceMode::Auto);
    assert_eq!(config.rescan.settle_delay, Duration::from_secs(5));
    assert_eq!(config.rescan.rescan_grace_seconds, 8);
    assert_eq!(config.rescan.import_grace_seconds, 30);
    assert_eq!(config.cors.allowed_origins, vec!["*".to_string()]);
    assert!(!config.cors.allow_credentials);
    assert_eq!(config.metadata.config_path, Some(path));

    // missing credentials are reported, not fatal
    assert!(!config.node.is_configured());
    assert!(
        load.warnings
            .items
            .iter()
            .any(|w| w.message.contains("dcrwallet RPC credentials"))
    );
}

#[test]
fn environment_overrides_file_values() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
[server]
host = "127.0.0.1"
port = 3000

[wallet]
host = "wallet-file"
user = "file-user"
password = "file-pass"

[rescan]
progress_source = "log"
rescan_grace_seconds = 12
"#,
    );

    let config = ConfigLoader::new()
        .with_config_path(&path)
        .load_with_env(env(&[
            ("PORT", "9000"),
            ("DCRWALLET_RPC_HOST", "dcrwallet"),
            ("RESCAN_GRACE_SECONDS", "20"),
        ]))
        .unwrap()
        .config;

    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.server.port, 9000);
    assert_eq!(config.wallet.host, "dcrwallet");
    assert_eq!(config.wallet.user, "file-user");
    assert!(config.wallet.is_configured());
    assert_eq!(config.rescan.progress_source, SourceMode::Log);
    assert_eq!(config.rescan.rescan_grace_seconds, 20);
}

#[test]
fn grpc_is_enabled_by_a_certificate() {
    let dir = TempDir::new().unwrap();
    let cert = dir.path().join("rpc.cert");
    let key = dir.path().join("rpc.key");
    fs::write(&cert, "cert").unwrap();
    fs::write(&key, "key").unwrap();
    let path = write_config(&dir, "[wallet]\nhost = \"dcrwallet\"\n");

    let config = ConfigLoader::new()
        .with_config_path(&path)
        .load_with_env(env(&[
            ("DCRWALLET_GRPC_CERT", cert.to_str().unwrap()),
            ("DCRWALLET_GRPC_KEY", key.to_str().unwrap()),
        ]))
        .unwrap()
        .config;

    assert!(config.wallet_grpc.enabled);
    assert_eq!(config.wallet_grpc.host, "dcrwallet");
    assert_eq!(config.wallet_grpc.cert, Some(cert));
}

#[test]
fn explicit_missing_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("absent.toml");

    let err = ConfigLoader::new()
        .load_with_env(env(&[("PULSE_CONFIG", missing.to_str().unwrap())]))
        .unwrap_err();
    assert!(
        matches!(err, ConfigLoadError::MissingConfig { ref path } if *path == missing)
    );
}

#[test]
fn malformed_toml_reports_the_path() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[server\nport = 1");

    let err = ConfigLoader::new()
        .with_config_path(&path)
        .load_with_env(EnvConfig::default())
        .unwrap_err();
    assert!(matches!(err, ConfigLoadError::Parse { .. }));
    assert!(err.to_string().contains("pulse.toml"));
}

#[test]
fn unknown_progress_source_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "");

    let err = ConfigLoader::new()
        .with_config_path(&path)
        .load_with_env(env(&[("RESCAN_PROGRESS_SOURCE", "carrier-pigeon")]))
        .unwrap_err();
    assert!(matches!(
        err,
        ConfigLoadError::InvalidValue {
            field: "RESCAN_PROGRESS_SOURCE",
            ..
        }
    ));
}

#[test]
fn stream_mode_requires_grpc() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[rescan]\nprogress_source = \"stream\"\n");

    let err = ConfigLoader::new()
        .with_config_path(&path)
        .load_with_env(EnvConfig::default())
        .unwrap_err();
    assert!(matches!(
        err,
        ConfigLoadError::GuardRail(ConfigGuardRailError::StreamWithoutGrpc)
    ));
}

#[test]
fn missing_certificate_fails_guard_rails() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[node]\ncert = \"/does/not/exist.cert\"\n");

    let err = ConfigLoader::new()
        .with_config_path(&path)
        .load_with_env(EnvConfig::default())
        .unwrap_err();
    assert!(matches!(
        err,
        ConfigLoadError::GuardRail(ConfigGuardRailError::MissingCertificate {
            field: "DCRD_RPC_CERT",
            ..
        })
    ));
}
