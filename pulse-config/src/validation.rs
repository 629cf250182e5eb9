use std::path::{Path, PathBuf};

use axum::http::{Method, header::HeaderName};
use pulse_core::rescan::SourceMode;
use thiserror::Error;
use url::Url;

use super::models::{Config, CorsConfig, RescanConfig};

/// Upper bound for the pending grace windows, in seconds.
pub const MAX_GRACE_SECONDS: u32 = 600;
pub const MAX_SETTLE_DELAY_SECS: u64 = 300;

#[derive(Debug, Error)]
pub enum ConfigGuardRailError {
    #[error("invalid CORS configuration: {reason}")]
    InvalidCorsConfig { reason: String },
    #[error("CORS credentials cannot be combined with a wildcard origin")]
    CredentialedCorsWildcard,
    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },
    #[error("{field} points at {path}, which does not exist")]
    MissingCertificate { field: &'static str, path: PathBuf },
    #[error(
        "RESCAN_PROGRESS_SOURCE=stream requires the dcrwallet gRPC client to be enabled"
    )]
    StreamWithoutGrpc,
}

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint<S: Into<String>, H: Into<String>>(
        &mut self,
        message: S,
        hint: H,
    ) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn extend(&mut self, other: ConfigWarnings) {
        self.items.extend(other.items);
    }
}

pub fn apply_guard_rails(
    config: &Config,
) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let mut warnings = ConfigWarnings::default();

    validate_cors(&config.cors)?;
    validate_rescan(&config.rescan)?;

    for (field, path) in [
        ("DCRD_RPC_CERT", config.node.cert.as_deref()),
        ("DCRWALLET_RPC_CERT", config.wallet.cert.as_deref()),
        ("DCRWALLET_GRPC_CERT", config.wallet_grpc.cert.as_deref()),
        ("DCRWALLET_GRPC_KEY", config.wallet_grpc.key.as_deref()),
    ] {
        ensure_exists(field, path)?;
    }

    if config.rescan.progress_source == SourceMode::Stream
        && !config.wallet_grpc.enabled
    {
        return Err(ConfigGuardRailError::StreamWithoutGrpc);
    }

    if !config.node.is_configured() {
        warnings.push_with_hint(
            "dcrd RPC credentials not set; chain height will be reported as 0",
            "Set DCRD_RPC_USER and DCRD_RPC_PASS",
        );
    }

    if !config.wallet.is_configured() {
        warnings.push_with_hint(
            "dcrwallet RPC credentials not set; rescan and xpub import are disabled",
            "Set DCRWALLET_RPC_USER and DCRWALLET_RPC_PASS",
        );
    }

    if config.wallet_grpc.enabled {
        if config.wallet_grpc.cert.is_none() {
            warnings.push_with_hint(
                "dcrwallet gRPC enabled without a certificate; connecting in plaintext",
                "Point DCRWALLET_GRPC_CERT at dcrwallet's rpc.cert",
            );
        } else if config.wallet_grpc.key.is_none() {
            warnings.push_with_hint(
                "dcrwallet gRPC client key not set; no client certificate will be presented",
                "dcrwallet requires client certificates by default; set DCRWALLET_GRPC_KEY",
            );
        }
    }

    if config.rescan.progress_source == SourceMode::Log {
        warnings.push(
            "RESCAN_PROGRESS_SOURCE=log: progress comes from the wallet log only",
        );
    }

    Ok(warnings)
}

fn ensure_exists(
    field: &'static str,
    path: Option<&Path>,
) -> Result<(), ConfigGuardRailError> {
    match path {
        Some(path) if !path.exists() => {
            Err(ConfigGuardRailError::MissingCertificate {
                field,
                path: path.to_path_buf(),
            })
        }
        _ => Ok(()),
    }
}

fn validate_rescan(rescan: &RescanConfig) -> Result<(), ConfigGuardRailError> {
    for (field, value) in [
        ("RESCAN_GRACE_SECONDS", rescan.rescan_grace_seconds),
        ("IMPORT_GRACE_SECONDS", rescan.import_grace_seconds),
    ] {
        if value == 0 || value > MAX_GRACE_SECONDS {
            return Err(ConfigGuardRailError::OutOfRange {
                field,
                value: u64::from(value),
                min: 1,
                max: u64::from(MAX_GRACE_SECONDS),
            });
        }
    }

    let settle = rescan.settle_delay.as_secs();
    if settle > MAX_SETTLE_DELAY_SECS {
        return Err(ConfigGuardRailError::OutOfRange {
            field: "RESCAN_SETTLE_DELAY_SECS",
            value: settle,
            min: 0,
            max: MAX_SETTLE_DELAY_SECS,
        });
    }

    Ok(())
}

fn validate_cors(cors: &CorsConfig) -> Result<(), ConfigGuardRailError> {
    if cors.allow_credentials
        && (cors.is_wildcard_included() || cors.allows_any_header())
    {
        return Err(ConfigGuardRailError::CredentialedCorsWildcard);
    }

    for origin in &cors.allowed_origins {
        if origin == "*" {
            continue;
        }
        Url::parse(origin).map_err(|_| {
            ConfigGuardRailError::InvalidCorsConfig {
                reason: format!(
                    "invalid origin `{origin}` in CORS_ALLOWED_ORIGINS"
                ),
            }
        })?;
    }

    if cors.allowed_methods.is_empty() {
        return Err(ConfigGuardRailError::InvalidCorsConfig {
            reason:
                "CORS_ALLOWED_METHODS must include at least one HTTP method"
                    .into(),
        });
    }

    for method in &cors.allowed_methods {
        Method::from_bytes(method.as_bytes()).map_err(|_| {
            ConfigGuardRailError::InvalidCorsConfig {
                reason: format!(
                    "invalid HTTP method `{method}` in CORS_ALLOWED_METHODS"
                ),
            }
        })?;
    }

    if cors.allowed_headers.is_empty() {
        return Err(ConfigGuardRailError::InvalidCorsConfig {
            reason:
                "CORS_ALLOWED_HEADERS must include at least one header name"
                    .into(),
        });
    }

    for header in cors.allowed_headers.iter().filter(|h| *h != "*") {
        HeaderName::from_bytes(header.as_bytes()).map_err(|_| {
            ConfigGuardRailError::InvalidCorsConfig {
                reason: format!(
                    "invalid header name `{header}` in CORS_ALLOWED_HEADERS"
                ),
            }
        })?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cors() -> CorsConfig {
        CorsConfig {
            allowed_origins: vec!["*".into()],
            allowed_methods: vec!["GET".into(), "POST".into()],
            allowed_headers: vec!["*".into()],
            allow_credentials: false,
        }
    }

    #[test]
    fn wildcard_cors_is_accepted_without_credentials() {
        assert!(validate_cors(&cors()).is_ok());
    }

    #[test]
    fn credentials_with_wildcard_are_rejected() {
        let config = CorsConfig {
            allow_credentials: true,
            ..cors()
        };
        assert!(matches!(
            validate_cors(&config),
            Err(ConfigGuardRailError::CredentialedCorsWildcard)
        ));
    }

    #[test]
    fn malformed_method_and_origin_are_rejected() {
        let bad_method = CorsConfig {
            allowed_methods: vec!["GE T".into()],
            ..cors()
        };
        assert!(validate_cors(&bad_method).is_err());

        let bad_origin = CorsConfig {
            allowed_origins: vec!["not a url".into()],
            ..cors()
        };
        assert!(validate_cors(&bad_origin).is_err());
    }

    #[test]
    fn grace_windows_must_be_positive_and_bounded() {
        let rescan = RescanConfig {
            progress_source: SourceMode::Auto,
            settle_delay: std::time::Duration::from_secs(5),
            step_timeout: std::time::Duration::from_secs(15),
            rescan_grace_seconds: 0,
            import_grace_seconds: 30,
        };
        let err = validate_rescan(&rescan).unwrap_err();
        assert!(err.to_string().contains("RESCAN_GRACE_SECONDS"));

        let too_long = RescanConfig {
            rescan_grace_seconds: 8,
            import_grace_seconds: MAX_GRACE_SECONDS + 1,
            ..rescan
        };
        assert!(validate_rescan(&too_long).is_err());
    }

    #[test]
    fn missing_certificate_is_named() {
        let err =
            ensure_exists("DCRD_RPC_CERT", Some(Path::new("/nope/rpc.cert")))
                .unwrap_err();
        assert_eq!(
            err.to_string(),
            "DCRD_RPC_CERT points at /nope/rpc.cert, which does not exist"
        );
    }
}
