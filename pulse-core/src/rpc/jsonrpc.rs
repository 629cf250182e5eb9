use std::{
    fmt,
    path::PathBuf,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use tracing::debug;

use super::{NodeRpc, RpcError, WalletRpc};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection settings for a btcd-style JSON-RPC daemon.
#[derive(Clone)]
pub struct JsonRpcEndpoint {
    pub label: &'static str,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// PEM certificate of the daemon. Enables HTTPS when present.
    pub ca_cert: Option<PathBuf>,
    pub request_timeout: Duration,
}

impl fmt::Debug for JsonRpcEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonRpcEndpoint")
            .field("label", &self.label)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("ca_cert", &self.ca_cert)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl JsonRpcEndpoint {
    pub fn new(label: &'static str, host: impl Into<String>, port: u16) -> Self {
        Self {
            label,
            host: host.into(),
            port,
            user: String::new(),
            password: String::new(),
            ca_cert: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn url(&self) -> String {
        let scheme = if self.ca_cert.is_some() { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

/// Minimal JSON-RPC 1.0 client over HTTP POST with basic auth.
pub struct JsonRpcClient {
    http: reqwest::Client,
    endpoint: JsonRpcEndpoint,
    url: String,
    next_id: AtomicU64,
}

impl fmt::Debug for JsonRpcClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonRpcClient")
            .field("endpoint", &self.endpoint)
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl JsonRpcClient {
    pub fn new(endpoint: JsonRpcEndpoint) -> Result<Self, RpcError> {
        let mut builder =
            reqwest::Client::builder().timeout(endpoint.request_timeout);

        if let Some(path) = &endpoint.ca_cert {
            let pem =
                std::fs::read(path).map_err(|source| RpcError::Certificate {
                    path: path.clone(),
                    source,
                })?;
            let certificate =
                reqwest::Certificate::from_pem(&pem).map_err(|err| {
                    RpcError::Config(format!(
                        "invalid certificate {}: {err}",
                        path.display()
                    ))
                })?;
            builder = builder.add_root_certificate(certificate);
        }

        let http = builder.build().map_err(|err| {
            RpcError::Config(format!(
                "failed to build {} HTTP client: {err}",
                endpoint.label
            ))
        })?;

        Ok(Self {
            http,
            url: endpoint.url(),
            endpoint,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn label(&self) -> &'static str {
        self.endpoint.label
    }

    /// Issues `method` and decodes the `result` member into `T`.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &'static str,
        params: Vec<Value>,
    ) -> Result<T, RpcError> {
        let value = self.call_value(method, params).await?;
        serde_json::from_value(value).map_err(|err| RpcError::Decode {
            method,
            reason: err.to_string(),
        })
    }

    async fn call_value(
        &self,
        method: &'static str,
        params: Vec<Value>,
    ) -> Result<Value, RpcError> {
        let request = RpcRequest {
            jsonrpc: "1.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        debug!(upstream = self.endpoint.label, method, "json-rpc request");

        let response = self
            .http
            .post(&self.url)
            .basic_auth(&self.endpoint.user, Some(&self.endpoint.password))
            .json(&request)
            .send()
            .await
            .map_err(|source| self.transport_error(method, source))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| self.transport_error(method, source))?;

        decode_envelope(method, status, &body)
    }

    fn transport_error(
        &self,
        method: &'static str,
        source: reqwest::Error,
    ) -> RpcError {
        if source.is_timeout() {
            RpcError::Timeout {
                method,
                after: self.endpoint.request_timeout,
            }
        } else {
            RpcError::Transport { method, source }
        }
    }
}

fn decode_envelope(
    method: &'static str,
    status: reqwest::StatusCode,
    body: &str,
) -> Result<Value, RpcError> {
    match serde_json::from_str::<RpcEnvelope>(body) {
        Ok(RpcEnvelope {
            error: Some(error), ..
        }) => Err(RpcError::Rpc {
            method,
            code: error.code,
            message: error.message,
        }),
        Ok(envelope) => Ok(envelope.result),
        // dcrd answers auth failures and some transport errors in plain text
        Err(_) if !status.is_success() => Err(RpcError::Rpc {
            method,
            code: i64::from(status.as_u16()),
            message: body.trim().to_string(),
        }),
        Err(err) => Err(RpcError::Decode {
            method,
            reason: err.to_string(),
        }),
    }
}

#[async_trait]
impl NodeRpc for JsonRpcClient {
    async fn block_count(&self) -> Result<i64, RpcError> {
        self.call("getblockcount", Vec::new()).await
    }
}

#[async_trait]
impl WalletRpc for JsonRpcClient {
    async fn discover_usage(&self) -> Result<(), RpcError> {
        self.call::<Value>("discoverusage", Vec::new()).await?;
        Ok(())
    }

    async fn import_xpub(
        &self,
        account: &str,
        xpub: &str,
    ) -> Result<(), RpcError> {
        self.call::<Value>("importxpub", vec![json!(account), json!(xpub)])
            .await?;
        Ok(())
    }

    async fn rescan_wallet(&self, begin_height: i64) -> Result<(), RpcError> {
        self.call::<Value>("rescanwallet", vec![json!(begin_height)])
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn decodes_result_member() {
        let value = decode_envelope(
            "getblockcount",
            StatusCode::OK,
            r#"{"result":1016874,"error":null,"id":1}"#,
        )
        .unwrap();
        assert_eq!(value, json!(1016874));
    }

    #[test]
    fn surfaces_rpc_error_object() {
        let err = decode_envelope(
            "importxpub",
            StatusCode::INTERNAL_SERVER_ERROR,
            r#"{"result":null,"error":{"code":-4,"message":"account exists"},"id":2}"#,
        )
        .unwrap_err();

        match err {
            RpcError::Rpc { code, message, .. } => {
                assert_eq!(code, -4);
                assert_eq!(message, "account exists");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn plain_text_failure_uses_http_status() {
        let err = decode_envelope(
            "getblockcount",
            StatusCode::UNAUTHORIZED,
            "401 Unauthorized.\n",
        )
        .unwrap_err();

        assert!(matches!(
            err,
            RpcError::Rpc { code: 401, ref message, .. } if message == "401 Unauthorized."
        ));
    }

    #[test]
    fn null_result_decodes_for_unit_calls() {
        let value = decode_envelope(
            "discoverusage",
            StatusCode::OK,
            r#"{"result":null,"error":null,"id":3}"#,
        )
        .unwrap();
        assert!(value.is_null());
    }

    #[test]
    fn endpoint_scheme_follows_certificate() {
        let mut endpoint = JsonRpcEndpoint::new("dcrd", "localhost", 9109);
        assert_eq!(endpoint.url(), "http://localhost:9109");

        endpoint.ca_cert = Some(PathBuf::from("/certs/rpc.cert"));
        assert_eq!(endpoint.url(), "https://localhost:9109");
    }
}
