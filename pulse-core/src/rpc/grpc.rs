//! dcrwallet gRPC client, limited to `WalletService.Rescan`.
//!
//! The two messages are declared by hand with `prost` derives rather than
//! generated from `api.proto`, which keeps the build free of `protoc`.

use std::{fmt, path::PathBuf};

use async_trait::async_trait;
use futures::StreamExt;
use tonic::{
    codec::ProstCodec,
    codegen::http::uri::PathAndQuery,
    transport::{Certificate, Channel, ClientTlsConfig, Endpoint, Identity},
};
use tracing::debug;

use super::{HeightStream, RescanStream, RpcError};

const RESCAN_PATH: &str = "/walletrpc.WalletService/Rescan";

#[derive(Clone, PartialEq, prost::Message)]
pub struct RescanRequest {
    #[prost(int32, tag = "1")]
    pub begin_height: i32,
    #[prost(bytes = "vec", tag = "2")]
    pub begin_hash: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct RescanResponse {
    #[prost(int32, tag = "1")]
    pub rescanned_through: i32,
}

/// Where and how to reach the wallet's gRPC listener.
#[derive(Debug, Clone)]
pub struct GrpcEndpoint {
    pub host: String,
    pub port: u16,
    /// CA used to verify the wallet. dcrwallet's self-signed `rpc.cert`.
    pub ca_cert: Option<PathBuf>,
    /// Client certificate presented to the wallet. Often the same file as
    /// `ca_cert`.
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
}

impl GrpcEndpoint {
    pub fn uses_tls(&self) -> bool {
        self.ca_cert.is_some()
    }

    pub fn uri(&self) -> String {
        let scheme = if self.uses_tls() { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }

    fn tls_config(&self) -> Result<Option<ClientTlsConfig>, RpcError> {
        let Some(ca) = self.ca_cert.as_ref() else {
            return Ok(None);
        };

        let mut config = ClientTlsConfig::new()
            .domain_name(self.host.clone())
            .ca_certificate(Certificate::from_pem(read_pem(ca)?));

        if let (Some(cert), Some(key)) =
            (self.client_cert.as_ref(), self.client_key.as_ref())
        {
            config = config
                .identity(Identity::from_pem(read_pem(cert)?, read_pem(key)?));
        }

        Ok(Some(config))
    }
}

fn read_pem(path: &PathBuf) -> Result<Vec<u8>, RpcError> {
    std::fs::read(path).map_err(|source| RpcError::Certificate {
        path: path.clone(),
        source,
    })
}

/// Lazily connected channel to dcrwallet. The first call dials.
#[derive(Clone)]
pub struct WalletGrpcClient {
    inner: tonic::client::Grpc<Channel>,
    uri: String,
}

impl fmt::Debug for WalletGrpcClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletGrpcClient")
            .field("uri", &self.uri)
            .finish_non_exhaustive()
    }
}

impl WalletGrpcClient {
    /// Builds the channel without dialing. Must run inside a tokio runtime.
    pub fn connect_lazy(endpoint: &GrpcEndpoint) -> Result<Self, RpcError> {
        let uri = endpoint.uri();
        let mut channel = Endpoint::from_shared(uri.clone())?;
        if let Some(tls) = endpoint.tls_config()? {
            channel = channel.tls_config(tls)?;
        }

        Ok(Self {
            inner: tonic::client::Grpc::new(channel.connect_lazy()),
            uri,
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }
}

#[async_trait]
impl RescanStream for WalletGrpcClient {
    async fn rescan(&self, begin_height: i32) -> Result<HeightStream, RpcError> {
        let mut grpc = self.inner.clone();
        grpc.ready().await.map_err(|err| {
            tonic::Status::unavailable(format!("wallet service not ready: {err}"))
        })?;

        debug!(uri = %self.uri, begin_height, "opening rescan stream");

        let request = tonic::Request::new(RescanRequest {
            begin_height,
            begin_hash: Vec::new(),
        });
        let response = grpc
            .server_streaming(
                request,
                PathAndQuery::from_static(RESCAN_PATH),
                ProstCodec::<RescanRequest, RescanResponse>::default(),
            )
            .await?;

        let heights = response.into_inner().map(|item| {
            item.map(|update| i64::from(update.rescanned_through))
                .map_err(RpcError::from)
        });

        Ok(heights.boxed())
    }
}
