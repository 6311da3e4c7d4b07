//! [`TelemetryApi`] over HTTP, for producers and consumers in other processes.

use async_trait::async_trait;
use clusterwatch_types::Snapshot;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::client::conn::http1;
use hyper::header::HOST;
use hyper::{Method, Request, StatusCode};
use hyper_util::rt::TokioIo;
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::api::{validate_source_key, TelemetryApi};
use crate::codec::{self, CodecError};
use crate::error::ApiError;
use crate::http::percent_encode;

/// Errors from a single HTTP exchange.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Could not connect.
    #[error("Connection failed: {0}")]
    Connect(#[from] std::io::Error),

    /// The HTTP exchange failed.
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    /// The request could not be built.
    #[error("Invalid request: {0}")]
    Request(#[from] http::Error),

    /// The server answered with an unexpected status.
    #[error("Server returned {status}: {message}")]
    Status { status: StatusCode, message: String },

    /// The response body could not be decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// A client for a remote `ApiServer`.
///
/// Each call opens its own connection.
///
/// # Example
///
/// ```rust,no_run
/// use clusterwatch_aggregator::{RemoteClient, TelemetryApi};
///
/// #[tokio::main]
/// async fn main() {
///     let client = RemoteClient::new("127.0.0.1:8750");
///     client.put_data("node-1", br#"{"timestamp_ms":1}"#.to_vec()).await.unwrap();
///
///     for snapshot in client.get_snapshots(0.0, f64::INFINITY).await {
///         println!("{} nodes at {}", snapshot.len(), snapshot.timestamp_ms);
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub struct RemoteClient {
    addr: String,
}

impl RemoteClient {
    /// Create a client for a server at `host:port`.
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    /// The server address.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn send(&self, method: Method, path: &str, body: Bytes) -> Result<(StatusCode, Bytes), ClientError> {
        let stream = TcpStream::connect(self.addr.as_str()).await?;
        let (mut sender, conn) = http1::handshake(TokioIo::new(stream)).await?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "Client connection closed with error");
            }
        });

        let request = Request::builder()
            .method(method)
            .uri(path)
            .header(HOST, self.addr.as_str())
            .body(Full::new(body))?;

        let response = sender.send_request(request).await?;
        let status = response.status();
        let body = response.into_body().collect().await?.to_bytes();
        Ok((status, body))
    }

    /// Send a request and require a specific status.
    async fn expect(&self, method: Method, path: &str, body: Bytes, ok: StatusCode) -> Result<Bytes, ClientError> {
        let (status, body) = self.send(method, path, body).await?;
        if status != ok {
            return Err(ClientError::Status {
                status,
                message: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        Ok(body)
    }

    /// Fetch a source queue, surfacing failures.
    pub async fn try_get_data(&self, source_key: &str) -> Result<Vec<Vec<u8>>, ClientError> {
        let path = format!("/data/{}", percent_encode(source_key));
        let body = self.expect(Method::GET, &path, Bytes::new(), StatusCode::OK).await?;
        Ok(codec::decode_frames(&body)?)
    }

    /// Fetch snapshots in `[low_ms, high_ms]`, surfacing failures.
    pub async fn try_get_snapshots(&self, low_ms: f64, high_ms: f64) -> Result<Vec<Snapshot>, ClientError> {
        let path = format!("/snapshots?from={low_ms}&to={high_ms}");
        let body = self.expect(Method::GET, &path, Bytes::new(), StatusCode::OK).await?;
        Ok(codec::decode(&body)?)
    }

    /// Clear snapshot history, surfacing failures.
    pub async fn try_delete_all_snapshots(&self) -> Result<(), ClientError> {
        self.expect(Method::DELETE, "/snapshots", Bytes::new(), StatusCode::NO_CONTENT)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl TelemetryApi for RemoteClient {
    async fn put_data(&self, source_key: &str, payload: Vec<u8>) -> Result<(), ApiError> {
        validate_source_key(source_key)?;

        let path = format!("/data/{}", percent_encode(source_key));
        match self.send(Method::POST, &path, Bytes::from(payload)).await {
            Ok((StatusCode::NO_CONTENT, _)) => Ok(()),
            Ok((StatusCode::BAD_REQUEST, _)) => Err(ApiError::InvalidKey(source_key.to_string())),
            Ok((status, body)) => Err(ApiError::Transport(
                ClientError::Status {
                    status,
                    message: String::from_utf8_lossy(&body).into_owned(),
                }
                .to_string(),
            )),
            Err(e) => Err(ApiError::Transport(e.to_string())),
        }
    }

    async fn get_data(&self, source_key: &str) -> Vec<Vec<u8>> {
        self.try_get_data(source_key).await.unwrap_or_else(|e| {
            warn!(server = %self.addr, queue = source_key, error = %e, "Failed to fetch queue");
            Vec::new()
        })
    }

    async fn get_snapshots(&self, low_ms: f64, high_ms: f64) -> Vec<Snapshot> {
        self.try_get_snapshots(low_ms, high_ms).await.unwrap_or_else(|e| {
            warn!(server = %self.addr, error = %e, "Failed to fetch snapshots");
            Vec::new()
        })
    }

    async fn delete_all_snapshots(&self) {
        if let Err(e) = self.try_delete_all_snapshots().await {
            warn!(server = %self.addr, error = %e, "Failed to clear snapshots");
        }
    }
}
