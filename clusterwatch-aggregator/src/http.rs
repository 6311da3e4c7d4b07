//! HTTP transport for the [`TelemetryApi`].
//!
//! | Route | Response |
//! |---|---|
//! | `POST /data/{key}` | `204`, `400` invalid key, `413` body too large, `503` store failure |
//! | `GET /data/{key}` | `200`, length-prefixed frames (see [`codec`](crate::codec)) |
//! | `GET /snapshots?from=&to=` | `200`, JSON array; missing bounds are open |
//! | `DELETE /snapshots` | `204` |
//! | `GET /health`, `GET /healthz` | `200 OK` |
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use clusterwatch_aggregator::http::{ApiServer, ServerConfig};
//! use clusterwatch_aggregator::Aggregator;
//! use clusterwatch_store::{DiscoveredMembership, MemoryStore, QueueStore};
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let store: Arc<dyn QueueStore> = Arc::new(MemoryStore::new());
//!     let membership = Arc::new(DiscoveredMembership::new(store.clone()));
//!     let aggregator = Aggregator::new(store, membership);
//!
//!     let config = ServerConfig::builder()
//!         .listen_addr("0.0.0.0:8750")
//!         .build();
//!
//!     let server = ApiServer::bind(&config, Arc::new(aggregator.clone())).await?;
//!     server.serve(aggregator.shutdown_signal()).await;
//!     Ok(())
//! }
//! ```

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::api::TelemetryApi;
use crate::codec;
use crate::error::ApiError;
use crate::shutdown::Shutdown;

/// Default address for the API server.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8750";

/// Default request body limit: 1 MiB.
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// Pause after a failed `accept`, e.g. when out of file descriptors.
const ACCEPT_ERROR_DELAY: Duration = Duration::from_millis(100);

/// Characters left as-is in a key path segment: RFC 3986 unreserved.
const KEY_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Configuration for the HTTP API server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "0.0.0.0:8750")
    pub listen_addr: String,
    /// Largest accepted request body in bytes
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl ServerConfig {
    /// Create a new builder for ServerConfig.
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }
}

/// Builder for ServerConfig.
#[derive(Debug, Default)]
pub struct ServerConfigBuilder {
    listen_addr: Option<String>,
    max_body_bytes: Option<usize>,
}

impl ServerConfigBuilder {
    /// Set the listen address.
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.listen_addr = Some(addr.into());
        self
    }

    /// Set the request body limit.
    pub fn max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = Some(limit);
        self
    }

    /// Build the ServerConfig.
    pub fn build(self) -> ServerConfig {
        ServerConfig {
            listen_addr: self
                .listen_addr
                .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string()),
            max_body_bytes: self.max_body_bytes.unwrap_or(DEFAULT_MAX_BODY_BYTES),
        }
    }
}

/// A bound HTTP server in front of a [`TelemetryApi`].
pub struct ApiServer {
    listener: TcpListener,
    api: Arc<dyn TelemetryApi>,
    max_body_bytes: usize,
}

impl std::fmt::Debug for ApiServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiServer")
            .field("listener", &self.listener)
            .field("max_body_bytes", &self.max_body_bytes)
            .finish_non_exhaustive()
    }
}

impl ApiServer {
    /// Bind the listener. Port 0 picks a free port; see
    /// [`local_addr`](Self::local_addr).
    pub async fn bind(config: &ServerConfig, api: Arc<dyn TelemetryApi>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(config.listen_addr.as_str()).await?;
        Ok(Self {
            listener,
            api,
            max_body_bytes: config.max_body_bytes,
        })
    }

    /// The address actually bound.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` fires.
    ///
    /// Connections already accepted finish on their own tasks.
    pub async fn serve(self, mut shutdown: Shutdown) {
        if let Ok(addr) = self.listener.local_addr() {
            info!(%addr, "API server listening");
        }

        loop {
            let (stream, peer) = tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "Failed to accept connection");
                        if pause_after_accept_error(&mut shutdown).await {
                            continue;
                        }
                        break;
                    }
                },
                _ = shutdown.triggered() => break,
            };

            let io = TokioIo::new(stream);
            let api = self.api.clone();
            let limit = self.max_body_bytes;

            tokio::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    let api = api.clone();
                    async move { Ok::<_, Infallible>(handle_request(req, api.as_ref(), limit).await) }
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    debug!(%peer, error = %e, "Connection closed with error");
                }
            });
        }

        info!("API server stopped");
    }

    /// Spawn [`serve`](Self::serve) on the tokio runtime.
    pub fn spawn(self, shutdown: Shutdown) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.serve(shutdown))
    }
}

/// Returns false if shutdown fired during the pause.
async fn pause_after_accept_error(shutdown: &mut Shutdown) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(ACCEPT_ERROR_DELAY) => true,
        _ = shutdown.triggered() => false,
    }
}

enum Route {
    Health,
    Data(String),
    Snapshots,
    NotFound,
}

fn route(path: &str) -> Route {
    match path {
        "/health" | "/healthz" => Route::Health,
        "/snapshots" => Route::Snapshots,
        _ => match path.strip_prefix("/data/").map(percent_decode) {
            Some(Some(key)) => Route::Data(key),
            _ => Route::NotFound,
        },
    }
}

async fn handle_request(
    req: Request<Incoming>,
    api: &dyn TelemetryApi,
    max_body_bytes: usize,
) -> Response<Full<Bytes>> {
    let method = req.method().clone();
    let query = req.uri().query().map(str::to_string);
    let target = route(req.uri().path());

    match (method, target) {
        (Method::GET, Route::Health) => text(StatusCode::OK, "OK"),

        (Method::POST, Route::Data(key)) => {
            let body = match Limited::new(req.into_body(), max_body_bytes).collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
                    return text(StatusCode::PAYLOAD_TOO_LARGE, "Payload Too Large");
                }
                Err(e) => {
                    debug!(error = %e, "Failed to read request body");
                    return text(StatusCode::BAD_REQUEST, "Bad Request");
                }
            };
            match api.put_data(&key, body.to_vec()).await {
                Ok(()) => empty(StatusCode::NO_CONTENT),
                Err(ApiError::InvalidKey(key)) => {
                    text(StatusCode::BAD_REQUEST, &format!("Invalid key: {key}"))
                }
                Err(e) => {
                    error!(queue = %key, error = %e, "Failed to store sample");
                    text(StatusCode::SERVICE_UNAVAILABLE, &e.to_string())
                }
            }
        }

        (Method::GET, Route::Data(key)) => {
            let items = api.get_data(&key).await;
            match codec::encode_frames(&items) {
                Ok(body) => bytes(StatusCode::OK, "application/octet-stream", body),
                Err(e) => {
                    error!(queue = %key, error = %e, "Failed to frame queue content");
                    text(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
                }
            }
        }

        (Method::GET, Route::Snapshots) => {
            let (low, high) = match parse_range(query.as_deref()) {
                Ok(range) => range,
                Err(msg) => return text(StatusCode::BAD_REQUEST, &msg),
            };
            let snapshots = api.get_snapshots(low, high).await;
            match codec::encode(&snapshots) {
                Ok(body) => bytes(StatusCode::OK, "application/json", body),
                Err(e) => {
                    error!(error = %e, "Failed to encode snapshots");
                    text(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
                }
            }
        }

        (Method::DELETE, Route::Snapshots) => {
            api.delete_all_snapshots().await;
            empty(StatusCode::NO_CONTENT)
        }

        (_, Route::NotFound) => text(StatusCode::NOT_FOUND, "Not Found"),
        _ => text(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed"),
    }
}

fn bytes(status: StatusCode, content_type: &'static str, body: Vec<u8>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn text(status: StatusCode, body: &str) -> Response<Full<Bytes>> {
    bytes(status, "text/plain", body.as_bytes().to_vec())
}

fn empty(status: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

/// Parse `from` and `to` query parameters. Missing bounds are open.
fn parse_range(query: Option<&str>) -> Result<(f64, f64), String> {
    let mut low = f64::NEG_INFINITY;
    let mut high = f64::INFINITY;

    for pair in query.unwrap_or_default().split('&').filter(|p| !p.is_empty()) {
        let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
        let bound = match name {
            "from" => &mut low,
            "to" => &mut high,
            _ => continue,
        };
        *bound = match value.parse::<f64>() {
            Ok(v) if !v.is_nan() => v,
            _ => return Err(format!("Invalid value for {name}: {value:?}")),
        };
    }

    Ok((low, high))
}

/// Percent-encode a key for use as one path segment.
pub(crate) fn percent_encode(key: &str) -> String {
    utf8_percent_encode(key, KEY_SEGMENT).to_string()
}

/// Decode `%XX` sequences. Malformed escapes are kept verbatim; `None` if
/// the result is not UTF-8.
fn percent_decode(s: &str) -> Option<String> {
    percent_decode_str(s)
        .decode_utf8()
        .ok()
        .map(|key| key.into_owned())
}
