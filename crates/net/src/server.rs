//! HTTP server for quorumkv nodes.
//!
//! Serves the public surface (`/v0/status`, `/v0/entity`, `/v0/entities`)
//! and the intra-cluster proxy protocol on the same listener. Requests
//! are admitted through a bounded limiter; when it is exhausted the node
//! answers 503 without doing any work.

use crate::wire;
use bytes::{BufMut, Bytes, BytesMut};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{HeaderMap, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use quorumkv_kv::{Coordinator, KvError, ReplicaClient, ReplicaParams};
use quorumkv_storage::{Value, NEVER_EXPIRES};
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch, Semaphore};

/// How long in-flight connections get to finish during shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Records buffered towards the chunked range-scan body before the
/// producer is paused by backpressure.
const RANGE_CHANNEL_DEPTH: usize = 16;

type Body = BoxBody<Bytes, Infallible>;

/// Shared per-node server state.
pub struct ServerState<R: ReplicaClient> {
    coordinator: Coordinator<R>,
    limiter: Semaphore,
    shutting_down: AtomicBool,
    default_ack: usize,
    default_from: usize,
    cluster_size: usize,
}

impl<R: ReplicaClient> std::fmt::Debug for ServerState<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerState")
            .field("cluster_size", &self.cluster_size)
            .finish_non_exhaustive()
    }
}

impl<R: ReplicaClient> ServerState<R> {
    /// `workers + queue_size` bounds how many requests may be running or
    /// queued at once; everything beyond that is refused with 503.
    pub fn new(coordinator: Coordinator<R>, workers: usize, queue_size: usize) -> Self {
        let topology = coordinator.topology();
        let default_ack = topology.quorum_count();
        let default_from = topology.size();
        let cluster_size = topology.size();
        Self {
            coordinator,
            limiter: Semaphore::new(workers + queue_size),
            shutting_down: AtomicBool::new(false),
            default_ack,
            default_from,
            cluster_size,
        }
    }
}

/// Accept connections until the shutdown signal fires, then refuse new
/// work and drain in-flight connections for a short grace period.
pub async fn serve<R: ReplicaClient>(
    listener: TcpListener,
    state: Arc<ServerState<R>>,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    tracing::info!("http server listening on {}", listener.local_addr()?);
    let (conn_tx, mut conn_rx) = mpsc::channel::<()>(1);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted?;
                let io = TokioIo::new(stream);
                let state = state.clone();
                let guard = conn_tx.clone();
                tokio::spawn(async move {
                    let service = service_fn({
                        let state = state.clone();
                        move |request| handle(state.clone(), request)
                    });
                    if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                        tracing::debug!("connection error: {}", err);
                    }
                    drop(guard);
                });
            }
        }
    }

    state.shutting_down.store(true, Ordering::SeqCst);
    drop(conn_tx);
    if tokio::time::timeout(SHUTDOWN_GRACE, conn_rx.recv())
        .await
        .is_err()
    {
        tracing::warn!(
            "connections still open after {:?} grace period; abandoning them",
            SHUTDOWN_GRACE
        );
    }
    Ok(())
}

async fn handle<R: ReplicaClient>(
    state: Arc<ServerState<R>>,
    request: Request<Incoming>,
) -> Result<Response<Body>, Infallible> {
    if state.shutting_down.load(Ordering::SeqCst) {
        return Ok(empty_response(StatusCode::SERVICE_UNAVAILABLE));
    }

    let path = request.uri().path().to_string();
    let endpoint = match path.as_str() {
        "/v0/status" => "status",
        "/v0/entity" => "entity",
        "/v0/entities" => "entities",
        "/metrics" => "metrics",
        _ => "unknown",
    };
    quorumkv_metrics::metrics()
        .http_requests
        .with_label_values(&[endpoint, request.method().as_str()])
        .inc();

    let response = match path.as_str() {
        "/v0/status" => empty_response(StatusCode::OK),
        "/metrics" => metrics_response(),
        "/v0/entity" | "/v0/entities" => {
            let Ok(_permit) = state.limiter.try_acquire() else {
                quorumkv_metrics::metrics().rejected_requests.inc();
                return Ok(empty_response(StatusCode::SERVICE_UNAVAILABLE));
            };
            if path == "/v0/entity" {
                entity(&state, request).await
            } else {
                entities(&state, request).await
            }
        }
        // Anything off the known surface mirrors the default handler.
        _ => empty_response(StatusCode::BAD_REQUEST),
    };
    Ok(response)
}

// ---------------------------------------------------------------------------
// /v0/entity
// ---------------------------------------------------------------------------

async fn entity<R: ReplicaClient>(
    state: &ServerState<R>,
    request: Request<Incoming>,
) -> Response<Body> {
    let query = wire::parse_query(request.uri().query().unwrap_or(""));
    let Some(id) = query.get("id").filter(|id| !id.is_empty()).cloned() else {
        return empty_response(StatusCode::BAD_REQUEST);
    };

    let replicas = match query.get("replicas") {
        None => None,
        Some(raw) => match std::str::from_utf8(raw) {
            Ok(replicas) => Some(replicas.to_string()),
            Err(_) => return empty_response(StatusCode::BAD_REQUEST),
        },
    };
    let params = match ReplicaParams::parse(
        replicas.as_deref(),
        state.default_ack,
        state.default_from,
        state.cluster_size,
    ) {
        Ok(params) => params,
        Err(err) => {
            tracing::debug!("bad replicas parameter: {}", err);
            return empty_response(StatusCode::BAD_REQUEST);
        }
    };

    let method = request.method().clone();
    let headers = request.headers().clone();
    let is_proxy = headers.contains_key(wire::PROXY_HEADER);

    if method == Method::GET {
        entity_get(state, &id, params, is_proxy).await
    } else if method == Method::PUT {
        let body = match request.into_body().collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(err) => {
                tracing::debug!("failed to read PUT body: {}", err);
                return empty_response(StatusCode::BAD_REQUEST);
            }
        };
        entity_put(state, &id, params, is_proxy, &headers, body).await
    } else if method == Method::DELETE {
        entity_delete(state, &id, params, is_proxy, &headers).await
    } else {
        empty_response(StatusCode::METHOD_NOT_ALLOWED)
    }
}

async fn entity_get<R: ReplicaClient>(
    state: &ServerState<R>,
    key: &[u8],
    params: ReplicaParams,
    is_proxy: bool,
) -> Response<Body> {
    if is_proxy {
        // Replica answer: the raw stored value, expiry unresolved. The
        // originator filters after the merge.
        return match state.coordinator.proxy_get(key).await {
            None => empty_response(StatusCode::NOT_FOUND),
            Some(value) if value.tombstone => Response::builder()
                .status(StatusCode::NOT_FOUND)
                .header(wire::TIMESTAMP_HEADER, value.timestamp_ms)
                .body(empty_body())
                .expect("static response"),
            Some(value) => {
                let mut builder = Response::builder()
                    .status(StatusCode::OK)
                    .header(wire::TIMESTAMP_HEADER, value.timestamp_ms);
                if value.expires_at_ms != NEVER_EXPIRES {
                    builder = builder.header(wire::EXPIRES_HEADER, value.expires_at_ms);
                }
                builder
                    .body(full_body(value.data))
                    .expect("static response")
            }
        };
    }

    match state.coordinator.get(key, params).await {
        Ok(Some(data)) => Response::builder()
            .status(StatusCode::OK)
            .body(full_body(data))
            .expect("static response"),
        Ok(None) => empty_response(StatusCode::NOT_FOUND),
        Err(err) => kv_error_response(err),
    }
}

async fn entity_put<R: ReplicaClient>(
    state: &ServerState<R>,
    key: &[u8],
    params: ReplicaParams,
    is_proxy: bool,
    headers: &HeaderMap,
    body: Bytes,
) -> Response<Body> {
    // Absent or malformed deadlines mean "never expires" by protocol
    // contract, not an error.
    let expires_at_ms = wire::header_u64(headers, wire::EXPIRES_HEADER).unwrap_or(NEVER_EXPIRES);

    if is_proxy {
        let timestamp_ms = wire::header_u64(headers, wire::TIMESTAMP_HEADER)
            .unwrap_or_else(|| state.coordinator.stamp());
        let value = Value::live(body.to_vec(), timestamp_ms, expires_at_ms);
        return match state.coordinator.proxy_put(key, value).await {
            Ok(()) => empty_response(StatusCode::CREATED),
            Err(err) => kv_error_response(err),
        };
    }

    match state
        .coordinator
        .put(key, body.to_vec(), expires_at_ms, params)
        .await
    {
        Ok(()) => empty_response(StatusCode::CREATED),
        Err(err) => kv_error_response(err),
    }
}

async fn entity_delete<R: ReplicaClient>(
    state: &ServerState<R>,
    key: &[u8],
    params: ReplicaParams,
    is_proxy: bool,
    headers: &HeaderMap,
) -> Response<Body> {
    if is_proxy {
        let timestamp_ms = wire::header_u64(headers, wire::TIMESTAMP_HEADER)
            .unwrap_or_else(|| state.coordinator.stamp());
        return match state.coordinator.proxy_delete(key, timestamp_ms).await {
            Ok(()) => empty_response(StatusCode::ACCEPTED),
            Err(err) => kv_error_response(err),
        };
    }

    match state.coordinator.delete(key, params).await {
        Ok(()) => empty_response(StatusCode::ACCEPTED),
        Err(err) => kv_error_response(err),
    }
}

// ---------------------------------------------------------------------------
// /v0/entities
// ---------------------------------------------------------------------------

async fn entities<R: ReplicaClient>(
    state: &ServerState<R>,
    request: Request<Incoming>,
) -> Response<Body> {
    if request.method() != Method::GET {
        return empty_response(StatusCode::METHOD_NOT_ALLOWED);
    }

    let query = wire::parse_query(request.uri().query().unwrap_or(""));
    let Some(start) = query.get("start").filter(|start| !start.is_empty()).cloned() else {
        return empty_response(StatusCode::BAD_REQUEST);
    };
    let end = match query.get("end") {
        Some(end) if end.is_empty() => return empty_response(StatusCode::BAD_REQUEST),
        Some(end) => Some(end.clone()),
        None => None,
    };

    let mut scan = state.coordinator.range(start, end);
    let (frames_tx, frames_rx) = mpsc::channel::<Result<Frame<Bytes>, Infallible>>(RANGE_CHANNEL_DEPTH);

    // The producer pulls from the store one batch at a time and suspends
    // on the bounded channel when the client reads slowly.
    tokio::spawn(async move {
        loop {
            let batch = scan.next_batch().await;
            if batch.is_empty() {
                break;
            }
            for record in batch {
                let mut chunk =
                    BytesMut::with_capacity(record.key.len() + record.data.len() + 1);
                chunk.put_slice(&record.key);
                chunk.put_u8(b'\n');
                chunk.put_slice(&record.data);
                if frames_tx.send(Ok(Frame::data(chunk.freeze()))).await.is_err() {
                    // Client went away; stop pulling from the store.
                    return;
                }
            }
        }
    });

    let body = StreamBody::new(ReceiverStream::new(frames_rx)).boxed();
    Response::builder()
        .status(StatusCode::OK)
        .body(body)
        .expect("static response")
}

/// Minimal `Stream` adapter over an mpsc receiver for the chunked
/// range-scan body.
struct ReceiverStream<T> {
    inner: mpsc::Receiver<T>,
}

impl<T> ReceiverStream<T> {
    fn new(inner: mpsc::Receiver<T>) -> Self {
        Self { inner }
    }
}

impl<T> futures::Stream for ReceiverStream<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.get_mut().inner.poll_recv(cx)
    }
}

// ---------------------------------------------------------------------------
// Response helpers
// ---------------------------------------------------------------------------

fn empty_body() -> Body {
    Full::new(Bytes::new()).boxed()
}

fn full_body(data: Vec<u8>) -> Body {
    Full::new(Bytes::from(data)).boxed()
}

fn empty_response(status: StatusCode) -> Response<Body> {
    Response::builder()
        .status(status)
        .body(empty_body())
        .expect("static response")
}

/// Prometheus text exposition, served from the main listener.
fn metrics_response() -> Response<Body> {
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/plain; version=0.0.4; charset=utf-8")
        .body(full_body(quorumkv_metrics::encode_metrics().into_bytes()))
        .expect("static response")
}

fn kv_error_response(err: KvError) -> Response<Body> {
    match err {
        KvError::InsufficientReplicas(err) => {
            tracing::debug!("quorum not reached: {}", err);
            empty_response(StatusCode::GATEWAY_TIMEOUT)
        }
        KvError::Storage(err) => {
            tracing::error!("storage failure while serving request: {}", err);
            empty_response(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
