//! Local broadcast endpoint
//!
//! WebSocket fan-out server running on its own thread with its own runtime,
//! so a slow or stuck subscriber can never hold up the engine. The engine
//! hands rendered JSON to `BroadcastHandle::broadcast`, which only does an
//! unbounded channel send per client. The same thread serves the /health
//! and /metrics HTTP endpoints.

use std::collections::HashMap;
use std::net::TcpListener as StdTcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use prometheus::{Encoder, TextEncoder};
use tokio::net::TcpListener;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

use super::json::iso_timestamp;
use super::Telemetry;
use crate::error::{FeedError, Result};
use crate::messages::FeedStatus;

type ClientMap = Arc<Mutex<HashMap<u64, UnboundedSender<String>>>>;

/// Thread-safe sender half of the broadcast server.
#[derive(Clone)]
pub struct BroadcastHandle {
    clients: ClientMap,
    running: Arc<AtomicBool>,
    telemetry: Arc<Telemetry>,
}

impl BroadcastHandle {
    /// Queue a payload to every connected client. Never blocks; clients
    /// whose channel is gone are dropped from the registry.
    pub fn broadcast(&self, payload: serde_json::Value) {
        if !self.running.load(Ordering::Relaxed) {
            return;
        }

        let mut clients = self.clients.lock();
        if clients.is_empty() {
            return;
        }

        let text = payload.to_string();
        clients.retain(|id, tx| {
            let alive = tx.send(text.clone()).is_ok();
            if !alive {
                debug!(client = id, "Dropping dead broadcast client");
            }
            alive
        });
        self.telemetry.broadcast_clients.set(clients.len() as i64);
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
}

/// WebSocket broadcast server plus health/metrics HTTP endpoints.
pub struct BroadcastServer {
    handle: BroadcastHandle,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl BroadcastServer {
    /// Bind both listeners and launch the server thread. Binding happens
    /// synchronously so a taken port fails startup instead of surfacing
    /// later from a background thread.
    pub fn start(
        broadcast_port: u16,
        health_port: u16,
        telemetry: Arc<Telemetry>,
        status: Arc<FeedStatus>,
    ) -> Result<Self> {
        let ws_listener = bind(broadcast_port, "broadcast")?;
        let health_listener = bind(health_port, "health")?;

        let running = Arc::new(AtomicBool::new(true));
        let handle = BroadcastHandle {
            clients: Arc::new(Mutex::new(HashMap::new())),
            running: Arc::clone(&running),
            telemetry: Arc::clone(&telemetry),
        };

        let thread_handle = handle.clone();
        let thread_running = Arc::clone(&running);
        let thread = thread::Builder::new()
            .name("broadcast".to_string())
            .spawn(move || {
                serve(
                    ws_listener,
                    health_listener,
                    thread_handle,
                    thread_running,
                    telemetry,
                    status,
                );
            })
            .map_err(|e| FeedError::BroadcastError(e.to_string()))?;

        info!(broadcast_port, health_port, "Broadcast server started");

        Ok(Self {
            handle,
            running,
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> BroadcastHandle {
        self.handle.clone()
    }

    /// Stop the server and join its thread.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        info!("Broadcast server stopped");
    }
}

impl Drop for BroadcastServer {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.stop();
        }
    }
}

fn bind(port: u16, what: &str) -> Result<StdTcpListener> {
    let listener = StdTcpListener::bind(("0.0.0.0", port))
        .map_err(|e| FeedError::BroadcastError(format!("cannot bind {what} port {port}: {e}")))?;
    listener
        .set_nonblocking(true)
        .map_err(|e| FeedError::BroadcastError(e.to_string()))?;
    Ok(listener)
}

fn serve(
    ws_listener: StdTcpListener,
    health_listener: StdTcpListener,
    handle: BroadcastHandle,
    running: Arc<AtomicBool>,
    telemetry: Arc<Telemetry>,
    status: Arc<FeedStatus>,
) {
    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            warn!(error = %e, "Broadcast runtime failed to start");
            return;
        }
    };

    rt.block_on(async move {
        let api_state = ApiState { telemetry, status };
        let app = Router::new()
            .route("/health", get(health_endpoint))
            .route("/metrics", get(metrics_endpoint))
            .with_state(api_state);

        let health = async {
            match TcpListener::from_std(health_listener) {
                Ok(listener) => {
                    if let Err(e) = axum::serve(listener, app).await {
                        warn!(error = %e, "Health server error");
                    }
                }
                Err(e) => warn!(error = %e, "Health listener error"),
            }
        };
        tokio::pin!(health);

        let accept = async {
            let listener = match TcpListener::from_std(ws_listener) {
                Ok(listener) => listener,
                Err(e) => {
                    warn!(error = %e, "Broadcast listener error");
                    return;
                }
            };
            let mut next_id: u64 = 0;
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        next_id += 1;
                        let id = next_id;
                        debug!(client = id, peer = %peer, "Broadcast client connecting");
                        tokio::spawn(client_session(id, stream, handle.clone()));
                    }
                    Err(e) => {
                        warn!(error = %e, "Broadcast accept error");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        };
        tokio::pin!(accept);

        // serve until stop() flips the flag
        loop {
            tokio::select! {
                _ = &mut health => break,
                _ = &mut accept => break,
                _ = tokio::time::sleep(Duration::from_millis(200)) => {
                    if !running.load(Ordering::Relaxed) {
                        break;
                    }
                }
            }
        }
    });
}

async fn client_session(id: u64, stream: tokio::net::TcpStream, handle: BroadcastHandle) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!(client = id, error = %e, "Broadcast handshake failed");
            return;
        }
    };
    let (mut write, mut read) = ws.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    {
        let mut clients = handle.clients.lock();
        clients.insert(id, tx);
        handle.telemetry.broadcast_clients.set(clients.len() as i64);
    }
    info!(client = id, "Broadcast client connected");

    loop {
        tokio::select! {
            payload = rx.recv() => {
                match payload {
                    Some(text) => {
                        if write.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = read.next() => {
                match incoming {
                    // reads also pump protocol-level ping/pong replies
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    {
        let mut clients = handle.clients.lock();
        clients.remove(&id);
        handle.telemetry.broadcast_clients.set(clients.len() as i64);
    }
    info!(client = id, "Broadcast client disconnected");
}

#[derive(Clone)]
struct ApiState {
    telemetry: Arc<Telemetry>,
    status: Arc<FeedStatus>,
}

async fn health_endpoint(State(state): State<ApiState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": if state.status.is_connected() { "healthy" } else { "degraded" },
        "component": "flowbook",
        "feed_state": state.status.state().to_string(),
        "connected": state.status.is_connected(),
        "timestamp": iso_timestamp(),
    }))
}

async fn metrics_endpoint(State(state): State<ApiState>) -> String {
    let encoder = TextEncoder::new();
    let metric_families = state.telemetry.registry().gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Metrics encode error");
    }
    String::from_utf8(buffer).unwrap_or_default()
}
