//! Helpers for integration tests.
//!
//! This crate stubs out the upstream dashboard API with a real local HTTP
//! server, so cache and fetch tests exercise the full reqwest stack instead
//! of a mocked transport.
//!
//! Tests should start out by calling [`setup`] to initialize logging.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::json;
use tokio::task::JoinHandle;

/// Setup function that is only run once, even if called multiple times.
pub fn setup() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("tradecache=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// A local stand-in for the upstream dashboard API.
///
/// Serves one canned response on both history endpoints and counts the
/// requests it receives, so tests can assert how often a cache actually went
/// upstream. The server dies with this object.
pub struct ApiServer {
    socket: SocketAddr,
    requests: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl ApiServer {
    /// Spawns a server answering every request with `body`.
    ///
    /// Binds to a random local port; must be called from within a tokio
    /// runtime.
    pub fn respond_with(body: serde_json::Value) -> Self {
        let requests = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&requests);
        let handler = move || {
            let body = body.clone();
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                axum::Json(body)
            }
        };
        let router = axum::Router::new()
            .route(
                "/api/subaccounts/futures-orders",
                axum::routing::post(handler.clone()),
            )
            .route(
                "/api/subaccounts/futures-trades",
                axum::routing::post(handler),
            );

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            socket,
            requests,
            handle,
        }
    }

    /// A server answering with a successful envelope wrapping `data`.
    pub fn with_data(data: serde_json::Value) -> Self {
        Self::respond_with(json!({
            "success": true,
            "data": data,
        }))
    }

    /// A server answering HTTP 200 with an in-band failure envelope.
    pub fn failing(error: &str) -> Self {
        Self::respond_with(json!({
            "success": false,
            "error": error,
        }))
    }

    /// The base URL to point a client at.
    pub fn url(&self) -> String {
        format!("http://{}/", self.socket)
    }

    /// Number of requests served so far, across both endpoints.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl Drop for ApiServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
