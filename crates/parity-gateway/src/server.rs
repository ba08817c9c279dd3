use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::trace::TraceLayer;

use crate::broker::Broker;
use crate::connection;

/// Gateway configuration.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub bind_addr: String,
    /// Shared connect token; empty disables authentication.
    pub token: String,
    pub send_queue: usize,
    pub ping_interval: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8765".to_string(),
            token: String::new(),
            send_queue: 256,
            ping_interval: Duration::from_secs(20),
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<Broker>,
    pub send_queue: usize,
    pub ping_interval: Duration,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Bind `config.bind_addr` and start serving.
pub async fn start(config: GatewayConfig) -> Result<GatewayHandle, std::io::Error> {
    let listener = TcpListener::bind(&config.bind_addr).await?;
    serve(listener, config)
}

/// Serve on an already bound listener.
pub fn serve(listener: TcpListener, config: GatewayConfig) -> Result<GatewayHandle, std::io::Error> {
    let local_addr = listener.local_addr()?;
    let broker = Arc::new(Broker::new(config.token.clone()));
    if config.token.is_empty() {
        tracing::warn!("gateway token is empty; connect authentication disabled");
    }

    let router = build_router(AppState {
        broker: Arc::clone(&broker),
        send_queue: config.send_queue,
        ping_interval: config.ping_interval,
    });

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await;
        if let Err(error) = result {
            tracing::error!(%error, "gateway server failed");
        }
    });

    tracing::info!(addr = %local_addr, "gateway listening");

    Ok(GatewayHandle {
        local_addr,
        broker,
        shutdown: Some(shutdown_tx),
        server,
    })
}

/// Handle returned by [`start`]; keeps the accept loop alive.
pub struct GatewayHandle {
    local_addr: SocketAddr,
    broker: Arc<Broker>,
    shutdown: Option<oneshot::Sender<()>>,
    server: tokio::task::JoinHandle<()>,
}

impl GatewayHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// WebSocket URL for clients on this host.
    pub fn ws_url(&self) -> String {
        format!("ws://127.0.0.1:{}/ws", self.local_addr.port())
    }

    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    /// Stop accepting connections and wait for the accept loop to exit.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = (&mut self.server).await;
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_ws_connection(socket, state.broker, state.send_queue, state.ping_interval)
    })
}

/// Health check HTTP endpoint; same body as the `health` method.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.broker.status())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn state() -> AppState {
        AppState {
            broker: Arc::new(Broker::new("")),
            send_queue: 8,
            ping_interval: Duration::from_secs(20),
        }
    }

    #[test]
    fn default_config() {
        let config = GatewayConfig::default();
        assert_eq!(config.bind_addr, "0.0.0.0:8765");
        assert_eq!(config.ping_interval, Duration::from_secs(20));
        assert!(config.token.is_empty());
    }

    #[tokio::test]
    async fn health_endpoint_reports_status() {
        let app = build_router(state());
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["status"], "ok");
        assert_eq!(value["clientCount"], 0);
        assert_eq!(value["clients"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn plain_get_on_ws_route_is_rejected() {
        let app = build_router(state());
        let response = app
            .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn start_on_ephemeral_port_and_shutdown() {
        let handle = start(GatewayConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            ..GatewayConfig::default()
        })
        .await
        .unwrap();
        assert_ne!(handle.local_addr().port(), 0);
        assert!(handle.ws_url().ends_with("/ws"));
        handle.shutdown().await;
    }
}
