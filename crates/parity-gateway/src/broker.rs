//! Connection routing: the connect handshake, the status methods and event
//! fan-out. Transport-agnostic; the server feeds it decoded text frames.

use std::sync::Arc;

use parity_core::codec::{self, Envelope, FrameError, Request, Response};
use parity_core::{ConnectionHandle, HandleAllocator};
use serde_json::{json, Value};
use subtle::ConstantTimeEq;

use crate::registry::{ClientRegistry, Connection, Outbound};

/// Identity used when `connect` names no client.
pub const PLACEHOLDER_CLIENT: &str = "unknown-client";
/// Close code sent after a rejected `connect`.
pub const AUTH_FAILURE_CLOSE_CODE: u16 = 4001;

/// What the connection loop should do after a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

/// Broker state shared by every connection task.
pub struct Broker {
    token: String,
    registry: ClientRegistry,
    handles: HandleAllocator,
}

impl Broker {
    /// `token` empty disables authentication.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            registry: ClientRegistry::new(),
            handles: HandleAllocator::new(),
        }
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    /// Assign a handle to a freshly accepted connection.
    pub fn accept(&self) -> ConnectionHandle {
        self.handles.allocate()
    }

    /// Forget a connection. Safe to call more than once.
    pub fn disconnect(&self, handle: ConnectionHandle) {
        let _ = self.registry.unregister(handle);
    }

    /// `{status, clientCount, clients}` over the current registry snapshot.
    pub fn status(&self) -> Value {
        let clients = self.registry.client_names();
        json!({
            "status": "ok",
            "clientCount": clients.len(),
            "clients": clients,
        })
    }

    /// Process one inbound text frame from `conn`.
    pub async fn handle_text(&self, conn: &Connection, text: &str) -> Flow {
        let envelope = match codec::decode(text) {
            Ok(envelope) => envelope,
            Err(error @ FrameError::Json(_)) => {
                tracing::warn!(handle = %conn.handle, %error, "received non-json frame");
                return Flow::Continue;
            }
            Err(error) => {
                tracing::debug!(handle = %conn.handle, %error, "dropping malformed frame");
                return Flow::Continue;
            }
        };

        match envelope {
            Envelope::Request(request) => self.handle_request(conn, request).await,
            Envelope::Event(event) => {
                tracing::info!(handle = %conn.handle, event = %event.name, "event inbound");
                let _ = self.broadcast(Arc::from(text), conn.handle).await;
                Flow::Continue
            }
            Envelope::Response(_) => Flow::Continue,
        }
    }

    /// Deliver `frame` to every registered connection except `exclude`.
    ///
    /// Targets whose writer has gone away are unregistered; the rest still
    /// receive the frame. Returns the number of successful deliveries.
    pub async fn broadcast(&self, frame: Arc<str>, exclude: ConnectionHandle) -> usize {
        let targets = self.registry.broadcast_targets(exclude);
        let mut delivered = 0;
        let mut stale = Vec::new();

        for (handle, tx) in targets {
            if tx.send(Outbound::Text(Arc::clone(&frame))).await.is_ok() {
                delivered += 1;
            } else {
                stale.push(handle);
            }
        }

        for handle in stale {
            tracing::debug!(%handle, "broadcast target gone, unregistering");
            let _ = self.registry.unregister(handle);
        }
        delivered
    }

    async fn handle_request(&self, conn: &Connection, request: Request) -> Flow {
        let method = request.normalized_method();
        match method.as_str() {
            "connect" => self.connect(conn, &request).await,
            "health" | "status" | "parity.clients" => {
                reply(conn, Response::success(request.id, self.status())).await
            }
            _ => {
                tracing::debug!(handle = %conn.handle, %method, "unsupported method");
                let message = format!("unsupported method: {method}");
                reply(conn, Response::failure(request.id, 404, message)).await
            }
        }
    }

    async fn connect(&self, conn: &Connection, request: &Request) -> Flow {
        let presented = request
            .params
            .get("auth")
            .and_then(Value::as_object)
            .and_then(|auth| auth.get("token"))
            .and_then(Value::as_str)
            .unwrap_or_default();

        if !self.authorize(presented) {
            tracing::warn!(handle = %conn.handle, "connect rejected: invalid gateway token");
            let _ = conn
                .send(encode(Response::failure(
                    request.id.clone(),
                    401,
                    "invalid gateway token",
                )))
                .await;
            let _ = conn
                .send(Outbound::Close {
                    code: AUTH_FAILURE_CLOSE_CODE,
                    reason: "invalid token".to_string(),
                })
                .await;
            return Flow::Close;
        }

        let name = client_name(request.params.get("client"));
        let _ = self.registry.register(conn.handle, name.clone(), conn.sender());
        reply(
            conn,
            Response::success(request.id.clone(), json!({ "ok": true, "client": name })),
        )
        .await
    }

    fn authorize(&self, presented: &str) -> bool {
        self.token.is_empty() || constant_time_eq(presented, &self.token)
    }
}

/// Compare two secrets without short-circuiting on the first differing byte.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

fn client_name(value: Option<&Value>) -> String {
    let name = match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | Some(Value::Bool(false)) | None => String::new(),
        Some(Value::Number(n)) if n.as_f64() == Some(0.0) => String::new(),
        Some(Value::Array(items)) if items.is_empty() => String::new(),
        Some(Value::Object(map)) if map.is_empty() => String::new(),
        Some(other) => other.to_string(),
    };
    if name.is_empty() {
        PLACEHOLDER_CLIENT.to_string()
    } else {
        name
    }
}

fn encode(response: Response) -> Outbound {
    match Envelope::from(response).to_text() {
        Ok(text) => Outbound::Text(Arc::from(text)),
        Err(error) => {
            // Responses are built from owned JSON values; this only trips on
            // a serializer bug.
            tracing::error!(%error, "failed to encode response");
            Outbound::Text(Arc::from(
                r#"{"type":"resp","id":"unknown","ok":false,"error":{"code":500,"message":"encode failure"}}"#,
            ))
        }
    }
}

async fn reply(conn: &Connection, response: Response) -> Flow {
    if conn.send(encode(response)).await {
        Flow::Continue
    } else {
        Flow::Close
    }
}
