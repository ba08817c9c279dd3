use std::fmt::Display;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{Sink, SinkExt, Stream, StreamExt};
use parity_core::{Envelope, ParityError, Request, Response};
use serde_json::json;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::correlation::wait_for_response;
use crate::reader::FrameReader;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Client over a real WebSocket connection.
pub type WsGatewayClient = GatewayClient<SplitStream<WsStream>, SplitSink<WsStream, Message>>;

/// One harness connection to the gateway: a frame reader plus an outbound sink.
pub struct GatewayClient<S, K> {
    reader: FrameReader<S>,
    sink: K,
}

impl WsGatewayClient {
    /// Open a WebSocket to `url`, failing if the handshake takes longer than
    /// `open_timeout`.
    pub async fn open(url: &str, open_timeout: Duration) -> Result<Self, ParityError> {
        let (ws, _) = tokio::time::timeout(open_timeout, connect_async(url))
            .await
            .map_err(|_| ParityError::timeout(format!("websocket open to {url}"), open_timeout))?
            .map_err(|e| ParityError::Transport(format!("connect to {url} failed: {e}")))?;
        tracing::debug!(url, "websocket opened");
        let (sink, stream) = ws.split();
        Ok(Self::from_parts(FrameReader::new(stream), sink))
    }
}

impl<S, E, K> GatewayClient<S, K>
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
    K: Sink<Message> + Unpin,
    K::Error: Display,
{
    pub fn from_parts(reader: FrameReader<S>, sink: K) -> Self {
        Self { reader, sink }
    }

    pub fn reader(&mut self) -> &mut FrameReader<S> {
        &mut self.reader
    }

    /// Encode and send one envelope.
    pub async fn send(&mut self, envelope: impl Into<Envelope>) -> Result<(), ParityError> {
        let text = envelope
            .into()
            .to_text()
            .map_err(|e| ParityError::Transport(e.to_string()))?;
        self.sink
            .send(Message::text(text))
            .await
            .map_err(|e| ParityError::Transport(e.to_string()))
    }

    /// Send `request` and wait for its response.
    pub async fn call(&mut self, request: Request, timeout: Duration) -> Result<Response, ParityError> {
        let id = request.id.clone();
        self.send(request).await?;
        wait_for_response(&mut self.reader, &id, timeout).await
    }

    /// Run the `connect` handshake as `client_name`.
    ///
    /// A rejected connect is an [`ParityError::Authentication`] error.
    pub async fn handshake(
        &mut self,
        client_name: &str,
        token: &str,
        timeout: Duration,
    ) -> Result<Response, ParityError> {
        let response = self.call(connect_request(client_name, token), timeout).await?;
        if !response.ok {
            let detail = response
                .error
                .as_ref()
                .map(|e| format!("{} {}", e.code, e.message))
                .unwrap_or_else(|| "connect returned ok=false".to_string());
            return Err(ParityError::Authentication(format!(
                "{client_name} connect rejected: {detail}"
            )));
        }
        tracing::info!(client = client_name, "connected to gateway");
        Ok(response)
    }

    /// Close the outbound half.
    pub async fn close(mut self) -> Result<(), ParityError> {
        self.sink
            .close()
            .await
            .map_err(|e| ParityError::Transport(e.to_string()))
    }
}

/// The `connect` request every harness role sends first.
pub fn connect_request(client_name: &str, token: &str) -> Request {
    Request::new(
        format!("connect-{client_name}"),
        "connect",
        json!({
            "client": client_name,
            "role": "client",
            "auth": {"token": token},
        }),
    )
}
