//! In-memory transports for exercising the harness without a socket.

use std::convert::Infallible;

use futures::channel::mpsc as fmpsc;
use futures::StreamExt;
use parity_core::{decode, Envelope, Request};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_tungstenite::tungstenite::Message;

use crate::client::GatewayClient;
use crate::reader::FrameReader;

pub type FakeStream = UnboundedReceiverStream<Result<Message, Infallible>>;
pub type FakeClient = GatewayClient<FakeStream, fmpsc::UnboundedSender<Message>>;

/// Pushes frames into a fake inbound stream.
#[derive(Clone)]
pub struct FrameFeed {
    tx: mpsc::UnboundedSender<Result<Message, Infallible>>,
}

impl FrameFeed {
    pub fn json(&self, value: Value) {
        self.text(&value.to_string());
    }

    pub fn text(&self, text: &str) {
        let _ = self.tx.send(Ok(Message::text(text)));
    }

    pub fn message(&self, msg: Message) {
        let _ = self.tx.send(Ok(msg));
    }
}

pub fn feed() -> (FrameFeed, FrameReader<FakeStream>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (FrameFeed { tx }, FrameReader::new(UnboundedReceiverStream::new(rx)))
}

/// A client wired to channels: `feed` injects inbound frames, `sent`
/// yields what the client wrote.
pub fn loopback() -> (FakeClient, FrameFeed, fmpsc::UnboundedReceiver<Message>) {
    let (inbound, reader) = feed();
    let (sink, sent) = fmpsc::unbounded();
    (GatewayClient::from_parts(reader, sink), inbound, sent)
}

/// Serve `sent` requests with `answer` until the client goes away. Anything
/// that is not a request is dropped.
pub fn serve_requests<F>(
    mut sent: fmpsc::UnboundedReceiver<Message>,
    inbound: FrameFeed,
    mut answer: F,
) -> tokio::task::JoinHandle<Vec<Request>>
where
    F: FnMut(&Request) -> Value + Send + 'static,
{
    tokio::spawn(async move {
        let mut seen = Vec::new();
        while let Some(msg) = sent.next().await {
            let Message::Text(text) = msg else { continue };
            if let Ok(Envelope::Request(request)) = decode(text.as_str()) {
                inbound.json(answer(&request));
                seen.push(request);
            }
        }
        seen
    })
}

pub fn decision(request_id: &str, action: &str) -> Value {
    json!({
        "type": "event",
        "event": "security.decision",
        "payload": {
            "requestId": request_id,
            "decision": {"action": action, "risk_score": 0.5},
        },
    })
}

pub fn ok_response(id: &str, result: Value) -> Value {
    json!({"type": "resp", "id": id, "ok": true, "result": result})
}
