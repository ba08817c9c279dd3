use std::fmt::Display;

use futures::{Stream, StreamExt};
use parity_core::{decode, Envelope, ParityError};
use tokio::time::{timeout_at, Instant};
use tokio_tungstenite::tungstenite::Message;

/// Reads decoded envelopes off an inbound WebSocket stream, bounded by a
/// caller-supplied deadline.
///
/// Non-text frames and text that does not decode are skipped. A close frame
/// or the end of the stream is [`ParityError::ConnectionClosed`].
pub struct FrameReader<S> {
    stream: S,
}

impl<S, E> FrameReader<S>
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    /// Next envelope, or `Ok(None)` once `deadline` passes.
    pub async fn next_until(&mut self, deadline: Instant) -> Result<Option<Envelope>, ParityError> {
        loop {
            let item = match timeout_at(deadline, self.stream.next()).await {
                Ok(item) => item,
                Err(_) => return Ok(None),
            };
            match item {
                None => return Err(ParityError::ConnectionClosed("inbound stream ended".into())),
                Some(Err(error)) => return Err(ParityError::Transport(error.to_string())),
                Some(Ok(Message::Text(text))) => match decode(text.as_str()) {
                    Ok(envelope) => return Ok(Some(envelope)),
                    Err(error) => tracing::debug!(%error, "skipping undecodable frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    let detail = frame
                        .map(|f| format!("close code {} ({})", u16::from(f.code), f.reason))
                        .unwrap_or_else(|| "close frame".to_string());
                    return Err(ParityError::ConnectionClosed(detail));
                }
                Some(Ok(_)) => {}
            }
        }
    }
}
