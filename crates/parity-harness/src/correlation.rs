//! One-send-then-await response matching.

use std::fmt::Display;
use std::time::Duration;

use futures::Stream;
use parity_core::{Envelope, ParityError, Response};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;

use crate::reader::FrameReader;

/// Read until the response to `request_id` arrives or `timeout` elapses.
///
/// Every other frame is discarded, not queued: a later waiter will not see
/// it. Callers send one request and wait for it before sending the next.
pub async fn wait_for_response<S, E>(
    reader: &mut FrameReader<S>,
    request_id: &str,
    timeout: Duration,
) -> Result<Response, ParityError>
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let deadline = Instant::now() + timeout;
    loop {
        match reader.next_until(deadline).await? {
            Some(Envelope::Response(response)) if response.id == request_id => return Ok(response),
            Some(other) => tracing::trace!(request_id, frame = ?other, "discarding frame"),
            None => {
                return Err(ParityError::timeout(
                    format!("response to {request_id}"),
                    timeout,
                ))
            }
        }
    }
}
