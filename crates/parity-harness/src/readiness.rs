//! Polls the gateway until a required set of clients is registered.

use std::fmt::Display;
use std::time::Duration;

use futures::{Sink, Stream};
use parity_core::{ParityError, Request, Response};
use serde_json::{json, Value};
use tokio::time::{sleep_until, Instant};
use tokio_tungstenite::tungstenite::Message;

use crate::client::GatewayClient;

pub const CLIENTS_METHOD: &str = "parity.clients";

#[derive(Clone, Debug)]
pub struct ReadinessPoller {
    pub required: Vec<String>,
    pub interval: Duration,
    /// Timeout for each individual status call.
    pub per_call: Duration,
    /// Overall deadline across all polls.
    pub overall: Duration,
}

impl ReadinessPoller {
    pub fn new(required: Vec<String>) -> Self {
        Self {
            required,
            interval: Duration::from_millis(500),
            per_call: Duration::from_secs(5),
            overall: Duration::from_secs(45),
        }
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn per_call(mut self, per_call: Duration) -> Self {
        self.per_call = per_call;
        self
    }

    pub fn overall(mut self, overall: Duration) -> Self {
        self.overall = overall;
        self
    }

    fn satisfied_by(&self, clients: &[String]) -> bool {
        self.required.iter().all(|name| clients.contains(name))
    }

    /// Poll until every required name is present at once. Returns the
    /// satisfying client list.
    ///
    /// The last poll happens at the overall deadline; the timeout is raised
    /// only once that deadline has been reached. A per-call timeout or a
    /// rejected status call is fatal.
    pub async fn wait<S, E, K>(
        &self,
        client: &mut GatewayClient<S, K>,
    ) -> Result<Vec<String>, ParityError>
    where
        S: Stream<Item = Result<Message, E>> + Unpin,
        E: Display,
        K: Sink<Message> + Unpin,
        K::Error: Display,
    {
        let deadline = Instant::now() + self.overall;
        let mut attempt: u64 = 0;

        loop {
            attempt += 1;
            let request = Request::new(format!("clients-{attempt}"), CLIENTS_METHOD, json!({}));
            let response = client.call(request, self.per_call).await?;
            if !response.ok {
                return Err(rejection(&response));
            }
            let clients = client_list(response.result.as_ref());

            if self.satisfied_by(&clients) {
                tracing::info!(?clients, attempt, "required clients ready");
                return Ok(clients);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(ParityError::timeout(
                    format!(
                        "clients {:?} (last seen {:?})",
                        self.required, clients
                    ),
                    self.overall,
                ));
            }
            tracing::debug!(?clients, attempt, "waiting for required clients");
            sleep_until((now + self.interval).min(deadline)).await;
        }
    }
}

/// Map an `ok: false` status reply to the error it stands for.
fn rejection(response: &Response) -> ParityError {
    match &response.error {
        Some(error) if error.code == 404 => ParityError::UnsupportedMethod(CLIENTS_METHOD.to_string()),
        Some(error) if error.code == 401 => ParityError::Authentication(error.message.clone()),
        Some(error) => ParityError::Transport(format!(
            "{CLIENTS_METHOD} failed: {} {}",
            error.code, error.message
        )),
        None => ParityError::Transport(format!("{CLIENTS_METHOD} returned ok=false")),
    }
}

fn client_list(result: Option<&Value>) -> Vec<String> {
    result
        .and_then(|r| r.get("clients"))
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
