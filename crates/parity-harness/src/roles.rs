//! Producer, assertor and healthcheck flows.
//!
//! Each `run_*` opens its own WebSocket from settings; the generic halves
//! take an already open client so they can run over any transport.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::time::Duration;

use futures::{Sink, Stream};
use parity_core::{Action, DecisionExpectation, Envelope, ParityError};
use parity_settings::{ClientSettings, ParitySettings};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;

use crate::client::{connect_request, GatewayClient, WsGatewayClient};
use crate::collector::DecisionCollector;
use crate::readiness::ReadinessPoller;
use crate::scenario::{dispatch, load_scenario, ScenarioAction};

pub const PRODUCER_CLIENT: &str = "parity-producer";
pub const ASSERTOR_CLIENT: &str = "parity-assertor";
pub const HEALTHCHECK_CLIENT: &str = "parity-healthcheck";

/// Connect, wait for the required clients, dispatch the scenario and linger.
pub async fn run_producer(settings: &ParitySettings) -> Result<Vec<String>, ParityError> {
    let actions = load_scenario(
        settings.client.scenario_json.as_deref(),
        &settings.client.action_id,
    )?;
    let mut client = WsGatewayClient::open(&settings.client.url, settings.timeouts.open()).await?;
    let ids = produce(&mut client, settings, &actions).await?;
    close_quietly(client).await;
    Ok(ids)
}

pub async fn produce<S, E, K>(
    client: &mut GatewayClient<S, K>,
    settings: &ParitySettings,
    actions: &[ScenarioAction],
) -> Result<Vec<String>, ParityError>
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
    K: Sink<Message> + Unpin,
    K::Error: Display,
{
    let timeouts = &settings.timeouts;
    client
        .handshake(PRODUCER_CLIENT, &settings.client.token, timeouts.connect_response())
        .await?;

    ReadinessPoller::new(settings.client.wait_for_clients.clone())
        .interval(timeouts.poll_interval())
        .per_call(timeouts.poll_call())
        .overall(timeouts.ready())
        .wait(client)
        .await?;

    let ids = dispatch(client, actions, timeouts.scenario_delay()).await?;
    tracing::info!(actions = %ids.join(", "), "producer dispatched actions");
    tokio::time::sleep(timeouts.tail()).await;
    Ok(ids)
}

/// Expectations from settings: the JSON list when configured, otherwise the
/// single `(action_id, expect_action)` pair.
pub fn expectations(settings: &ClientSettings) -> Result<Vec<DecisionExpectation>, ParityError> {
    match settings
        .expectations_json
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        Some(text) => {
            let value: serde_json::Value = serde_json::from_str(text).map_err(|e| {
                ParityError::config(format!("expectations are not valid JSON: {e}"))
            })?;
            DecisionExpectation::list_from_json(&value)
        }
        None => Ok(vec![DecisionExpectation::new(
            settings.action_id.clone(),
            settings.expect_action.clone(),
        )]),
    }
}

/// Connect and collect the expected decisions.
pub async fn run_assertor(settings: &ParitySettings) -> Result<BTreeMap<String, Action>, ParityError> {
    let expected = expectations(&settings.client)?;
    let mut client = WsGatewayClient::open(&settings.client.url, settings.timeouts.open()).await?;
    let verdicts = assert_decisions(&mut client, settings, &expected).await?;
    close_quietly(client).await;
    Ok(verdicts)
}

pub async fn assert_decisions<S, E, K>(
    client: &mut GatewayClient<S, K>,
    settings: &ParitySettings,
    expected: &[DecisionExpectation],
) -> Result<BTreeMap<String, Action>, ParityError>
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
    K: Sink<Message> + Unpin,
    K::Error: Display,
{
    // Validate before touching the network.
    let collector = DecisionCollector::new(expected)?.with_grace(settings.timeouts.grace());
    client
        .handshake(
            ASSERTOR_CLIENT,
            &settings.client.token,
            settings.timeouts.connect_response(),
        )
        .await?;

    let verdicts = collector
        .collect(client.reader(), settings.timeouts.assert())
        .await?;
    for (request_id, action) in &verdicts {
        tracing::info!(%request_id, %action, "assertor verdict");
    }
    Ok(verdicts)
}

/// Probe the gateway: connect and require an `ok` first reply.
pub async fn run_healthcheck(
    settings: &ParitySettings,
    url_override: Option<&str>,
) -> Result<(), ParityError> {
    let url = url_override.unwrap_or(&settings.client.url);
    let timeout = settings.timeouts.healthcheck();
    let mut client = WsGatewayClient::open(url, timeout).await?;
    check_health(&mut client, &settings.client.token, timeout).await?;
    close_quietly(client).await;
    Ok(())
}

pub async fn check_health<S, E, K>(
    client: &mut GatewayClient<S, K>,
    token: &str,
    timeout: Duration,
) -> Result<(), ParityError>
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
    K: Sink<Message> + Unpin,
    K::Error: Display,
{
    client.send(connect_request(HEALTHCHECK_CLIENT, token)).await?;
    let deadline = Instant::now() + timeout;
    match client.reader().next_until(deadline).await? {
        Some(Envelope::Response(response)) if response.ok => Ok(()),
        Some(Envelope::Response(response)) => Err(ParityError::Authentication(
            response
                .error
                .map(|e| format!("{} {}", e.code, e.message))
                .unwrap_or_else(|| "healthcheck connect returned ok=false".to_string()),
        )),
        Some(other) => Err(ParityError::Transport(format!(
            "unexpected first frame from gateway: {other:?}"
        ))),
        None => Err(ParityError::timeout("healthcheck reply", timeout)),
    }
}

async fn close_quietly<S, E, K>(client: GatewayClient<S, K>)
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
    K: Sink<Message> + Unpin,
    K::Error: Display,
{
    if let Err(error) = client.close().await {
        tracing::debug!(%error, "close after success failed");
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::testing::{decision, loopback, ok_response, serve_requests};

    fn fast_settings() -> ParitySettings {
        let mut settings = ParitySettings::default();
        settings.client.wait_for_clients = vec!["agent".into(), ASSERTOR_CLIENT.into()];
        settings.timeouts.ready_ms = 5_000;
        settings
    }

    #[test]
    fn default_expectation_from_settings() {
        let settings = ClientSettings::default();
        assert_eq!(
            expectations(&settings).unwrap(),
            vec![DecisionExpectation::new("parity-action-1", "block")]
        );
    }

    #[test]
    fn expectation_json_overrides_single() {
        let settings = ClientSettings {
            expectations_json: Some(
                r#"[{"requestId":"a","action":"block"},{"id":"b","expect":"allow"}]"#.into(),
            ),
            ..ClientSettings::default()
        };
        let list = expectations(&settings).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[1], DecisionExpectation::new("b", "allow"));

        let broken = ClientSettings {
            expectations_json: Some("{oops".into()),
            ..ClientSettings::default()
        };
        assert!(matches!(expectations(&broken), Err(ParityError::Configuration(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn producer_waits_then_dispatches() {
        let settings = fast_settings();
        let (mut client, inbound, sent) = loopback();
        let server = serve_requests(sent, inbound, |req| match req.method.as_str() {
            "connect" => ok_response(&req.id, json!({"ok": true, "client": PRODUCER_CLIENT})),
            _ => ok_response(
                &req.id,
                json!({"status": "ok", "clients": ["agent", ASSERTOR_CLIENT, PRODUCER_CLIENT]}),
            ),
        });

        let actions = load_scenario(None, "parity-action-1").unwrap();
        let ids = produce(&mut client, &settings, &actions).await.unwrap();
        assert_eq!(ids, vec!["parity-action-1"]);

        drop(client);
        let methods: Vec<_> = server
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.method)
            .collect();
        assert_eq!(methods, vec!["connect", "parity.clients"]);
    }

    #[tokio::test(start_paused = true)]
    async fn producer_rejected_connect_is_fatal() {
        let settings = fast_settings();
        let (mut client, inbound, sent) = loopback();
        let _server = serve_requests(sent, inbound, |req| {
            json!({"type": "resp", "id": req.id, "ok": false,
                   "error": {"code": 401, "message": "invalid gateway token"}})
        });
        let err = produce(&mut client, &settings, &[]).await.unwrap_err();
        assert!(matches!(err, ParityError::Authentication(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn assertor_collects_after_handshake() {
        let settings = fast_settings();
        let (mut client, inbound, sent) = loopback();
        let agent = inbound.clone();
        let _server = serve_requests(sent, inbound, |req| {
            ok_response(&req.id, json!({"ok": true, "client": ASSERTOR_CLIENT}))
        });
        // The decision must arrive after the handshake reply, which discards
        // everything else.
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            agent.json(decision("parity-action-1", "block"));
        });

        let expected = expectations(&settings.client).unwrap();
        let verdicts = assert_decisions(&mut client, &settings, &expected).await.unwrap();
        assert_eq!(verdicts.get("parity-action-1"), Some(&Action::Block));
    }

    #[tokio::test(start_paused = true)]
    async fn assertor_rejects_bad_expectations_before_connecting() {
        let settings = fast_settings();
        let (mut client, _inbound, _sent) = loopback();
        let err = assert_decisions(&mut client, &settings, &[DecisionExpectation::new("a", "maybe")])
            .await
            .unwrap_err();
        assert!(matches!(err, ParityError::Configuration(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn healthcheck_requires_ok_first_frame() {
        let (mut client, inbound, sent) = loopback();
        let _server = serve_requests(sent, inbound, |req| ok_response(&req.id, json!({"ok": true})));
        check_health(&mut client, "", Duration::from_secs(3)).await.unwrap();

        let (mut client, inbound, sent) = loopback();
        let _server = serve_requests(sent, inbound, |req| {
            json!({"type": "resp", "id": req.id, "ok": false})
        });
        let err = check_health(&mut client, "", Duration::from_secs(3))
            .await
            .unwrap_err();
        assert!(matches!(err, ParityError::Authentication(_)));

        let (mut client, _inbound, _sent) = loopback();
        let err = check_health(&mut client, "", Duration::from_secs(3))
            .await
            .unwrap_err();
        assert!(matches!(err, ParityError::Timeout { .. }));
    }
}
