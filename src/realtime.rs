//! Realtime change feed over the provider's Phoenix-channel websocket.
//!
//! ARCHITECTURE
//! ============
//! One background task owns the socket. [`RealtimeFeed::subscribe`] and
//! [`RealtimeFeed::remove_channel`] only enqueue commands, so both are safe to
//! call from `Drop`. The task keeps the table of live channels and re-joins
//! all of them after every reconnect.
//!
//! PROTOCOL
//! ========
//! JSON messages `{topic, event, payload, ref}`:
//! - `phx_join` / `phx_leave` per channel topic;
//! - `heartbeat` on topic `phoenix` every `heartbeat_secs`;
//! - inbound `postgres_changes` carry `payload.data.{type, record, old_record}`.
//!
//! ERROR HANDLING
//! ==============
//! Transport errors end the connection and trigger reconnect with exponential
//! backoff (1s doubling to 10s). Undecodable messages are logged and skipped.

#[cfg(test)]
#[path = "realtime_test.rs"]
mod tests;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::config::ApiConfig;
use crate::error::FeedError;
use crate::http::TokenSource;
use crate::services::{ChangeFeed, FeedChannel, FeedSpec, SubscriptionId};
use crate::types::{ChangeEvent, ChangeKind, Notification};

const INITIAL_BACKOFF_MS: u64 = 1000;
const MAX_BACKOFF_MS: u64 = 10_000;
const PROTOCOL_VERSION: &str = "1.0.0";
const PHOENIX_TOPIC: &str = "phoenix";

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
type WsError = tokio_tungstenite::tungstenite::Error;

// =============================================================================
// WIRE MESSAGES
// =============================================================================

/// One Phoenix channel message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub(crate) struct PhoenixMessage {
    pub(crate) topic: String,
    pub(crate) event: String,
    #[serde(default)]
    pub(crate) payload: Value,
    #[serde(rename = "ref", default)]
    pub(crate) reference: Option<String>,
}

impl PhoenixMessage {
    fn to_text(&self) -> String {
        // A struct of strings and a `Value` always serializes.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Channel topic for `spec`. The nonce keeps a re-subscription distinct from
/// a previous channel for the same user.
pub(crate) fn channel_topic(spec: &FeedSpec, nonce: Uuid) -> String {
    format!("realtime:{}:{}:{}", spec.table, spec.filter.value, nonce.simple())
}

fn postgres_change_filters(spec: &FeedSpec) -> Vec<Value> {
    let all = [ChangeKind::Insert, ChangeKind::Update, ChangeKind::Delete];
    let events: Vec<&str> = if all.iter().all(|k| spec.wants(*k)) {
        vec!["*"]
    } else {
        spec.events.iter().map(|k| k.as_str()).collect()
    };
    events
        .into_iter()
        .map(|event| {
            json!({
                "event": event,
                "schema": "public",
                "table": spec.table,
                "filter": spec.filter.to_query(),
            })
        })
        .collect()
}

pub(crate) fn join_message(topic: &str, spec: &FeedSpec, access_token: Option<&str>, reference: &str) -> PhoenixMessage {
    let mut payload = json!({
        "config": {
            "broadcast": { "self": false },
            "presence": { "key": "" },
            "postgres_changes": postgres_change_filters(spec),
        }
    });
    if let Some(token) = access_token {
        payload["access_token"] = Value::String(token.to_owned());
    }
    PhoenixMessage {
        topic: topic.to_owned(),
        event: "phx_join".to_owned(),
        payload,
        reference: Some(reference.to_owned()),
    }
}

pub(crate) fn leave_message(topic: &str, reference: &str) -> PhoenixMessage {
    PhoenixMessage {
        topic: topic.to_owned(),
        event: "phx_leave".to_owned(),
        payload: json!({}),
        reference: Some(reference.to_owned()),
    }
}

pub(crate) fn heartbeat_message(reference: &str) -> PhoenixMessage {
    PhoenixMessage {
        topic: PHOENIX_TOPIC.to_owned(),
        event: "heartbeat".to_owned(),
        payload: json!({}),
        reference: Some(reference.to_owned()),
    }
}

/// Decode a `postgres_changes` payload into a notification change.
pub(crate) fn decode_change(payload: &Value) -> Option<ChangeEvent> {
    let data = payload.get("data")?;
    match data.get("type")?.as_str()? {
        "INSERT" => record(data.get("record")?).map(ChangeEvent::Insert),
        "UPDATE" => record(data.get("record")?).map(ChangeEvent::Update),
        "DELETE" => {
            let id = match data.get("old_record")?.get("id")? {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                _ => return None,
            };
            Some(ChangeEvent::Delete { id })
        }
        _ => None,
    }
}

fn record(value: &Value) -> Option<Notification> {
    serde_json::from_value(value.clone())
        .map_err(|e| warn!(error = %e, "undecodable notification record"))
        .ok()
}

/// Websocket endpoint for `config`: `ws(s)://<api>/realtime/v1/websocket`.
///
/// # Errors
///
/// Returns an error if the API URL cannot be turned into a websocket URL.
pub fn websocket_url(config: &ApiConfig) -> Result<Url, FeedError> {
    let mut url =
        Url::parse(&config.endpoint("realtime/v1/websocket")).map_err(|e| FeedError::InvalidUrl(e.to_string()))?;
    let scheme = if matches!(url.scheme(), "https" | "wss") { "wss" } else { "ws" };
    url.set_scheme(scheme)
        .map_err(|()| FeedError::InvalidUrl(format!("cannot use {scheme} for {url}")))?;
    url.query_pairs_mut()
        .append_pair("apikey", &config.api_key)
        .append_pair("vsn", PROTOCOL_VERSION);
    Ok(url)
}

// =============================================================================
// FEED
// =============================================================================

enum Command {
    Join { id: SubscriptionId, topic: String, spec: FeedSpec, events: mpsc::UnboundedSender<ChangeEvent> },
    Leave { id: SubscriptionId },
}

/// [`ChangeFeed`] backed by one reconnecting websocket.
pub struct RealtimeFeed {
    commands: mpsc::UnboundedSender<Command>,
    next_id: AtomicU64,
    task: JoinHandle<()>,
}

impl RealtimeFeed {
    /// Start the socket task. Connection happens in the background.
    ///
    /// # Errors
    ///
    /// Returns an error if the websocket URL cannot be derived.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn spawn(config: &ApiConfig, tokens: Arc<dyn TokenSource>) -> Result<Self, FeedError> {
        let url = websocket_url(config)?;
        let heartbeat = Duration::from_secs(config.heartbeat_secs.max(1));
        let (commands, rx) = mpsc::unbounded_channel();
        info!(host = url.host_str().unwrap_or_default(), "realtime feed starting");
        let task = tokio::spawn(run(url, heartbeat, tokens, rx));
        Ok(Self { commands, next_id: AtomicU64::new(0), task })
    }
}

impl ChangeFeed for RealtimeFeed {
    fn subscribe(&self, spec: FeedSpec) -> Result<FeedChannel, FeedError> {
        if spec.table.is_empty() || spec.filter.column.is_empty() || spec.filter.value.is_empty() {
            return Err(FeedError::InvalidFilter(format!("{}: {}", spec.table, spec.filter.to_query())));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let topic = channel_topic(&spec, Uuid::new_v4());
        let (tx, rx) = mpsc::unbounded_channel();
        self.commands
            .send(Command::Join { id, topic, spec, events: tx })
            .map_err(|_| FeedError::Closed)?;
        Ok(FeedChannel { id, events: rx })
    }

    fn remove_channel(&self, id: SubscriptionId) {
        let _ = self.commands.send(Command::Leave { id });
    }
}

impl Drop for RealtimeFeed {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// =============================================================================
// SOCKET TASK
// =============================================================================

struct Channel {
    topic: String,
    spec: FeedSpec,
    events: mpsc::UnboundedSender<ChangeEvent>,
}

enum SessionEnd {
    Shutdown,
    Closed,
}

#[derive(Default)]
struct Refs(u64);

impl Refs {
    fn next(&mut self) -> String {
        self.0 += 1;
        self.0.to_string()
    }
}

async fn run(
    url: Url,
    heartbeat: Duration,
    tokens: Arc<dyn TokenSource>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let mut channels: HashMap<SubscriptionId, Channel> = HashMap::new();
    let mut refs = Refs::default();
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    loop {
        match connect_async(url.as_str()).await {
            Ok((stream, _)) => {
                info!(channels = channels.len(), "realtime connected");
                backoff_ms = INITIAL_BACKOFF_MS;
                match drive(stream, &mut channels, &mut commands, &mut refs, heartbeat, tokens.as_ref()).await {
                    Ok(SessionEnd::Shutdown) => {
                        debug!("realtime feed shut down");
                        return;
                    }
                    Ok(SessionEnd::Closed) => warn!(backoff_ms, "realtime connection closed"),
                    Err(e) => warn!(error = %e, backoff_ms, "realtime connection failed"),
                }
            }
            Err(e) => warn!(error = %e, backoff_ms, "realtime connect failed"),
        }

        // Keep the channel table current while waiting to reconnect.
        let sleep = tokio::time::sleep(Duration::from_millis(backoff_ms));
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                () = &mut sleep => break,
                command = commands.recv() => match command {
                    Some(command) => apply_offline(&mut channels, command),
                    None => return,
                },
            }
        }
        backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
    }
}

fn apply_offline(channels: &mut HashMap<SubscriptionId, Channel>, command: Command) {
    match command {
        Command::Join { id, topic, spec, events } => {
            channels.insert(id, Channel { topic, spec, events });
        }
        Command::Leave { id } => {
            channels.remove(&id);
        }
    }
}

async fn drive(
    stream: WsStream,
    channels: &mut HashMap<SubscriptionId, Channel>,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    refs: &mut Refs,
    heartbeat: Duration,
    tokens: &dyn TokenSource,
) -> Result<SessionEnd, WsError> {
    let (mut sink, mut source) = stream.split();

    for channel in channels.values() {
        let join = join_message(&channel.topic, &channel.spec, tokens.access_token().as_deref(), &refs.next());
        sink.send(Message::Text(join.to_text().into())).await?;
    }

    let mut ticker = tokio::time::interval(heartbeat);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Join { id, topic, spec, events }) => {
                    let join = join_message(&topic, &spec, tokens.access_token().as_deref(), &refs.next());
                    debug!(channel = id, topic = %topic, "realtime join");
                    channels.insert(id, Channel { topic, spec, events });
                    sink.send(Message::Text(join.to_text().into())).await?;
                }
                Some(Command::Leave { id }) => {
                    if let Some(channel) = channels.remove(&id) {
                        debug!(channel = id, topic = %channel.topic, "realtime leave");
                        let leave = leave_message(&channel.topic, &refs.next());
                        sink.send(Message::Text(leave.to_text().into())).await?;
                    }
                }
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    return Ok(SessionEnd::Shutdown);
                }
            },
            _ = ticker.tick() => {
                sink.send(Message::Text(heartbeat_message(&refs.next()).to_text().into())).await?;
            }
            message = source.next() => match message {
                Some(Ok(Message::Text(text))) => route(text.as_str(), channels),
                Some(Ok(Message::Close(_))) | None => return Ok(SessionEnd::Closed),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e),
            },
        }
    }
}

/// Dispatch one inbound text frame to the channel owning its topic.
fn route(text: &str, channels: &HashMap<SubscriptionId, Channel>) {
    let message: PhoenixMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            warn!(error = %e, "undecodable realtime message");
            return;
        }
    };

    match message.event.as_str() {
        "postgres_changes" => {
            let Some(channel) = channels.values().find(|c| c.topic == message.topic) else {
                debug!(topic = %message.topic, "change for unknown topic");
                return;
            };
            let Some(change) = decode_change(&message.payload) else {
                warn!(topic = %message.topic, "undecodable postgres change");
                return;
            };
            if channel.spec.wants(change.kind()) {
                let _ = channel.events.send(change);
            }
        }
        "phx_reply" => {
            let status = message.payload.get("status").and_then(Value::as_str).unwrap_or_default();
            if status != "ok" && message.topic != PHOENIX_TOPIC {
                warn!(topic = %message.topic, status, response = %message.payload, "realtime join rejected");
            }
        }
        "phx_error" | "phx_close" => warn!(topic = %message.topic, event = %message.event, "realtime channel closed"),
        other => debug!(topic = %message.topic, event = other, "realtime message ignored"),
    }
}
