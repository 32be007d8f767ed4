//! Control channel: the non-media duplex channel carrying room events.
//!
//! Connect sequence: open the WebSocket, send an auth frame, then a
//! join frame naming the room. Inbound messages are decoded by
//! [`parse_control_message`] into [`SpaceEvent`]s; unrecognized shapes
//! are silently ignored. On close a `Disconnected` event fires and no
//! reconnection is attempted; the owning room rebuilds from scratch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use airwave_core::{Error, Result};

use crate::config::ControlChannelConfig;
use crate::events::SpaceEvent;

/// Guest-broadcasting event codes found in control message bodies.
mod codes {
    pub const SPEAKER_REQUEST: u64 = 1;
    pub const SPEAKER_ACCEPTED: u64 = 12;
    pub const SPEAKER_MUTED: u64 = 16;
    pub const SPEAKER_UNMUTED: u64 = 17;
    /// `type` field value marking an emoji reaction
    pub const REACTION_TYPE: u64 = 2;
}

/// Outbound surface of a connected control channel.
#[async_trait]
pub trait ControlChannel: Send + Sync {
    /// Send an emoji reaction into the room.
    async fn react(&self, emoji: &str) -> Result<()>;

    /// Close the channel. Idempotent.
    async fn disconnect(&self) -> Result<()>;
}

/// Builds connected control channels; the seam rooms use so tests can
/// substitute a mock channel.
#[async_trait]
pub trait ChannelFactory: Send + Sync {
    async fn connect(
        &self,
        config: ControlChannelConfig,
        events: broadcast::Sender<SpaceEvent>,
    ) -> Result<Arc<dyn ControlChannel>>;
}

/// Production [`ChannelFactory`] over tokio-tungstenite.
pub struct WebSocketChannelFactory;

#[async_trait]
impl ChannelFactory for WebSocketChannelFactory {
    async fn connect(
        &self,
        config: ControlChannelConfig,
        events: broadcast::Sender<SpaceEvent>,
    ) -> Result<Arc<dyn ControlChannel>> {
        let client = ChatClient::connect(config, events).await?;
        Ok(Arc::new(client))
    }
}

/// WebSocket control-channel client.
pub struct ChatClient {
    outbound: mpsc::Sender<Message>,
    closed: AtomicBool,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    forward_task: Mutex<Option<JoinHandle<()>>>,
}

impl ChatClient {
    /// Connect, authenticate, and join the room. Decoded inbound
    /// events are published to `events`.
    pub async fn connect(
        config: ControlChannelConfig,
        events: broadcast::Sender<SpaceEvent>,
    ) -> Result<Self> {
        info!(endpoint = %config.endpoint, room = %config.room_id, "connecting control channel");
        let (ws, _) = connect_async(config.endpoint.as_str())
            .await
            .map_err(|e| Error::Channel(format!("connect {}: {e}", config.endpoint)))?;
        let (mut sink, mut stream) = ws.split();

        let auth = json!({ "payload": json!({ "access_token": config.access_token }).to_string(), "kind": 3 });
        sink.send(Message::Text(auth.to_string()))
            .await
            .map_err(|e| Error::Channel(format!("auth frame: {e}")))?;

        let join = encode_envelope(&json!({ "room": config.room_id }))?;
        sink.send(Message::Text(join))
            .await
            .map_err(|e| Error::Channel(format!("join frame: {e}")))?;

        // Outbound frames funnel through a channel so `react` never
        // touches the sink concurrently with the forward task.
        let (outbound, mut outbound_rx) = mpsc::channel::<Message>(64);
        let forward_task = tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                let is_close = matches!(msg, Message::Close(_));
                if let Err(e) = sink.send(msg).await {
                    warn!(error = %e, "control channel send failed");
                    break;
                }
                if is_close {
                    break;
                }
            }
        });

        let reader_task = tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        if let Some(event) = parse_control_message(&text) {
                            debug!(event = event.name(), "control channel event");
                            let _ = events.send(event);
                        }
                    }
                    Ok(Message::Close(_)) => {
                        info!("control channel closed by server");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "control channel read error");
                        break;
                    }
                }
            }
            let _ = events.send(SpaceEvent::Disconnected);
        });

        Ok(Self {
            outbound,
            closed: AtomicBool::new(false),
            reader_task: Mutex::new(Some(reader_task)),
            forward_task: Mutex::new(Some(forward_task)),
        })
    }
}

#[async_trait]
impl ControlChannel for ChatClient {
    async fn react(&self, emoji: &str) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Capability("control channel is closed".to_string()));
        }
        let frame = encode_envelope(&json!({
            "type": codes::REACTION_TYPE,
            "body": emoji,
        }))?;
        self.outbound
            .send(Message::Text(frame))
            .await
            .map_err(|_| Error::Channel("control channel writer gone".to_string()))
    }

    async fn disconnect(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let _ = self.outbound.send(Message::Close(None)).await;
        // The forward task exits after it flushes the close frame;
        // wait for that instead of aborting mid-send.
        let forward = self.forward_task.lock().take();
        if let Some(task) = forward {
            let _ = task.await;
        }
        if let Some(task) = self.reader_task.lock().take() {
            task.abort();
        }
        Ok(())
    }
}

/// Wrap a typed body in the JSON envelope the inbound side parses:
/// outer `{kind, payload}` where `payload` holds a `{body, kind}`
/// object and `body` is the typed record, each layer string-encoded.
pub fn encode_envelope(body: &Value) -> Result<String> {
    let payload = json!({ "body": serde_json::to_string(body)?, "kind": 1 });
    Ok(json!({ "kind": 2, "payload": payload.to_string() }).to_string())
}

/// Decode one inbound control message into a typed event.
///
/// Defensive by design: any shape that does not match the dispatch
/// table yields `None` and is dropped by the caller.
pub fn parse_control_message(text: &str) -> Option<SpaceEvent> {
    let outer: Value = serde_json::from_str(text).ok()?;
    let payload: Value = serde_json::from_str(outer.get("payload")?.as_str()?).ok()?;
    let body: Value = serde_json::from_str(payload.get("body")?.as_str()?).ok()?;

    let sender_display = payload
        .pointer("/sender/display_name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();

    if let Some(code) = body.get("guestBroadcastingEvent").and_then(Value::as_u64) {
        let user_id = body.get("guestRemoteID").and_then(Value::as_str);
        let username = body
            .get("guestUsername")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let session_uuid = body
            .get("sessionUUID")
            .and_then(Value::as_str)
            .unwrap_or_default();
        return match code {
            codes::SPEAKER_REQUEST => Some(SpaceEvent::SpeakerRequest {
                user_id: user_id?.to_owned(),
                username: username.to_owned(),
                display_name: sender_display,
                session_uuid: session_uuid.to_owned(),
            }),
            codes::SPEAKER_ACCEPTED => Some(SpaceEvent::NewSpeakerAccepted {
                user_id: user_id?.to_owned(),
                username: username.to_owned(),
                session_uuid: session_uuid.to_owned(),
            }),
            codes::SPEAKER_MUTED => Some(SpaceEvent::MuteStateChanged {
                user_id: user_id?.to_owned(),
                muted: true,
            }),
            codes::SPEAKER_UNMUTED => Some(SpaceEvent::MuteStateChanged {
                user_id: user_id?.to_owned(),
                muted: false,
            }),
            _ => None,
        };
    }

    if let Some(occupancy) = body.get("occupancy").and_then(Value::as_u64) {
        return Some(SpaceEvent::OccupancyUpdate {
            occupancy,
            total_participants: body
                .get("total_participants")
                .and_then(Value::as_u64)
                .unwrap_or(occupancy),
        });
    }

    if body.get("type").and_then(Value::as_u64) == Some(codes::REACTION_TYPE) {
        return Some(SpaceEvent::GuestReaction {
            display_name: sender_display,
            emoji: body
                .get("body")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
        });
    }

    None
}
