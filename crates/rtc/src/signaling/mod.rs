//! Janus-style WebRTC signaling gateway client.
//!
//! [`JanusClient`] drives the videoroom protocol for one room: session
//! and handle lifecycle, room create/join, publisher configure with SDP
//! offer/answer, per-speaker subscriber negotiation, and a long-poll
//! loop that demultiplexes asynchronous gateway events to waiting
//! callers.

mod transport;

pub use transport::{HttpSignalingTransport, SignalingTransport};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;

use airwave_core::{AudioFrame, Error, Result};

use crate::config::GatewayConfig;
use crate::events::SpaceEvent;
use crate::media::{AudioSink, AudioSource};

/// A publisher visible in the room at join time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherInfo {
    pub user_id: String,
    pub feed_id: u64,
}

/// Result of joining a room as a publisher.
#[derive(Debug, Clone)]
pub struct JoinedRoom {
    /// Gateway-assigned id of the local publisher's feed
    pub publisher_id: u64,
    /// Publishers already active in the room
    pub publishers: Vec<PublisherInfo>,
}

/// Gateway identifiers of the local publisher connection, consumed by
/// platform calls (publish, eject).
#[derive(Debug, Clone, Copy, Default)]
pub struct GatewayIds {
    pub session_id: u64,
    pub handle_id: u64,
    pub publisher_id: u64,
}

/// The gateway surface rooms and plugins depend on.
#[async_trait]
pub trait MediaGateway: Send + Sync {
    /// Issue the room-creation control message (host only).
    async fn create_room(&self) -> Result<()>;

    /// Join as a publisher; resolves once the gateway reports "joined".
    async fn join_as_publisher(&self) -> Result<JoinedRoom>;

    /// Create the publisher peer connection, send the local offer with
    /// a configure message. The answer is applied asynchronously by the
    /// poll loop.
    async fn configure_publisher(&self) -> Result<()>;

    /// Subscribe to a remote speaker's feed. Pass `feed_id = 0` when
    /// unknown; it is then resolved from a gateway publishers event.
    /// Returns the resolved feed id.
    async fn subscribe_speaker(&self, user_id: &str, feed_id: u64) -> Result<u64>;

    /// Tear down the media subscription for one speaker.
    async fn unsubscribe_speaker(&self, user_id: &str) -> Result<()>;

    /// Push locally produced PCM into the outbound track.
    async fn push_audio(&self, samples: &[i16], sample_rate: u32, channel_count: u8) -> Result<()>;

    /// Destroy the gateway room (host teardown). Best-effort.
    async fn destroy_room(&self) -> Result<()>;

    /// Leave the gateway room (guest teardown). Best-effort.
    async fn leave_room(&self) -> Result<()>;

    /// Halt the poll loop and close every peer connection.
    async fn stop(&self) -> Result<()>;

    /// Identifiers of the local publisher connection.
    fn ids(&self) -> GatewayIds;
}

/// Builds connected gateways; the seam rooms use so tests can
/// substitute mocks.
#[async_trait]
pub trait GatewayFactory: Send + Sync {
    async fn connect(
        &self,
        config: GatewayConfig,
        events: broadcast::Sender<SpaceEvent>,
        audio_frames: mpsc::Sender<AudioFrame>,
    ) -> Result<Arc<dyn MediaGateway>>;
}

/// Production factory: HTTP transport, then session create + attach.
pub struct JanusGatewayFactory;

#[async_trait]
impl GatewayFactory for JanusGatewayFactory {
    async fn connect(
        &self,
        config: GatewayConfig,
        events: broadcast::Sender<SpaceEvent>,
        audio_frames: mpsc::Sender<AudioFrame>,
    ) -> Result<Arc<dyn MediaGateway>> {
        let transport = Arc::new(HttpSignalingTransport::new(
            config.gateway_url.clone(),
            config.credential.clone(),
        ));
        let client = JanusClient::new(transport, config, events, audio_frames);
        client.create_session().await?;
        client.attach_plugin().await?;
        Ok(Arc::new(client))
    }
}

/// One live media subscription to a remote speaker.
struct SubscriberHandle {
    gateway_handle_id: u64,
    peer_connection: Arc<RTCPeerConnection>,
    sink: Arc<RwLock<Option<Arc<AudioSink>>>>,
}

struct EventWaiter {
    id: u64,
    what: String,
    predicate: Box<dyn Fn(&Value) -> bool + Send>,
    tx: oneshot::Sender<Value>,
}

/// Client for a Janus-style signaling gateway.
pub struct JanusClient {
    inner: Arc<JanusInner>,
}

struct JanusInner {
    transport: Arc<dyn SignalingTransport>,
    config: GatewayConfig,
    events: broadcast::Sender<SpaceEvent>,
    audio_frames: mpsc::Sender<AudioFrame>,
    session_id: AtomicU64,
    publisher_handle: AtomicU64,
    publisher_id: AtomicU64,
    publisher_pc: RwLock<Option<Arc<RTCPeerConnection>>>,
    audio_source: RwLock<Option<Arc<AudioSource>>>,
    subscribers: Mutex<HashMap<String, SubscriberHandle>>,
    waiters: Mutex<Vec<EventWaiter>>,
    waiter_seq: AtomicU64,
    poll_task: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

fn txid() -> String {
    Uuid::new_v4().to_string()
}

fn media_err(context: &str, e: impl std::fmt::Display) -> Error {
    Error::MediaNegotiation(format!("{context}: {e}"))
}

/// Extract the publishers array from a videoroom event, if present.
fn publishers_in(event: &Value) -> Vec<PublisherInfo> {
    event
        .pointer("/plugindata/data/publishers")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(|p| {
                    let feed_id = p.get("id").and_then(Value::as_u64)?;
                    let user_id = p
                        .get("periscope_user_id")
                        .or_else(|| p.get("display"))
                        .and_then(Value::as_str)?;
                    Some(PublisherInfo {
                        user_id: user_id.to_owned(),
                        feed_id,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

impl JanusClient {
    /// Create an unconnected client. [`create_session`] must run before
    /// anything else.
    ///
    /// [`create_session`]: JanusClient::create_session
    pub fn new(
        transport: Arc<dyn SignalingTransport>,
        config: GatewayConfig,
        events: broadcast::Sender<SpaceEvent>,
        audio_frames: mpsc::Sender<AudioFrame>,
    ) -> Self {
        Self {
            inner: Arc::new(JanusInner {
                transport,
                config,
                events,
                audio_frames,
                session_id: AtomicU64::new(0),
                publisher_handle: AtomicU64::new(0),
                publisher_id: AtomicU64::new(0),
                publisher_pc: RwLock::new(None),
                audio_source: RwLock::new(None),
                subscribers: Mutex::new(HashMap::new()),
                waiters: Mutex::new(Vec::new()),
                waiter_seq: AtomicU64::new(1),
                poll_task: Mutex::new(None),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    /// Create the gateway session and start the poll loop.
    pub async fn create_session(&self) -> Result<u64> {
        let response = self
            .inner
            .transport
            .send("", json!({ "janus": "create", "transaction": txid() }))
            .await?;
        JanusInner::check_gateway_error("create session", &response)?;
        let id = response
            .pointer("/data/id")
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::signaling("create session", "missing session id"))?;
        self.inner.session_id.store(id, Ordering::SeqCst);
        info!(session_id = id, "gateway session created");
        self.spawn_poll_task();
        Ok(id)
    }

    /// Attach a videoroom plugin handle. The first attached handle
    /// becomes the publisher handle.
    pub async fn attach_plugin(&self) -> Result<u64> {
        let handle = self.inner.attach_handle().await?;
        if self.inner.publisher_handle.load(Ordering::SeqCst) == 0 {
            self.inner.publisher_handle.store(handle, Ordering::SeqCst);
        }
        Ok(handle)
    }

    fn spawn_poll_task(&self) {
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            debug!("gateway poll loop started");
            loop {
                if inner.stopped.load(Ordering::SeqCst) {
                    break;
                }
                let session_id = inner.session_id.load(Ordering::SeqCst);
                match inner.transport.poll(session_id).await {
                    Ok(event) => inner.handle_event(&event).await,
                    // Transient poll failures never stop the loop; it
                    // reschedules unconditionally at the fixed cadence.
                    Err(e) => warn!(error = %e, "gateway poll failed"),
                }
                tokio::time::sleep(inner.config.timeouts.poll_interval).await;
            }
            debug!("gateway poll loop stopped");
        });
        *self.inner.poll_task.lock() = Some(task);
    }
}

impl JanusInner {
    fn check_gateway_error(context: &str, response: &Value) -> Result<()> {
        if response.get("janus").and_then(Value::as_str) == Some("error") {
            let reason = response
                .pointer("/error/reason")
                .and_then(Value::as_str)
                .unwrap_or("unknown gateway error");
            return Err(Error::signaling(context, reason));
        }
        if let Some(reason) = response
            .pointer("/plugindata/data/error")
            .and_then(Value::as_str)
        {
            return Err(Error::signaling(context, reason));
        }
        Ok(())
    }

    fn current_session(&self) -> Result<u64> {
        match self.session_id.load(Ordering::SeqCst) {
            0 => Err(Error::Capability("gateway session not created".to_string())),
            id => Ok(id),
        }
    }

    fn publisher_handle_id(&self) -> Result<u64> {
        match self.publisher_handle.load(Ordering::SeqCst) {
            0 => Err(Error::Capability("no publisher handle attached".to_string())),
            id => Ok(id),
        }
    }

    async fn attach_handle(&self) -> Result<u64> {
        let session = self.current_session()?;
        let response = self
            .transport
            .send(
                &format!("/{session}"),
                json!({
                    "janus": "attach",
                    "plugin": "janus.plugin.videoroom",
                    "transaction": txid(),
                }),
            )
            .await?;
        Self::check_gateway_error("attach plugin", &response)?;
        response
            .pointer("/data/id")
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::signaling("attach plugin", "missing handle id"))
    }

    /// Send a videoroom message on a handle, with optional JSEP.
    async fn message(&self, handle: u64, body: Value, jsep: Option<Value>) -> Result<Value> {
        let session = self.current_session()?;
        let mut request = json!({
            "janus": "message",
            "transaction": txid(),
            "body": body,
        });
        if let Some(jsep) = jsep {
            request["jsep"] = jsep;
        }
        let context = format!(
            "message {}",
            request["body"]["request"].as_str().unwrap_or("?")
        );
        let response = self
            .transport
            .send(&format!("/{session}/{handle}"), request)
            .await?;
        Self::check_gateway_error(&context, &response)?;
        Ok(response)
    }

    /// Register an event waiter. The caller registers before sending
    /// the request that triggers the event, so the poll loop cannot
    /// race the registration.
    fn register_waiter<F>(&self, what: &str, predicate: F) -> (u64, oneshot::Receiver<Value>)
    where
        F: Fn(&Value) -> bool + Send + 'static,
    {
        let id = self.waiter_seq.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().push(EventWaiter {
            id,
            what: what.to_owned(),
            predicate: Box::new(predicate),
            tx,
        });
        (id, rx)
    }

    fn drop_waiter(&self, id: u64) {
        self.waiters.lock().retain(|w| w.id != id);
    }

    /// Await a registered waiter with a timeout. On expiry the waiter
    /// is withdrawn and the caller sees [`Error::ProtocolTimeout`].
    async fn await_waiter(
        &self,
        id: u64,
        rx: oneshot::Receiver<Value>,
        what: &str,
        timeout: std::time::Duration,
    ) -> Result<Value> {
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(event)) => Ok(event),
            Ok(Err(_)) => Err(Error::signaling(what, "gateway client stopped")),
            Err(_) => {
                self.drop_waiter(id);
                Err(Error::ProtocolTimeout {
                    event: what.to_owned(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Dispatch one polled gateway event: SDP answers first, then
    /// bookkeeping, then the FIFO waiter list.
    async fn handle_event(&self, event: &Value) {
        if event.get("janus").and_then(Value::as_str) == Some("event") {
            // (a) apply SDP answers on the matching peer connection
            let sender = event.get("sender").and_then(Value::as_u64);
            if let Some(jsep) = event.get("jsep") {
                if jsep.get("type").and_then(Value::as_str) == Some("answer")
                    && sender == Some(self.publisher_handle.load(Ordering::SeqCst))
                {
                    self.apply_publisher_answer(jsep).await;
                }
            }
            // (b) bookkeeping: capture the publisher id
            if event.pointer("/plugindata/data/videoroom").and_then(Value::as_str) == Some("joined")
            {
                if let Some(id) = event.pointer("/plugindata/data/id").and_then(Value::as_u64) {
                    self.publisher_id.store(id, Ordering::SeqCst);
                }
            }
        }

        // (c) first matching waiter, FIFO
        let waiter = {
            let mut waiters = self.waiters.lock();
            waiters
                .iter()
                .position(|w| (w.predicate)(event))
                .map(|i| waiters.remove(i))
        };
        if let Some(waiter) = waiter {
            debug!(what = %waiter.what, "gateway event matched waiter");
            let _ = waiter.tx.send(event.clone());
        }
    }

    async fn apply_publisher_answer(&self, jsep: &Value) {
        let Some(sdp) = jsep.get("sdp").and_then(Value::as_str) else {
            return;
        };
        let pc = self.publisher_pc.read().clone();
        let Some(pc) = pc else {
            warn!("gateway answer arrived before the publisher connection exists");
            return;
        };
        let answer = match RTCSessionDescription::answer(sdp.to_owned()) {
            Ok(answer) => answer,
            Err(e) => {
                let _ = self.events.send(SpaceEvent::Error {
                    context: "sdp answer".to_string(),
                    message: e.to_string(),
                });
                return;
            }
        };
        if let Err(e) = pc.set_remote_description(answer).await {
            // Media failure is reported as an event; the room owner
            // decides whether to tear down.
            let _ = self.events.send(SpaceEvent::Error {
                context: "sdp answer".to_string(),
                message: e.to_string(),
            });
        } else {
            info!("publisher answer applied");
        }
    }

    async fn build_peer_connection(&self) -> Result<Arc<RTCPeerConnection>> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| media_err("register codecs", e))?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| media_err("register interceptors", e))?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();
        let pc = api
            .new_peer_connection(RTCConfiguration {
                ice_servers: self.config.ice_servers(),
                ..Default::default()
            })
            .await
            .map_err(|e| media_err("create peer connection", e))?;
        Ok(Arc::new(pc))
    }

    /// Answer the remote offer and ask the gateway to start the feed.
    /// The caller owns `pc` and tears it down when any step fails.
    async fn answer_subscriber_offer(
        &self,
        pc: &Arc<RTCPeerConnection>,
        offer: RTCSessionDescription,
        handle: u64,
    ) -> Result<()> {
        pc.set_remote_description(offer)
            .await
            .map_err(|e| media_err("set subscriber offer", e))?;
        let answer = pc
            .create_answer(None)
            .await
            .map_err(|e| media_err("create answer", e))?;
        let mut gathered = pc.gathering_complete_promise().await;
        pc.set_local_description(answer)
            .await
            .map_err(|e| media_err("set local answer", e))?;
        let _ = gathered.recv().await;
        let local = pc
            .local_description()
            .await
            .ok_or_else(|| Error::MediaNegotiation("missing local answer".to_string()))?;

        self.message(
            handle,
            json!({ "request": "start", "room": self.config.room_id }),
            Some(serde_json::to_value(&local)?),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl MediaGateway for JanusClient {
    async fn create_room(&self) -> Result<()> {
        let handle = self.inner.publisher_handle_id()?;
        let response = self
            .inner
            .message(
                handle,
                json!({
                    "request": "create",
                    "room": self.inner.config.room_id,
                    "audiocodec": "opus",
                    "videocodec": "h264",
                    "description": self.inner.config.user_id,
                }),
                None,
            )
            .await?;
        let outcome = response
            .pointer("/plugindata/data/videoroom")
            .and_then(Value::as_str);
        if response.get("janus").and_then(Value::as_str) != Some("success")
            || outcome != Some("created")
        {
            return Err(Error::signaling(
                "create room",
                format!("unexpected response shape: {response}"),
            ));
        }
        info!(room = %self.inner.config.room_id, "gateway room created");
        Ok(())
    }

    async fn join_as_publisher(&self) -> Result<JoinedRoom> {
        let handle = self.inner.publisher_handle_id()?;
        let (id, rx) = self.inner.register_waiter("videoroom joined", move |ev| {
            ev.pointer("/plugindata/data/videoroom").and_then(Value::as_str) == Some("joined")
                && ev.get("sender").and_then(Value::as_u64) == Some(handle)
        });
        if let Err(e) = self
            .inner
            .message(
                handle,
                json!({
                    "request": "join",
                    "room": self.inner.config.room_id,
                    "ptype": "publisher",
                    "display": self.inner.config.user_id,
                    "periscope_user_id": self.inner.config.user_id,
                }),
                None,
            )
            .await
        {
            self.inner.drop_waiter(id);
            return Err(e);
        }
        let event = self
            .inner
            .await_waiter(id, rx, "videoroom joined", self.inner.config.timeouts.join)
            .await?;
        let publisher_id = event
            .pointer("/plugindata/data/id")
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::signaling("join room", "joined event missing publisher id"))?;
        let publishers = publishers_in(&event);
        info!(publisher_id, existing = publishers.len(), "joined room as publisher");
        Ok(JoinedRoom {
            publisher_id,
            publishers,
        })
    }

    async fn configure_publisher(&self) -> Result<()> {
        let handle = self.inner.publisher_handle_id()?;
        let pc = self.inner.build_peer_connection().await?;
        let source = Arc::new(AudioSource::new(48_000, 1, &self.inner.config.stream_name)?);

        let sender = pc
            .add_track(source.track())
            .await
            .map_err(|e| media_err("add track", e))?;
        // Drain RTCP so the interceptors keep running.
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });

        let offer = pc
            .create_offer(None)
            .await
            .map_err(|e| media_err("create offer", e))?;
        let mut gathered = pc.gathering_complete_promise().await;
        pc.set_local_description(offer)
            .await
            .map_err(|e| media_err("set local description", e))?;
        let _ = gathered.recv().await;
        let local = pc
            .local_description()
            .await
            .ok_or_else(|| Error::MediaNegotiation("missing local description".to_string()))?;

        *self.inner.publisher_pc.write() = Some(Arc::clone(&pc));
        *self.inner.audio_source.write() = Some(source);

        // The answer comes back through the poll loop.
        self.inner
            .message(
                handle,
                json!({
                    "request": "configure",
                    "room": self.inner.config.room_id,
                    "audio": true,
                    "video": false,
                    "data": false,
                    "session_uuid": "",
                    "stream_name": self.inner.config.stream_name,
                }),
                Some(serde_json::to_value(&local)?),
            )
            .await?;
        info!("publisher offer sent");
        Ok(())
    }

    async fn subscribe_speaker(&self, user_id: &str, feed_id: u64) -> Result<u64> {
        let feed_id = if feed_id != 0 {
            feed_id
        } else {
            // Feed unknown: wait for a gateway event listing this
            // user among the active publishers.
            let wanted = user_id.to_owned();
            let (id, rx) = self.inner.register_waiter("publishers list", move |ev| {
                publishers_in(ev).iter().any(|p| p.user_id == wanted)
            });
            let event = self
                .inner
                .await_waiter(id, rx, "publishers list", self.inner.config.timeouts.subscribe)
                .await?;
            publishers_in(&event)
                .into_iter()
                .find(|p| p.user_id == user_id)
                .map(|p| p.feed_id)
                .ok_or_else(|| Error::signaling("subscribe", "publisher disappeared from event"))?
        };

        // Bookkeeping can update as soon as the id is known, before
        // the media negotiation completes.
        let _ = self.inner.events.send(SpaceEvent::SubscribedSpeaker {
            user_id: user_id.to_owned(),
            feed_id,
        });

        let handle = self.inner.attach_handle().await?;
        let (id, rx) = self.inner.register_waiter("subscriber attached", move |ev| {
            ev.pointer("/plugindata/data/videoroom").and_then(Value::as_str) == Some("attached")
                && ev.get("sender").and_then(Value::as_u64) == Some(handle)
                && ev.get("jsep").is_some()
        });
        if let Err(e) = self
            .inner
            .message(
                handle,
                json!({
                    "request": "join",
                    "room": self.inner.config.room_id,
                    "ptype": "subscriber",
                    "feed": feed_id,
                }),
                None,
            )
            .await
        {
            self.inner.drop_waiter(id);
            return Err(e);
        }
        let event = self
            .inner
            .await_waiter(id, rx, "subscriber attached", self.inner.config.timeouts.attach)
            .await?;

        let offer_sdp = event
            .pointer("/jsep/sdp")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::signaling("subscribe", "attached event missing sdp"))?;
        let offer = RTCSessionDescription::offer(offer_sdp.to_owned())
            .map_err(|e| media_err("subscriber offer", e))?;

        let pc = self.inner.build_peer_connection().await?;
        let sink_slot: Arc<RwLock<Option<Arc<AudioSink>>>> = Arc::new(RwLock::new(None));
        {
            let frames = self.inner.audio_frames.clone();
            let uid = user_id.to_owned();
            let slot = Arc::clone(&sink_slot);
            pc.on_track(Box::new(move |track, _receiver, _transceiver| {
                let frames = frames.clone();
                let uid = uid.clone();
                let slot = Arc::clone(&slot);
                Box::pin(async move {
                    if track.kind() != RTPCodecType::Audio {
                        return;
                    }
                    match AudioSink::start(track, Some(uid.clone()), frames) {
                        Ok(sink) => *slot.write() = Some(sink),
                        Err(e) => warn!(user_id = %uid, error = %e, "failed to start audio sink"),
                    }
                })
            }));
        }

        if let Err(e) = self.inner.answer_subscriber_offer(&pc, offer, handle).await {
            // Not yet tracked in `subscribers`; nothing else can
            // release the transport or the sink.
            if let Some(sink) = sink_slot.read().clone() {
                sink.stop();
            }
            if let Err(close_err) = pc.close().await {
                warn!(user_id, error = %close_err, "close after failed negotiation");
            }
            return Err(e);
        }

        self.inner.subscribers.lock().insert(
            user_id.to_owned(),
            SubscriberHandle {
                gateway_handle_id: handle,
                peer_connection: pc,
                sink: sink_slot,
            },
        );
        info!(user_id, feed_id, "subscribed to speaker");
        Ok(feed_id)
    }

    async fn unsubscribe_speaker(&self, user_id: &str) -> Result<()> {
        let Some(subscriber) = self.inner.subscribers.lock().remove(user_id) else {
            return Err(Error::Capability(format!(
                "no media subscription for {user_id}"
            )));
        };
        if let Some(sink) = subscriber.sink.read().clone() {
            sink.stop();
        }
        if let Err(e) = subscriber.peer_connection.close().await {
            warn!(user_id, error = %e, "subscriber close failed");
        }
        let _ = self
            .inner
            .message(
                subscriber.gateway_handle_id,
                json!({ "request": "leave", "room": self.inner.config.room_id }),
                None,
            )
            .await;
        debug!(user_id, "unsubscribed speaker");
        Ok(())
    }

    async fn push_audio(&self, samples: &[i16], sample_rate: u32, channel_count: u8) -> Result<()> {
        let source = self.inner.audio_source.read().clone();
        let Some(source) = source else {
            return Err(Error::Capability(
                "publisher media not configured".to_string(),
            ));
        };
        source.push_pcm(samples, sample_rate, channel_count).await
    }

    async fn destroy_room(&self) -> Result<()> {
        let handle = self.inner.publisher_handle_id()?;
        self.inner
            .message(
                handle,
                json!({ "request": "destroy", "room": self.inner.config.room_id }),
                None,
            )
            .await?;
        info!(room = %self.inner.config.room_id, "gateway room destroyed");
        Ok(())
    }

    async fn leave_room(&self) -> Result<()> {
        let handle = self.inner.publisher_handle_id()?;
        self.inner
            .message(
                handle,
                json!({ "request": "leave", "room": self.inner.config.room_id }),
                None,
            )
            .await?;
        info!(room = %self.inner.config.room_id, "left gateway room");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(task) = self.inner.poll_task.lock().take() {
            task.abort();
        }
        // Pending waiters are abandoned; their callers time out or were
        // interrupted by the room's own stop.
        self.inner.waiters.lock().clear();

        let subscribers: Vec<SubscriberHandle> =
            self.inner.subscribers.lock().drain().map(|(_, s)| s).collect();
        for subscriber in subscribers {
            if let Some(sink) = subscriber.sink.read().clone() {
                sink.stop();
            }
            let _ = subscriber.peer_connection.close().await;
        }
        let publisher_pc = self.inner.publisher_pc.write().take();
        if let Some(pc) = publisher_pc {
            let _ = pc.close().await;
        }
        if let Ok(session) = self.inner.current_session() {
            let _ = self
                .inner
                .transport
                .send(
                    &format!("/{session}"),
                    json!({ "janus": "destroy", "transaction": txid() }),
                )
                .await;
        }
        info!("gateway client stopped");
        Ok(())
    }

    fn ids(&self) -> GatewayIds {
        GatewayIds {
            session_id: self.inner.session_id.load(Ordering::SeqCst),
            handle_id: self.inner.publisher_handle.load(Ordering::SeqCst),
            publisher_id: self.inner.publisher_id.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_publishers_in_prefers_platform_user_id() {
        let event = json!({
            "plugindata": { "data": { "publishers": [
                { "id": 7, "display": "display-name", "periscope_user_id": "u7" },
                { "id": 8, "display": "u8" },
                { "display": "missing-id" },
            ]}}
        });
        let publishers = publishers_in(&event);
        assert_eq!(
            publishers,
            vec![
                PublisherInfo { user_id: "u7".to_string(), feed_id: 7 },
                PublisherInfo { user_id: "u8".to_string(), feed_id: 8 },
            ]
        );
    }

    #[test]
    fn test_gateway_error_detection() {
        let err = JanusInner::check_gateway_error(
            "create room",
            &json!({ "janus": "error", "error": { "code": 426, "reason": "no such room" } }),
        )
        .unwrap_err();
        assert!(err.is_signaling());
        assert!(err.to_string().contains("no such room"));

        let plugin_err = JanusInner::check_gateway_error(
            "join",
            &json!({ "janus": "success", "plugindata": { "data": { "error": "room full" } } }),
        )
        .unwrap_err();
        assert!(plugin_err.is_signaling());

        assert!(JanusInner::check_gateway_error(
            "ok",
            &json!({ "janus": "success", "data": { "id": 1 } })
        )
        .is_ok());
    }
}
