//! Shared mocks for the room lifecycle tests.
//!
//! Every mock records its calls into one shared log so tests can
//! assert cross-component ordering, and can be told to fail specific
//! operations to exercise teardown paths.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{broadcast, mpsc};

use airwave_core::api::{ChatAccess, EjectSpeaker, MuteSpeaker, PlatformApi, PublishBroadcast};
use airwave_core::auth::{AuthSession, PlatformDirectory, RoomMetadata, StreamStatus};
use airwave_core::{
    AudioFrame, BroadcastSession, Error, GuestMediaSession, Result, TurnServerConfig,
};
use airwave_rtc::config::{ControlChannelConfig, GatewayConfig};
use airwave_rtc::control::{ChannelFactory, ControlChannel};
use airwave_rtc::plugin::{PluginContext, SpacePlugin};
use airwave_rtc::signaling::{GatewayFactory, GatewayIds, JoinedRoom, MediaGateway, PublisherInfo};
use airwave_rtc::space::SpaceHost;
use airwave_rtc::SpaceEvent;

pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn new_log() -> CallLog {
    init_tracing();
    Arc::new(Mutex::new(Vec::new()))
}

/// Route room logs through the test harness when RUST_LOG asks for
/// them. Safe to call from every test; only the first call installs.
fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn log_entries(log: &CallLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

fn record(log: &CallLog, entry: impl Into<String>) {
    log.lock().unwrap().push(entry.into());
}

pub fn broadcast_session() -> BroadcastSession {
    BroadcastSession::from_response(&json!({
        "room_id": "room-1",
        "credential": "cred-1",
        "stream_name": "stream-1",
        "webrtc_gw_url": "https://gw.test/janus",
        "access_token": "bcast-tok",
        "endpoint": "wss://chat.test/channel",
        "share_url": "https://share.test/room-1",
    }))
    .unwrap()
}

fn turn_config() -> TurnServerConfig {
    TurnServerConfig {
        ttl: 3600,
        username: "turn-user".to_string(),
        password: "turn-pass".to_string(),
        uris: vec!["turn:turn.test:3478".to_string()],
    }
}

/// Scripted platform API. Operations named in `fail` return an error;
/// everything is appended to the shared log.
pub struct MockPlatformApi {
    log: CallLog,
    fail: Mutex<HashSet<String>>,
    /// When set, `approve_speaker` records whether the host already
    /// tracks the speaker at call time.
    pub host_under_test: OnceLock<SpaceHost>,
}

impl MockPlatformApi {
    pub fn new(log: CallLog) -> Arc<Self> {
        Arc::new(Self {
            log,
            fail: Mutex::new(HashSet::new()),
            host_under_test: OnceLock::new(),
        })
    }

    pub fn fail_on(&self, op: &str) {
        self.fail.lock().unwrap().insert(op.to_string());
    }

    fn check(&self, op: &str) -> Result<()> {
        if self.fail.lock().unwrap().contains(op) {
            return Err(Error::signaling(op, "scripted failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl PlatformApi for MockPlatformApi {
    async fn region(&self) -> Result<String> {
        record(&self.log, "api.region");
        self.check("region")?;
        Ok("us-east".to_string())
    }

    async fn create_broadcast(
        &self,
        region: &str,
        _description: &str,
        _record: bool,
    ) -> Result<BroadcastSession> {
        record(&self.log, format!("api.create_broadcast({region})"));
        self.check("create_broadcast")?;
        Ok(broadcast_session())
    }

    async fn publish_broadcast(&self, req: &PublishBroadcast) -> Result<()> {
        record(
            &self.log,
            format!("api.publish_broadcast(publisher={})", req.gateway_publisher_id),
        );
        self.check("publish_broadcast")
    }

    async fn end_broadcast(&self, room_id: &str, _access_token: &str) -> Result<()> {
        record(&self.log, format!("api.end_broadcast({room_id})"));
        self.check("end_broadcast")
    }

    async fn access_chat(&self, _credential: &str) -> Result<ChatAccess> {
        record(&self.log, "api.access_chat");
        self.check("access_chat")?;
        Ok(ChatAccess {
            access_token: "chat-tok".to_string(),
            endpoint: "wss://chat.test/channel".to_string(),
        })
    }

    async fn turn_servers(&self, _cookie: &str) -> Result<TurnServerConfig> {
        record(&self.log, "api.turn_servers");
        self.check("turn_servers")?;
        Ok(turn_config())
    }

    async fn approve_speaker(
        &self,
        _room_id: &str,
        session_uuid: &str,
        _chat_token: &str,
    ) -> Result<()> {
        let tracked = self
            .host_under_test
            .get()
            .map(|host| host.speakers().iter().any(|s| s.session_uuid == session_uuid))
            .unwrap_or(false);
        record(&self.log, format!("api.approve_speaker(tracked={tracked})"));
        self.check("approve_speaker")
    }

    async fn eject_speaker(&self, req: &EjectSpeaker) -> Result<()> {
        record(
            &self.log,
            format!("api.eject_speaker({}, feed={})", req.session_uuid, req.feed_id),
        );
        self.check("eject_speaker")
    }

    async fn mute_speaker(&self, req: &MuteSpeaker) -> Result<()> {
        record(&self.log, format!("api.mute_speaker(uuid={})", req.session_uuid));
        self.check("mute_speaker")
    }

    async fn unmute_speaker(&self, req: &MuteSpeaker) -> Result<()> {
        record(&self.log, format!("api.unmute_speaker(uuid={})", req.session_uuid));
        self.check("unmute_speaker")
    }

    async fn register_viewer(&self, room_id: &str, _chat_token: &str) -> Result<()> {
        record(&self.log, format!("api.register_viewer({room_id})"));
        self.check("register_viewer")
    }

    async fn stop_watching(&self, _lifecycle_token: &str) -> Result<()> {
        record(&self.log, "api.stop_watching");
        self.check("stop_watching")
    }

    async fn request_speaker(&self, _room_id: &str, _chat_token: &str) -> Result<String> {
        record(&self.log, "api.request_speaker");
        self.check("request_speaker")?;
        Ok("uuid-1".to_string())
    }

    async fn cancel_speaker_request(
        &self,
        _room_id: &str,
        session_uuid: &str,
        _chat_token: &str,
    ) -> Result<()> {
        record(&self.log, format!("api.cancel_speaker_request({session_uuid})"));
        self.check("cancel_speaker_request")
    }

    async fn negotiate_guest_stream(
        &self,
        room_id: &str,
        _session_uuid: &str,
        _chat_token: &str,
        _cookie: &str,
    ) -> Result<GuestMediaSession> {
        record(&self.log, "api.negotiate_guest_stream");
        self.check("negotiate_guest_stream")?;
        Ok(GuestMediaSession {
            gateway_url: "https://gw.test/janus".to_string(),
            credential: "guest-cred".to_string(),
            room_id: room_id.to_string(),
            stream_name: "guest-stream".to_string(),
        })
    }
}

pub struct MockAuth;

#[async_trait]
impl AuthSession for MockAuth {
    async fn session_cookie(&self) -> Result<String> {
        Ok("cookie-1".to_string())
    }
}

pub struct MockDirectory {
    log: CallLog,
}

impl MockDirectory {
    pub fn new(log: CallLog) -> Arc<Self> {
        Arc::new(Self { log })
    }
}

#[async_trait]
impl PlatformDirectory for MockDirectory {
    async fn room_metadata(&self, room_id: &str) -> Result<RoomMetadata> {
        record(&self.log, format!("directory.room_metadata({room_id})"));
        Ok(RoomMetadata {
            media_key: "media-key-1".to_string(),
        })
    }

    async fn stream_status(&self, media_key: &str) -> Result<StreamStatus> {
        record(&self.log, format!("directory.stream_status({media_key})"));
        Ok(StreamStatus {
            hls_url: "https://hls.test/room-1.m3u8".to_string(),
            chat_token: "chat-tok".to_string(),
            lifecycle_token: "life-tok".to_string(),
            control_endpoint: "wss://chat.test/channel".to_string(),
        })
    }
}

/// Scripted media gateway.
pub struct MockGateway {
    log: CallLog,
    fail: Mutex<HashSet<String>>,
    /// Publishers reported by `join_as_publisher`.
    pub publishers: Mutex<Vec<PublisherInfo>>,
    pub events: Mutex<Option<broadcast::Sender<SpaceEvent>>>,
    next_feed: AtomicUsize,
}

impl MockGateway {
    pub fn new(log: CallLog) -> Arc<Self> {
        Arc::new(Self {
            log,
            fail: Mutex::new(HashSet::new()),
            publishers: Mutex::new(Vec::new()),
            events: Mutex::new(None),
            next_feed: AtomicUsize::new(7),
        })
    }

    pub fn fail_on(&self, op: &str) {
        self.fail.lock().unwrap().insert(op.to_string());
    }

    fn check(&self, op: &str) -> Result<()> {
        if self.fail.lock().unwrap().contains(op) {
            return Err(Error::signaling(op, "scripted failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl MediaGateway for MockGateway {
    async fn create_room(&self) -> Result<()> {
        record(&self.log, "gateway.create_room");
        self.check("create_room")
    }

    async fn join_as_publisher(&self) -> Result<JoinedRoom> {
        record(&self.log, "gateway.join_as_publisher");
        self.check("join_as_publisher")?;
        Ok(JoinedRoom {
            publisher_id: 99,
            publishers: self.publishers.lock().unwrap().clone(),
        })
    }

    async fn configure_publisher(&self) -> Result<()> {
        record(&self.log, "gateway.configure_publisher");
        self.check("configure_publisher")
    }

    async fn subscribe_speaker(&self, user_id: &str, feed_id: u64) -> Result<u64> {
        record(&self.log, format!("gateway.subscribe({user_id})"));
        self.check("subscribe_speaker")?;
        let feed_id = if feed_id != 0 {
            feed_id
        } else {
            self.next_feed.fetch_add(1, Ordering::SeqCst) as u64
        };
        if let Some(events) = self.events.lock().unwrap().as_ref() {
            let _ = events.send(SpaceEvent::SubscribedSpeaker {
                user_id: user_id.to_string(),
                feed_id,
            });
        }
        Ok(feed_id)
    }

    async fn unsubscribe_speaker(&self, user_id: &str) -> Result<()> {
        record(&self.log, format!("gateway.unsubscribe({user_id})"));
        self.check("unsubscribe_speaker")
    }

    async fn push_audio(&self, samples: &[i16], _sample_rate: u32, _channel_count: u8) -> Result<()> {
        record(&self.log, format!("gateway.push_audio({})", samples.len()));
        self.check("push_audio")
    }

    async fn destroy_room(&self) -> Result<()> {
        record(&self.log, "gateway.destroy_room");
        self.check("destroy_room")
    }

    async fn leave_room(&self) -> Result<()> {
        record(&self.log, "gateway.leave_room");
        self.check("leave_room")
    }

    async fn stop(&self) -> Result<()> {
        record(&self.log, "gateway.stop");
        self.check("stop")
    }

    fn ids(&self) -> GatewayIds {
        GatewayIds {
            session_id: 1,
            handle_id: 2,
            publisher_id: 99,
        }
    }
}

/// Hands out one prebuilt [`MockGateway`] and wires it to the room's
/// event stream.
pub struct MockGatewayFactory {
    log: CallLog,
    pub gateway: Arc<MockGateway>,
    fail: Mutex<bool>,
}

impl MockGatewayFactory {
    pub fn new(log: CallLog, gateway: Arc<MockGateway>) -> Arc<Self> {
        Arc::new(Self {
            log,
            gateway,
            fail: Mutex::new(false),
        })
    }

    pub fn fail_connect(&self) {
        *self.fail.lock().unwrap() = true;
    }
}

#[async_trait]
impl GatewayFactory for MockGatewayFactory {
    async fn connect(
        &self,
        config: GatewayConfig,
        events: broadcast::Sender<SpaceEvent>,
        _audio_frames: mpsc::Sender<AudioFrame>,
    ) -> Result<Arc<dyn MediaGateway>> {
        record(&self.log, format!("gateway.connect({})", config.room_id));
        if *self.fail.lock().unwrap() {
            return Err(Error::signaling("gateway connect", "scripted failure"));
        }
        *self.gateway.events.lock().unwrap() = Some(events);
        Ok(Arc::clone(&self.gateway) as Arc<dyn MediaGateway>)
    }
}

pub struct MockChannel {
    log: CallLog,
}

#[async_trait]
impl ControlChannel for MockChannel {
    async fn react(&self, emoji: &str) -> Result<()> {
        record(&self.log, format!("channel.react({emoji})"));
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        record(&self.log, "channel.disconnect");
        Ok(())
    }
}

pub struct MockChannelFactory {
    log: CallLog,
}

impl MockChannelFactory {
    pub fn new(log: CallLog) -> Arc<Self> {
        Arc::new(Self { log })
    }
}

#[async_trait]
impl ChannelFactory for MockChannelFactory {
    async fn connect(
        &self,
        config: ControlChannelConfig,
        _events: broadcast::Sender<SpaceEvent>,
    ) -> Result<Arc<dyn ControlChannel>> {
        record(&self.log, format!("channel.connect({})", config.endpoint));
        Ok(Arc::new(MockChannel {
            log: Arc::clone(&self.log),
        }))
    }
}

/// Counts every lifecycle hook it receives.
#[derive(Default)]
pub struct CountingPlugin {
    pub attaches: AtomicUsize,
    pub inits: AtomicUsize,
    pub gateway_readies: AtomicUsize,
    pub frames: AtomicUsize,
    pub cleanups: AtomicUsize,
}

#[async_trait]
impl SpacePlugin for CountingPlugin {
    fn name(&self) -> &str {
        "counting"
    }

    async fn on_attach(&self, _context: &PluginContext) -> Result<()> {
        self.attaches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn init(&self, _context: &PluginContext) -> Result<()> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn on_gateway_ready(&self, _gateway: &Arc<dyn MediaGateway>) -> Result<()> {
        self.gateway_readies.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn on_audio_data(&self, _frame: &AudioFrame) -> Result<()> {
        self.frames.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn cleanup(&self) -> Result<()> {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A plugin whose cleanup always fails, for isolation tests.
pub struct FailingCleanupPlugin;

#[async_trait]
impl SpacePlugin for FailingCleanupPlugin {
    fn name(&self) -> &str {
        "failing-cleanup"
    }

    async fn cleanup(&self) -> Result<()> {
        Err(Error::Other("cleanup always fails".to_string()))
    }
}
