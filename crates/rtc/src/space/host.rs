//! Host side of a room: broadcast creation, publishing, and speaker
//! moderation.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use airwave_core::api::{ChatAccess, EjectSpeaker, MuteSpeaker, PlatformApi, PublishBroadcast};
use airwave_core::auth::AuthSession;
use airwave_core::{AudioFrame, BroadcastSession, Error, Result, SpeakerSession};

use crate::config::{ControlChannelConfig, GatewayConfig, HostConfig};
use crate::control::{ChannelFactory, ControlChannel};
use crate::events::SpaceEvent;
use crate::plugin::{PluginRegistry, SpacePlugin};
use crate::signaling::{GatewayFactory, MediaGateway};
use crate::space::HostState;

const EVENT_CHANNEL_CAPACITY: usize = 256;
const AUDIO_CHANNEL_CAPACITY: usize = 64;

/// External collaborators a host is built from. Production wiring uses
/// [`HttpPlatformApi`], [`JanusGatewayFactory`] and
/// [`WebSocketChannelFactory`]; tests substitute mocks.
///
/// [`HttpPlatformApi`]: airwave_core::api::HttpPlatformApi
/// [`JanusGatewayFactory`]: crate::signaling::JanusGatewayFactory
/// [`WebSocketChannelFactory`]: crate::control::WebSocketChannelFactory
#[derive(Clone)]
pub struct SpaceHostDeps {
    pub api: Arc<dyn PlatformApi>,
    pub auth: Arc<dyn AuthSession>,
    pub gateway_factory: Arc<dyn GatewayFactory>,
    pub channel_factory: Arc<dyn ChannelFactory>,
}

/// Hosts one audio room. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct SpaceHost {
    inner: Arc<HostInner>,
}

struct HostInner {
    config: HostConfig,
    deps: SpaceHostDeps,
    state: RwLock<HostState>,
    events: broadcast::Sender<SpaceEvent>,
    plugins: Arc<PluginRegistry>,
    session: RwLock<Option<BroadcastSession>>,
    chat: RwLock<Option<ChatAccess>>,
    gateway: RwLock<Option<Arc<dyn MediaGateway>>>,
    channel: RwLock<Option<Arc<dyn ControlChannel>>>,
    speakers: RwLock<HashMap<String, SpeakerSession>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SpaceHost {
    pub fn new(config: HostConfig, deps: SpaceHostDeps) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(HostInner {
                config,
                deps,
                state: RwLock::new(HostState::Uninitialized),
                events: events.clone(),
                plugins: Arc::new(PluginRegistry::new(events)),
                session: RwLock::new(None),
                chat: RwLock::new(None),
                gateway: RwLock::new(None),
                channel: RwLock::new(None),
                speakers: RwLock::new(HashMap::new()),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn state(&self) -> HostState {
        *self.inner.state.read()
    }

    /// Subscribe to the room's event stream.
    pub fn events(&self) -> broadcast::Receiver<SpaceEvent> {
        self.inner.events.subscribe()
    }

    /// The broadcast session, present once initialized.
    pub fn session(&self) -> Option<BroadcastSession> {
        self.inner.session.read().clone()
    }

    pub fn speaker(&self, user_id: &str) -> Option<SpeakerSession> {
        self.inner.speakers.read().get(user_id).cloned()
    }

    pub fn speakers(&self) -> Vec<SpeakerSession> {
        self.inner.speakers.read().values().cloned().collect()
    }

    /// Register a plugin. Before initialization only `on_attach` runs;
    /// afterwards the missed lifecycle hooks are replayed immediately.
    pub async fn use_plugin(&self, plugin: Arc<dyn SpacePlugin>, config: Value) -> Result<()> {
        self.inner.plugins.register(plugin, config).await
    }

    /// Create the broadcast, bring up media, publish, and go live.
    ///
    /// On any failure the partially built room is torn down and the
    /// host lands in `Stopped`; it is not retryable.
    pub async fn initialize(&self) -> Result<BroadcastSession> {
        {
            let mut state = self.inner.state.write();
            if *state != HostState::Uninitialized {
                return Err(Error::Capability(format!(
                    "initialize called in state {:?}",
                    *state
                )));
            }
            *state = HostState::Initializing;
        }
        match self.initialize_inner().await {
            Ok(session) => Ok(session),
            Err(e) => {
                warn!(error = %e, "room initialization failed; tearing down");
                self.abort_initialize().await;
                Err(e)
            }
        }
    }

    async fn initialize_inner(&self) -> Result<BroadcastSession> {
        let inner = &self.inner;
        let cookie = inner.deps.auth.session_cookie().await?;
        let region = match &inner.config.region {
            Some(region) => region.clone(),
            None => inner.deps.api.region().await?,
        };
        info!(%region, "creating broadcast");
        let session = inner
            .deps
            .api
            .create_broadcast(&region, &inner.config.description, inner.config.record)
            .await?;
        let chat = inner.deps.api.access_chat(&session.credential).await?;
        let turn = inner.deps.api.turn_servers(&cookie).await?;

        *inner.session.write() = Some(session.clone());
        *inner.chat.write() = Some(chat.clone());

        let (audio_tx, audio_rx) = mpsc::channel::<AudioFrame>(AUDIO_CHANNEL_CAPACITY);
        let gateway = inner
            .deps
            .gateway_factory
            .connect(
                GatewayConfig::for_host(&session, &inner.config.user_id, turn),
                inner.events.clone(),
                audio_tx,
            )
            .await?;
        *inner.gateway.write() = Some(Arc::clone(&gateway));

        gateway.create_room().await?;
        let joined = gateway.join_as_publisher().await?;
        gateway.configure_publisher().await?;

        let ids = gateway.ids();
        inner
            .deps
            .api
            .publish_broadcast(&PublishBroadcast {
                room_id: session.room_id.clone(),
                access_token: session.access_token.clone(),
                title: inner.config.title.clone(),
                gateway_session_id: ids.session_id,
                gateway_handle_id: ids.handle_id,
                gateway_publisher_id: joined.publisher_id,
            })
            .await?;

        if inner.config.interactive {
            let channel = inner
                .deps
                .channel_factory
                .connect(
                    ControlChannelConfig {
                        endpoint: session.control_endpoint.clone(),
                        access_token: chat.access_token.clone(),
                        room_id: session.room_id.clone(),
                    },
                    inner.events.clone(),
                )
                .await?;
            *inner.channel.write() = Some(channel);
        }

        self.spawn_audio_pump(audio_rx);
        self.spawn_event_task();

        *inner.state.write() = HostState::Live;
        inner.plugins.mark_initialized(&session.room_id).await?;
        inner.plugins.gateway_ready(gateway).await?;
        info!(room = %session.room_id, share_url = %session.share_url, "room is live");
        Ok(session)
    }

    async fn abort_initialize(&self) {
        let gateway = self.inner.gateway.write().take();
        if let Some(gateway) = gateway {
            if let Err(e) = gateway.stop().await {
                warn!(error = %e, "gateway teardown failed");
            }
        }
        let channel = self.inner.channel.write().take();
        if let Some(channel) = channel {
            if let Err(e) = channel.disconnect().await {
                warn!(error = %e, "channel teardown failed");
            }
        }
        *self.inner.state.write() = HostState::Stopped;
    }

    /// Inbound frames fan out to plugins, in order and sequentially.
    fn spawn_audio_pump(&self, mut audio_rx: mpsc::Receiver<AudioFrame>) {
        let plugins = Arc::clone(&self.inner.plugins);
        let task = tokio::spawn(async move {
            while let Some(frame) = audio_rx.recv().await {
                plugins.dispatch_audio(&frame).await;
            }
        });
        self.inner.tasks.lock().push(task);
    }

    /// Bookkeeping driven by the room's own event stream.
    fn spawn_event_task(&self) {
        let inner = Arc::clone(&self.inner);
        let mut events = inner.events.subscribe();
        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(SpaceEvent::SubscribedSpeaker { user_id, feed_id }) => {
                        if let Some(speaker) = inner.speakers.write().get_mut(&user_id) {
                            speaker.media_feed_id = Some(feed_id);
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "host event task lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        self.inner.tasks.lock().push(task);
    }

    fn require_live(&self) -> Result<()> {
        let state = *self.inner.state.read();
        if state != HostState::Live {
            return Err(Error::Capability(format!(
                "operation requires a live room, state is {state:?}"
            )));
        }
        Ok(())
    }

    fn chat_token(&self) -> Result<String> {
        self.inner
            .chat
            .read()
            .as_ref()
            .map(|chat| chat.access_token.clone())
            .ok_or_else(|| Error::Capability("room has no chat access".to_string()))
    }

    fn room_id(&self) -> Result<String> {
        self.inner
            .session
            .read()
            .as_ref()
            .map(|session| session.room_id.clone())
            .ok_or_else(|| Error::Capability("room not initialized".to_string()))
    }

    fn gateway(&self) -> Result<Arc<dyn MediaGateway>> {
        self.inner
            .gateway
            .read()
            .clone()
            .ok_or_else(|| Error::Capability("gateway not connected".to_string()))
    }

    /// Approve a pending speaker request and subscribe to the new
    /// speaker's feed. The speaker is tracked before any network call so
    /// the feed id from the subscription always finds its record.
    pub async fn approve_speaker(&self, user_id: &str, session_uuid: &str) -> Result<()> {
        self.require_live()?;
        let room_id = self.room_id()?;
        let chat_token = self.chat_token()?;
        self.inner
            .speakers
            .write()
            .insert(user_id.to_owned(), SpeakerSession::new(user_id, session_uuid));

        self.inner
            .deps
            .api
            .approve_speaker(&room_id, session_uuid, &chat_token)
            .await?;
        let feed_id = self.gateway()?.subscribe_speaker(user_id, 0).await?;
        if let Some(speaker) = self.inner.speakers.write().get_mut(user_id) {
            speaker.media_feed_id = Some(feed_id);
        }
        info!(user_id, feed_id, "speaker approved");
        Ok(())
    }

    /// Remove an active speaker. Validates local bookkeeping before any
    /// network call; the media unsubscribe afterwards is best-effort.
    pub async fn remove_speaker(&self, user_id: &str) -> Result<()> {
        self.require_live()?;
        let room_id = self.room_id()?;
        let chat_token = self.chat_token()?;
        let speaker = self
            .speaker(user_id)
            .ok_or_else(|| Error::Capability(format!("{user_id} is not a tracked speaker")))?;
        let feed_id = speaker.media_feed_id.ok_or_else(|| {
            Error::Capability(format!("{user_id} has no media feed to remove"))
        })?;
        if speaker.session_uuid.is_empty() {
            return Err(Error::Capability(format!(
                "{user_id} has no session uuid; cannot eject"
            )));
        }

        let ids = self.gateway()?.ids();
        self.inner
            .deps
            .api
            .eject_speaker(&EjectSpeaker {
                room_id,
                session_uuid: speaker.session_uuid.clone(),
                feed_id,
                gateway_session_id: ids.session_id,
                gateway_handle_id: ids.handle_id,
                chat_token,
            })
            .await?;
        self.inner.speakers.write().remove(user_id);
        if let Err(e) = self.gateway()?.unsubscribe_speaker(user_id).await {
            warn!(user_id, error = %e, "unsubscribe after eject failed");
        }
        info!(user_id, "speaker removed");
        Ok(())
    }

    /// Mute the host's own microphone announcement.
    pub async fn mute_host(&self) -> Result<()> {
        self.set_muted("", true).await
    }

    pub async fn unmute_host(&self) -> Result<()> {
        self.set_muted("", false).await
    }

    /// Mute an active speaker.
    pub async fn mute_speaker(&self, user_id: &str) -> Result<()> {
        let uuid = self.speaker_uuid(user_id)?;
        self.set_muted(&uuid, true).await
    }

    pub async fn unmute_speaker(&self, user_id: &str) -> Result<()> {
        let uuid = self.speaker_uuid(user_id)?;
        self.set_muted(&uuid, false).await
    }

    fn speaker_uuid(&self, user_id: &str) -> Result<String> {
        self.speaker(user_id)
            .map(|s| s.session_uuid)
            .ok_or_else(|| Error::Capability(format!("{user_id} is not a tracked speaker")))
    }

    // An empty uuid targets the caller itself.
    async fn set_muted(&self, session_uuid: &str, muted: bool) -> Result<()> {
        self.require_live()?;
        let req = MuteSpeaker {
            room_id: self.room_id()?,
            session_uuid: session_uuid.to_owned(),
            chat_token: self.chat_token()?,
        };
        if muted {
            self.inner.deps.api.mute_speaker(&req).await
        } else {
            self.inner.deps.api.unmute_speaker(&req).await
        }
    }

    /// Send an emoji reaction. Requires an interactive room.
    pub async fn react(&self, emoji: &str) -> Result<()> {
        self.require_live()?;
        let channel = self
            .inner
            .channel
            .read()
            .clone()
            .ok_or_else(|| Error::Capability("room has no control channel".to_string()))?;
        channel.react(emoji).await
    }

    /// Push host microphone PCM into the outbound track.
    pub async fn push_audio(
        &self,
        samples: &[i16],
        sample_rate: u32,
        channel_count: u8,
    ) -> Result<()> {
        self.require_live()?;
        self.gateway()?
            .push_audio(samples, sample_rate, channel_count)
            .await
    }

    /// End the broadcast and release everything. Idempotent; every
    /// teardown step runs even when an earlier one fails.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut state = self.inner.state.write();
            if matches!(*state, HostState::Stopping | HostState::Stopped) {
                return Ok(());
            }
            *state = HostState::Stopping;
        }
        info!("stopping room");

        let session = self.inner.session.read().clone();
        if let Some(session) = &session {
            if let Err(e) = self
                .inner
                .deps
                .api
                .end_broadcast(&session.room_id, &session.access_token)
                .await
            {
                warn!(error = %e, "end broadcast failed");
            }
        }
        let gateway = self.inner.gateway.write().take();
        if let Some(gateway) = gateway {
            if let Err(e) = gateway.destroy_room().await {
                warn!(error = %e, "destroy room failed");
            }
            if let Err(e) = gateway.leave_room().await {
                warn!(error = %e, "leave room failed");
            }
            if let Err(e) = gateway.stop().await {
                warn!(error = %e, "gateway stop failed");
            }
        }
        let channel = self.inner.channel.write().take();
        if let Some(channel) = channel {
            if let Err(e) = channel.disconnect().await {
                warn!(error = %e, "channel disconnect failed");
            }
        }
        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }
        self.inner.plugins.cleanup().await;
        *self.inner.state.write() = HostState::Stopped;
        info!("room stopped");
        Ok(())
    }
}
