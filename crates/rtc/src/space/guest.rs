//! Participant side of a room: listening, requesting to speak, and
//! publishing once admitted.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use airwave_core::api::{MuteSpeaker, PlatformApi};
use airwave_core::auth::{AuthSession, PlatformDirectory, StreamStatus};
use airwave_core::{AudioFrame, Error, Result};

use crate::config::{ControlChannelConfig, GatewayConfig, GuestConfig};
use crate::control::{ChannelFactory, ControlChannel};
use crate::events::SpaceEvent;
use crate::plugin::{PluginRegistry, SpacePlugin};
use crate::signaling::{GatewayFactory, MediaGateway};
use crate::space::ParticipantState;

const EVENT_CHANNEL_CAPACITY: usize = 256;
const AUDIO_CHANNEL_CAPACITY: usize = 64;

/// External collaborators a participant is built from.
#[derive(Clone)]
pub struct SpaceParticipantDeps {
    pub api: Arc<dyn PlatformApi>,
    pub auth: Arc<dyn AuthSession>,
    pub directory: Arc<dyn PlatformDirectory>,
    pub gateway_factory: Arc<dyn GatewayFactory>,
    pub channel_factory: Arc<dyn ChannelFactory>,
}

/// Joins an existing audio room. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SpaceParticipant {
    inner: Arc<GuestInner>,
}

struct GuestInner {
    config: GuestConfig,
    deps: SpaceParticipantDeps,
    state: RwLock<ParticipantState>,
    events: broadcast::Sender<SpaceEvent>,
    plugins: Arc<PluginRegistry>,
    stream: RwLock<Option<StreamStatus>>,
    session_uuid: RwLock<Option<String>>,
    gateway: RwLock<Option<Arc<dyn MediaGateway>>>,
    channel: RwLock<Option<Arc<dyn ControlChannel>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SpaceParticipant {
    pub fn new(config: GuestConfig, deps: SpaceParticipantDeps) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(GuestInner {
                config,
                deps,
                state: RwLock::new(ParticipantState::Idle),
                events: events.clone(),
                plugins: Arc::new(PluginRegistry::new(events)),
                stream: RwLock::new(None),
                session_uuid: RwLock::new(None),
                gateway: RwLock::new(None),
                channel: RwLock::new(None),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn state(&self) -> ParticipantState {
        *self.inner.state.read()
    }

    pub fn events(&self) -> broadcast::Receiver<SpaceEvent> {
        self.inner.events.subscribe()
    }

    /// The pending speak-request session, if one exists.
    pub fn session_uuid(&self) -> Option<String> {
        self.inner.session_uuid.read().clone()
    }

    pub async fn use_plugin(&self, plugin: Arc<dyn SpacePlugin>, config: Value) -> Result<()> {
        self.inner.plugins.register(plugin, config).await
    }

    fn require_state(&self, wanted: ParticipantState, operation: &str) -> Result<()> {
        let state = *self.inner.state.read();
        if state != wanted {
            return Err(Error::Capability(format!(
                "{operation} requires state {wanted:?}, state is {state:?}"
            )));
        }
        Ok(())
    }

    fn stream(&self) -> Result<StreamStatus> {
        self.inner
            .stream
            .read()
            .clone()
            .ok_or_else(|| Error::Capability("room not joined".to_string()))
    }

    fn gateway(&self) -> Result<Arc<dyn MediaGateway>> {
        self.inner
            .gateway
            .read()
            .clone()
            .ok_or_else(|| Error::Capability("guest media not negotiated".to_string()))
    }

    /// Resolve the room, register as a viewer, and open the control
    /// channel. The participant hears room events but publishes nothing.
    pub async fn join_as_listener(&self) -> Result<()> {
        self.require_state(ParticipantState::Idle, "join")?;
        let inner = &self.inner;
        let metadata = inner
            .deps
            .directory
            .room_metadata(&inner.config.room_id)
            .await?;
        let status = inner.deps.directory.stream_status(&metadata.media_key).await?;
        inner
            .deps
            .api
            .register_viewer(&inner.config.room_id, &status.chat_token)
            .await?;
        let channel = inner
            .deps
            .channel_factory
            .connect(
                ControlChannelConfig {
                    endpoint: status.control_endpoint.clone(),
                    access_token: status.chat_token.clone(),
                    room_id: inner.config.room_id.clone(),
                },
                inner.events.clone(),
            )
            .await?;
        *inner.channel.write() = Some(channel);
        *inner.stream.write() = Some(status);
        *inner.state.write() = ParticipantState::Listening;
        inner.plugins.mark_initialized(&inner.config.room_id).await?;
        info!(room = %inner.config.room_id, "joined as listener");
        Ok(())
    }

    /// Ask the host for speaking rights. Returns the session UUID that
    /// correlates the eventual approval.
    pub async fn request_speaker(&self) -> Result<String> {
        self.require_state(ParticipantState::Listening, "request speaker")?;
        let stream = self.stream()?;
        let uuid = self
            .inner
            .deps
            .api
            .request_speaker(&self.inner.config.room_id, &stream.chat_token)
            .await?;
        *self.inner.session_uuid.write() = Some(uuid.clone());
        *self.inner.state.write() = ParticipantState::SpeakerRequested;
        info!(session_uuid = %uuid, "speaker request submitted");
        Ok(uuid)
    }

    /// Withdraw a pending speak request and return to listening.
    pub async fn cancel_speaker_request(&self) -> Result<()> {
        self.require_state(ParticipantState::SpeakerRequested, "cancel request")?;
        let stream = self.stream()?;
        let uuid = self
            .session_uuid()
            .ok_or_else(|| Error::Capability("no pending speaker request".to_string()))?;
        self.inner
            .deps
            .api
            .cancel_speaker_request(&self.inner.config.room_id, &uuid, &stream.chat_token)
            .await?;
        *self.inner.session_uuid.write() = None;
        *self.inner.state.write() = ParticipantState::Listening;
        Ok(())
    }

    /// After host approval: negotiate a media stream, publish into the
    /// room, and subscribe to every speaker already present.
    pub async fn become_speaker(&self) -> Result<()> {
        self.require_state(ParticipantState::SpeakerRequested, "become speaker")?;
        let inner = &self.inner;
        let stream = self.stream()?;
        let uuid = self
            .session_uuid()
            .ok_or_else(|| Error::Capability("no pending speaker request".to_string()))?;

        let cookie = inner.deps.auth.session_cookie().await?;
        let turn = inner.deps.api.turn_servers(&cookie).await?;
        let negotiated = inner
            .deps
            .api
            .negotiate_guest_stream(&inner.config.room_id, &uuid, &stream.chat_token, &cookie)
            .await?;

        let (audio_tx, audio_rx) = mpsc::channel::<AudioFrame>(AUDIO_CHANNEL_CAPACITY);
        // The room already exists on the gateway; the guest only joins
        // and publishes.
        let gateway = inner
            .deps
            .gateway_factory
            .connect(
                GatewayConfig::for_guest(&negotiated, &inner.config.user_id, turn),
                inner.events.clone(),
                audio_tx,
            )
            .await?;
        *inner.gateway.write() = Some(Arc::clone(&gateway));

        let joined = gateway.join_as_publisher().await?;
        gateway.configure_publisher().await?;

        // Hear everyone already on stage. One bad feed does not block
        // the rest.
        for publisher in &joined.publishers {
            if publisher.user_id == inner.config.user_id {
                continue;
            }
            if let Err(e) = gateway
                .subscribe_speaker(&publisher.user_id, publisher.feed_id)
                .await
            {
                warn!(user_id = %publisher.user_id, error = %e, "subscribe to existing speaker failed");
            }
        }

        self.spawn_audio_pump(audio_rx);
        self.spawn_event_task();

        *inner.state.write() = ParticipantState::Speaking;
        inner.plugins.gateway_ready(gateway).await?;
        info!(room = %inner.config.room_id, "speaking");
        Ok(())
    }

    fn spawn_audio_pump(&self, mut audio_rx: mpsc::Receiver<AudioFrame>) {
        let plugins = Arc::clone(&self.inner.plugins);
        let task = tokio::spawn(async move {
            while let Some(frame) = audio_rx.recv().await {
                plugins.dispatch_audio(&frame).await;
            }
        });
        self.inner.tasks.lock().push(task);
    }

    /// While speaking, newly accepted speakers are subscribed to
    /// automatically so the stage stays audible.
    fn spawn_event_task(&self) {
        let inner = Arc::clone(&self.inner);
        let mut events = inner.events.subscribe();
        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(SpaceEvent::NewSpeakerAccepted { user_id, .. }) => {
                        if user_id == inner.config.user_id {
                            continue;
                        }
                        if *inner.state.read() != ParticipantState::Speaking {
                            continue;
                        }
                        let gateway = inner.gateway.read().clone();
                        if let Some(gateway) = gateway {
                            if let Err(e) = gateway.subscribe_speaker(&user_id, 0).await {
                                warn!(user_id = %user_id, error = %e, "subscribe to new speaker failed");
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "participant event task lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        self.inner.tasks.lock().push(task);
    }

    /// Mute this participant's own feed. Requires speaking.
    pub async fn mute_self(&self) -> Result<()> {
        self.set_muted(true).await
    }

    pub async fn unmute_self(&self) -> Result<()> {
        self.set_muted(false).await
    }

    async fn set_muted(&self, muted: bool) -> Result<()> {
        self.require_state(ParticipantState::Speaking, "mute")?;
        let stream = self.stream()?;
        let uuid = self
            .session_uuid()
            .ok_or_else(|| Error::Capability("no speaker session".to_string()))?;
        let req = MuteSpeaker {
            room_id: self.inner.config.room_id.clone(),
            session_uuid: uuid,
            chat_token: stream.chat_token.clone(),
        };
        if muted {
            self.inner.deps.api.mute_speaker(&req).await
        } else {
            self.inner.deps.api.unmute_speaker(&req).await
        }
    }

    /// Send an emoji reaction into the room.
    pub async fn react(&self, emoji: &str) -> Result<()> {
        let channel = self
            .inner
            .channel
            .read()
            .clone()
            .ok_or_else(|| Error::Capability("room not joined".to_string()))?;
        channel.react(emoji).await
    }

    /// Push microphone PCM into the room. Requires speaking.
    pub async fn push_audio(
        &self,
        samples: &[i16],
        sample_rate: u32,
        channel_count: u8,
    ) -> Result<()> {
        self.require_state(ParticipantState::Speaking, "push audio")?;
        self.gateway()?
            .push_audio(samples, sample_rate, channel_count)
            .await
    }

    /// Leave the room. Idempotent; every teardown step runs even when
    /// an earlier one fails.
    pub async fn leave(&self) -> Result<()> {
        {
            let mut state = self.inner.state.write();
            if *state == ParticipantState::Left {
                return Ok(());
            }
            *state = ParticipantState::Left;
        }
        info!(room = %self.inner.config.room_id, "leaving room");

        let gateway = self.inner.gateway.write().take();
        if let Some(gateway) = gateway {
            if let Err(e) = gateway.leave_room().await {
                warn!(error = %e, "leave room failed");
            }
            if let Err(e) = gateway.stop().await {
                warn!(error = %e, "gateway stop failed");
            }
        }
        let stream = self.inner.stream.read().clone();
        if let Some(stream) = stream {
            if let Err(e) = self
                .inner
                .deps
                .api
                .stop_watching(&stream.lifecycle_token)
                .await
            {
                warn!(error = %e, "stop watching failed");
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
        Ok(())
    }
}
