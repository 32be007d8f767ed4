//! Platform REST surface consumed by the audio-room subsystem.
//!
//! [`PlatformApi`] is the seam rooms depend on; [`HttpPlatformApi`] is
//! the production implementation over reqwest. Tests substitute mocks
//! that record call order.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{Error, Result};
use crate::session::{BroadcastSession, GuestMediaSession, TurnServerConfig};

/// Parameters for making a created broadcast publicly live.
#[derive(Debug, Clone)]
pub struct PublishBroadcast {
    pub room_id: String,
    pub access_token: String,
    pub title: String,
    /// Gateway session id of the host's publisher connection
    pub gateway_session_id: u64,
    /// Gateway handle id of the host's publisher connection
    pub gateway_handle_id: u64,
    /// Gateway-assigned publisher (feed) id
    pub gateway_publisher_id: u64,
}

/// Parameters for revoking a speaker's media feed.
#[derive(Debug, Clone)]
pub struct EjectSpeaker {
    pub room_id: String,
    pub session_uuid: String,
    pub feed_id: u64,
    pub gateway_session_id: u64,
    pub gateway_handle_id: u64,
    pub chat_token: String,
}

/// Parameters for the mute/unmute endpoints. An empty `session_uuid`
/// targets the caller itself.
#[derive(Debug, Clone)]
pub struct MuteSpeaker {
    pub room_id: String,
    pub session_uuid: String,
    pub chat_token: String,
}

/// Result of authorizing control-channel access for a broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatAccess {
    /// Token sent in the control channel's auth frame
    pub access_token: String,
    /// Control channel endpoint to connect to
    pub endpoint: String,
}

/// The handful of platform endpoints the audio-room subsystem calls.
#[async_trait]
pub trait PlatformApi: Send + Sync {
    /// Resolve the broadcast region for new rooms.
    async fn region(&self) -> Result<String>;

    /// Create a broadcast and obtain its session material.
    async fn create_broadcast(
        &self,
        region: &str,
        description: &str,
        record: bool,
    ) -> Result<BroadcastSession>;

    /// Make a created broadcast live.
    async fn publish_broadcast(&self, req: &PublishBroadcast) -> Result<()>;

    /// Terminate a broadcast.
    async fn end_broadcast(&self, room_id: &str, access_token: &str) -> Result<()>;

    /// Exchange the broadcast credential for control-channel access.
    async fn access_chat(&self, credential: &str) -> Result<ChatAccess>;

    /// Fetch short-lived ICE credentials.
    async fn turn_servers(&self, cookie: &str) -> Result<TurnServerConfig>;

    /// Grant speaking rights to a pending speaker request.
    async fn approve_speaker(
        &self,
        room_id: &str,
        session_uuid: &str,
        chat_token: &str,
    ) -> Result<()>;

    /// Revoke speaking rights from an active speaker.
    async fn eject_speaker(&self, req: &EjectSpeaker) -> Result<()>;

    /// Mute a speaker (empty `session_uuid` = self).
    async fn mute_speaker(&self, req: &MuteSpeaker) -> Result<()>;

    /// Unmute a speaker (empty `session_uuid` = self).
    async fn unmute_speaker(&self, req: &MuteSpeaker) -> Result<()>;

    /// Register as a passive viewer of a room.
    async fn register_viewer(&self, room_id: &str, chat_token: &str) -> Result<()>;

    /// Drop a previous viewer registration.
    async fn stop_watching(&self, lifecycle_token: &str) -> Result<()>;

    /// Submit a speak request; returns the platform session UUID
    /// correlating the request with its eventual approval.
    async fn request_speaker(&self, room_id: &str, chat_token: &str) -> Result<String>;

    /// Withdraw a pending speak request.
    async fn cancel_speaker_request(
        &self,
        room_id: &str,
        session_uuid: &str,
        chat_token: &str,
    ) -> Result<()>;

    /// Negotiate the guest's own media stream after approval.
    async fn negotiate_guest_stream(
        &self,
        room_id: &str,
        session_uuid: &str,
        chat_token: &str,
        cookie: &str,
    ) -> Result<GuestMediaSession>;
}

/// reqwest-backed [`PlatformApi`] implementation.
///
/// The caller supplies the HTTP client so its cookie store and headers
/// are shared with the rest of the application.
pub struct HttpPlatformApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPlatformApi {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { client, base_url }
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value> {
        let url = format!("{}/{}", self.base_url, path);
        debug!(%url, "platform call");
        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::signaling(path, format!("status {status}: {detail}")));
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl PlatformApi for HttpPlatformApi {
    async fn region(&self) -> Result<String> {
        let value = self.post("region", json!({})).await?;
        value
            .get("region")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| Error::signaling("region", "missing field region"))
    }

    async fn create_broadcast(
        &self,
        region: &str,
        description: &str,
        record: bool,
    ) -> Result<BroadcastSession> {
        let value = self
            .post(
                "createBroadcast",
                json!({
                    "app_component": "audio-room",
                    "content_type": "visual_audio",
                    "conversation_controls": 0,
                    "description": description,
                    "height": 1080,
                    "width": 1920,
                    "is_360": false,
                    "is_space_available_for_replay": record,
                    "is_webrtc": true,
                    "languages": [],
                    "region": region,
                    "ticket_group_id": "",
                    "tickets_total": 0,
                }),
            )
            .await?;
        BroadcastSession::from_response(&value)
    }

    async fn publish_broadcast(&self, req: &PublishBroadcast) -> Result<()> {
        self.post(
            "publishBroadcast",
            json!({
                "accept_guests": true,
                "broadcast_id": req.room_id,
                "webrtc_handle_id": req.gateway_handle_id,
                "webrtc_session_id": req.gateway_session_id,
                "janus_publisher_id": req.gateway_publisher_id,
                "janus_room_id": req.room_id,
                "cookie": req.access_token,
                "status": req.title,
                "conversation_controls": 0,
            }),
        )
        .await?;
        Ok(())
    }

    async fn end_broadcast(&self, room_id: &str, access_token: &str) -> Result<()> {
        self.post(
            "endBroadcast",
            json!({ "broadcast_id": room_id, "cookie": access_token }),
        )
        .await?;
        Ok(())
    }

    async fn access_chat(&self, credential: &str) -> Result<ChatAccess> {
        let value = self
            .post("accessChat", json!({ "chat_token": credential }))
            .await?;
        let access_token = value
            .get("access_token")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::signaling("accessChat", "missing field access_token"))?;
        let endpoint = value
            .get("endpoint")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::signaling("accessChat", "missing field endpoint"))?;
        Ok(ChatAccess {
            access_token: access_token.to_owned(),
            endpoint: endpoint.to_owned(),
        })
    }

    async fn turn_servers(&self, cookie: &str) -> Result<TurnServerConfig> {
        let value = self.post("turnServers", json!({ "cookie": cookie })).await?;
        TurnServerConfig::from_response(&value)
    }

    async fn approve_speaker(
        &self,
        room_id: &str,
        session_uuid: &str,
        chat_token: &str,
    ) -> Result<()> {
        self.post(
            "audiospace/admit",
            json!({
                "broadcast_id": room_id,
                "session_uuid": session_uuid,
                "chat_token": chat_token,
            }),
        )
        .await?;
        Ok(())
    }

    async fn eject_speaker(&self, req: &EjectSpeaker) -> Result<()> {
        self.post(
            "audiospace/eject",
            json!({
                "broadcast_id": req.room_id,
                "session_uuid": req.session_uuid,
                "janus_room_id": req.room_id,
                "janus_participant_id": req.feed_id,
                "janus_handle_id": req.gateway_handle_id,
                "janus_session_id": req.gateway_session_id,
                "chat_token": req.chat_token,
            }),
        )
        .await?;
        Ok(())
    }

    async fn mute_speaker(&self, req: &MuteSpeaker) -> Result<()> {
        self.post(
            "audiospace/muteSpeaker",
            json!({
                "broadcast_id": req.room_id,
                "session_uuid": req.session_uuid,
                "chat_token": req.chat_token,
            }),
        )
        .await?;
        Ok(())
    }

    async fn unmute_speaker(&self, req: &MuteSpeaker) -> Result<()> {
        self.post(
            "audiospace/unmuteSpeaker",
            json!({
                "broadcast_id": req.room_id,
                "session_uuid": req.session_uuid,
                "chat_token": req.chat_token,
            }),
        )
        .await?;
        Ok(())
    }

    async fn register_viewer(&self, room_id: &str, chat_token: &str) -> Result<()> {
        self.post(
            "startWatching",
            json!({ "broadcast_id": room_id, "chat_token": chat_token }),
        )
        .await?;
        Ok(())
    }

    async fn stop_watching(&self, lifecycle_token: &str) -> Result<()> {
        self.post("stopWatching", json!({ "life_cycle_token": lifecycle_token }))
            .await?;
        Ok(())
    }

    async fn request_speaker(&self, room_id: &str, chat_token: &str) -> Result<String> {
        let value = self
            .post(
                "audiospace/request/submit",
                json!({ "broadcast_id": room_id, "chat_token": chat_token }),
            )
            .await?;
        value
            .get("session_uuid")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| {
                Error::signaling("audiospace/request/submit", "missing field session_uuid")
            })
    }

    async fn cancel_speaker_request(
        &self,
        room_id: &str,
        session_uuid: &str,
        chat_token: &str,
    ) -> Result<()> {
        self.post(
            "audiospace/request/cancel",
            json!({
                "broadcast_id": room_id,
                "session_uuid": session_uuid,
                "chat_token": chat_token,
            }),
        )
        .await?;
        Ok(())
    }

    async fn negotiate_guest_stream(
        &self,
        room_id: &str,
        session_uuid: &str,
        chat_token: &str,
        cookie: &str,
    ) -> Result<GuestMediaSession> {
        let value = self
            .post(
                "audiospace/stream/negotiate",
                json!({
                    "broadcast_id": room_id,
                    "session_uuid": session_uuid,
                    "chat_token": chat_token,
                    "cookie": cookie,
                }),
            )
            .await?;
        let field = |name: &str| {
            value
                .get(name)
                .and_then(Value::as_str)
                .map(str::to_owned)
                .ok_or_else(|| {
                    Error::signaling(
                        "audiospace/stream/negotiate",
                        format!("missing field {name}"),
                    )
                })
        };
        Ok(GuestMediaSession {
            gateway_url: field("webrtc_gw_url")?,
            credential: field("credential")?,
            room_id: field("janus_room_id")?,
            stream_name: field("stream_name")?,
        })
    }
}
