//! Session data model for a live audio room.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Identity of a hosted broadcast, created once during room
/// initialization and immutable for the room's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastSession {
    /// Platform room identifier
    pub room_id: String,
    /// Gateway credential attached to every signaling request
    pub credential: String,
    /// Media stream name used by the publisher configure call
    pub stream_name: String,
    /// Base URL of the WebRTC signaling gateway
    pub gateway_url: String,
    /// Token authorizing broadcast lifecycle calls (publish/end)
    pub access_token: String,
    /// Endpoint of the room's control channel
    pub control_endpoint: String,
    /// Public listen URL
    pub share_url: String,
}

impl BroadcastSession {
    /// Parse the platform's broadcast-creation response.
    ///
    /// Any missing field is a protocol violation and surfaces as
    /// [`Error::Signaling`] naming the field.
    pub fn from_response(value: &Value) -> Result<Self> {
        Ok(Self {
            room_id: required_str(value, "room_id")?,
            credential: required_str(value, "credential")?,
            stream_name: required_str(value, "stream_name")?,
            gateway_url: required_str(value, "webrtc_gw_url")?,
            access_token: required_str(value, "access_token")?,
            control_endpoint: required_str(value, "endpoint")?,
            share_url: required_str(value, "share_url")?,
        })
    }
}

/// One approved or active speaker. Keyed by `user_id`; at most one per
/// user per room. `media_feed_id` stays `None` until the gateway
/// subscription for the speaker completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeakerSession {
    /// Platform user identifier
    pub user_id: String,
    /// Platform session correlating request and approval/removal
    pub session_uuid: String,
    /// Gateway feed id, populated once the subscription resolves it
    pub media_feed_id: Option<u64>,
}

impl SpeakerSession {
    /// New speaker record with no media subscription yet.
    pub fn new(user_id: impl Into<String>, session_uuid: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            session_uuid: session_uuid.into(),
            media_feed_id: None,
        }
    }
}

/// Short-lived ICE credentials, fetched once per room and reused for
/// every peer connection opened within it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// Credential lifetime in seconds as reported by the platform
    pub ttl: u64,
    pub username: String,
    pub password: String,
    /// TURN/STUN URIs
    pub uris: Vec<String>,
}

impl TurnServerConfig {
    /// Parse the platform's TURN-credential response.
    pub fn from_response(value: &Value) -> Result<Self> {
        let uris = value
            .get("uris")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::signaling("turnServers", "missing field uris"))?
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_owned)
            .collect();
        Ok(Self {
            ttl: value.get("ttl").and_then(Value::as_u64).unwrap_or(0),
            username: required_str(value, "username")?,
            password: required_str(value, "password")?,
            uris,
        })
    }
}

/// Result of a guest stream negotiation: where and how the guest
/// publishes its own media.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestMediaSession {
    /// Base URL of the signaling gateway to publish through
    pub gateway_url: String,
    /// Gateway credential for this guest
    pub credential: String,
    /// Gateway room identifier
    pub room_id: String,
    /// Stream name for the guest's publisher configure call
    pub stream_name: String,
}

fn required_str(value: &Value, field: &str) -> Result<String> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| Error::signaling("response parse", format!("missing field {field}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn broadcast_payload() -> Value {
        json!({
            "room_id": "1vOGwAbcdE",
            "credential": "cred-123",
            "stream_name": "stream-xyz",
            "webrtc_gw_url": "https://gw.example.com/janus",
            "access_token": "tok-456",
            "endpoint": "wss://chat.example.com/channel",
            "share_url": "https://example.com/spaces/1vOGwAbcdE",
        })
    }

    #[test]
    fn test_broadcast_session_from_response() {
        let session = BroadcastSession::from_response(&broadcast_payload()).unwrap();
        assert_eq!(session.room_id, "1vOGwAbcdE");
        assert_eq!(session.gateway_url, "https://gw.example.com/janus");
        assert_eq!(session.control_endpoint, "wss://chat.example.com/channel");
    }

    #[test]
    fn test_broadcast_session_missing_field() {
        let mut payload = broadcast_payload();
        payload.as_object_mut().unwrap().remove("credential");
        let err = BroadcastSession::from_response(&payload).unwrap_err();
        assert!(err.is_signaling());
        assert!(err.to_string().contains("credential"));
    }

    #[test]
    fn test_turn_config_from_response() {
        let config = TurnServerConfig::from_response(&json!({
            "ttl": 86400,
            "username": "u",
            "password": "p",
            "uris": ["turn:turn.example.com:3478?transport=udp", 17],
        }))
        .unwrap();
        assert_eq!(config.ttl, 86_400);
        // Non-string entries are dropped, not fatal
        assert_eq!(config.uris.len(), 1);
    }

    #[test]
    fn test_speaker_session_starts_without_feed() {
        let speaker = SpeakerSession::new("u1", "s1");
        assert!(speaker.media_feed_id.is_none());
    }
}
