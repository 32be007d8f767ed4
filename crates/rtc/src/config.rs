//! Configuration objects passed at construction.
//!
//! Every component receives an explicit config instead of reading
//! module globals; tokens and endpoints travel with the config.

use std::time::Duration;

use airwave_core::session::{BroadcastSession, GuestMediaSession, TurnServerConfig};
use webrtc::ice_transport::ice_server::RTCIceServer;

/// Timeouts governing the gateway protocol. Every "wait for event"
/// operation carries one of these bounds and rejects on expiry.
#[derive(Debug, Clone)]
pub struct GatewayTimeouts {
    /// Cadence of the long-poll loop
    pub poll_interval: Duration,
    /// Bound for the publisher "joined" event
    pub join: Duration,
    /// Bound for the publishers-list event during feed resolution
    pub subscribe: Duration,
    /// Bound for the subscriber "attached" event carrying the offer
    pub attach: Duration,
}

impl Default for GatewayTimeouts {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            join: Duration::from_secs(10),
            subscribe: Duration::from_secs(8),
            attach: Duration::from_secs(5),
        }
    }
}

/// Everything a gateway client needs to drive one room.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Base URL of the signaling gateway
    pub gateway_url: String,
    /// Gateway room identifier
    pub room_id: String,
    /// Credential attached to every gateway request
    pub credential: String,
    /// Local participant's platform user id (publisher display name)
    pub user_id: String,
    /// Stream name for the publisher configure call
    pub stream_name: String,
    /// ICE credentials, fetched once and reused for every peer
    /// connection in this room
    pub turn: TurnServerConfig,
    pub timeouts: GatewayTimeouts,
}

impl GatewayConfig {
    /// Host-side config derived from a freshly created broadcast.
    pub fn for_host(
        broadcast: &BroadcastSession,
        user_id: impl Into<String>,
        turn: TurnServerConfig,
    ) -> Self {
        Self {
            gateway_url: broadcast.gateway_url.clone(),
            room_id: broadcast.room_id.clone(),
            credential: broadcast.credential.clone(),
            user_id: user_id.into(),
            stream_name: broadcast.stream_name.clone(),
            turn,
            timeouts: GatewayTimeouts::default(),
        }
    }

    /// Guest-side config derived from a negotiated guest stream.
    pub fn for_guest(
        negotiated: &GuestMediaSession,
        user_id: impl Into<String>,
        turn: TurnServerConfig,
    ) -> Self {
        Self {
            gateway_url: negotiated.gateway_url.clone(),
            room_id: negotiated.room_id.clone(),
            credential: negotiated.credential.clone(),
            user_id: user_id.into(),
            stream_name: negotiated.stream_name.clone(),
            turn,
            timeouts: GatewayTimeouts::default(),
        }
    }

    /// ICE server list for peer connections in this room.
    pub fn ice_servers(&self) -> Vec<RTCIceServer> {
        vec![RTCIceServer {
            urls: self.turn.uris.clone(),
            username: self.turn.username.clone(),
            credential: self.turn.password.clone(),
            ..Default::default()
        }]
    }
}

/// Connection parameters for the room's control channel.
#[derive(Debug, Clone)]
pub struct ControlChannelConfig {
    /// WebSocket endpoint
    pub endpoint: String,
    /// Token for the auth frame sent on open
    pub access_token: String,
    /// Room named in the join frame
    pub room_id: String,
}

/// Configuration for hosting a room.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Host's platform user id
    pub user_id: String,
    /// Public title used when publishing the broadcast
    pub title: String,
    /// Broadcast description
    pub description: String,
    /// Broadcast region; resolved via the platform when `None`
    pub region: Option<String>,
    /// Ask the platform to record the room
    pub record: bool,
    /// Open a control channel for speaker requests, reactions and
    /// occupancy. Non-interactive rooms skip the channel entirely.
    pub interactive: bool,
}

impl HostConfig {
    pub fn new(user_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            title: title.into(),
            description: String::new(),
            region: None,
            record: false,
            interactive: true,
        }
    }
}

/// Configuration for joining an existing room.
#[derive(Debug, Clone)]
pub struct GuestConfig {
    /// Guest's platform user id
    pub user_id: String,
    /// Room to join
    pub room_id: String,
}

impl GuestConfig {
    pub fn new(user_id: impl Into<String>, room_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            room_id: room_id.into(),
        }
    }
}
