//! Capability traits for external collaborators.
//!
//! Authentication and room discovery live outside this core; rooms only
//! depend on these narrow seams, which tests implement with mocks.

use async_trait::async_trait;

use crate::error::Result;

/// Supplies the authenticated session cookie for platform calls that
/// require one (TURN credentials, guest stream negotiation).
#[async_trait]
pub trait AuthSession: Send + Sync {
    async fn session_cookie(&self) -> Result<String>;
}

/// Metadata resolved for an existing room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomMetadata {
    /// Media key correlating the room with its live stream
    pub media_key: String,
}

/// Live-stream status for a room a guest wants to join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamStatus {
    /// Listenable HLS URL
    pub hls_url: String,
    /// Token authorizing control-channel and moderation calls
    pub chat_token: String,
    /// Token correlating the viewer registration for stop-watching
    pub lifecycle_token: String,
    /// Endpoint of the room's control channel
    pub control_endpoint: String,
}

/// Read-only directory lookups against the platform.
#[async_trait]
pub trait PlatformDirectory: Send + Sync {
    async fn room_metadata(&self, room_id: &str) -> Result<RoomMetadata>;
    async fn stream_status(&self, media_key: &str) -> Result<StreamStatus>;
}
