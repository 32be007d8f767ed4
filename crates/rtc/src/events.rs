//! Room event types.
//!
//! A closed enum of everything a room can report, delivered over a
//! `tokio::sync::broadcast` channel so consumers get compile-time
//! exhaustiveness instead of string-keyed dispatch.

/// Events emitted by a room (host or participant side).
#[derive(Debug, Clone, PartialEq)]
pub enum SpaceEvent {
    /// A participant asked to speak
    SpeakerRequest {
        user_id: String,
        username: String,
        display_name: String,
        session_uuid: String,
    },

    /// Room size changed
    OccupancyUpdate {
        occupancy: u64,
        total_participants: u64,
    },

    /// A speaker was muted or unmuted
    MuteStateChanged { user_id: String, muted: bool },

    /// The host accepted a speaker
    NewSpeakerAccepted {
        user_id: String,
        username: String,
        session_uuid: String,
    },

    /// Emoji reaction from a participant
    GuestReaction { display_name: String, emoji: String },

    /// A speaker's gateway feed id became known. Always observed before
    /// that speaker's first audio frame.
    SubscribedSpeaker { user_id: String, feed_id: u64 },

    /// No audio activity past the configured threshold. Re-fires every
    /// check interval while the silence persists.
    IdleTimeout { idle_ms: u64 },

    /// Asynchronous failure on the media path; the room is not torn
    /// down automatically
    Error { context: String, message: String },

    /// The control channel closed; no automatic reconnection is
    /// attempted
    Disconnected,
}

impl SpaceEvent {
    /// Event name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SpeakerRequest { .. } => "speaker_request",
            Self::OccupancyUpdate { .. } => "occupancy_update",
            Self::MuteStateChanged { .. } => "mute_state_changed",
            Self::NewSpeakerAccepted { .. } => "new_speaker_accepted",
            Self::GuestReaction { .. } => "guest_reaction",
            Self::SubscribedSpeaker { .. } => "subscribed_speaker",
            Self::IdleTimeout { .. } => "idle_timeout",
            Self::Error { .. } => "error",
            Self::Disconnected => "disconnected",
        }
    }
}
