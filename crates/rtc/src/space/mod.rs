//! Room orchestrators.
//!
//! [`SpaceHost`] creates and runs a room; [`SpaceParticipant`] joins an
//! existing one. Both own a media gateway, an optional control channel,
//! and a plugin registry, and publish everything observable on one
//! broadcast event stream.

mod guest;
mod host;

pub use guest::{SpaceParticipant, SpaceParticipantDeps};
pub use host::{SpaceHost, SpaceHostDeps};

/// Lifecycle of a hosted room. Transitions are one-way; a stopped host
/// is never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    Uninitialized,
    Initializing,
    Live,
    Stopping,
    Stopped,
}

/// Lifecycle of a joined participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantState {
    Idle,
    Listening,
    SpeakerRequested,
    Speaking,
    Left,
}
