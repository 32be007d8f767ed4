//! Core types for the airwave audio-room client.
//!
//! This crate holds everything the orchestration layer (`airwave-rtc`)
//! shares with callers: the error taxonomy, the PCM frame type, the
//! session data model, the capability traits for external collaborators
//! (auth session, platform directory), and the platform REST client.

pub mod api;
pub mod audio;
pub mod auth;
pub mod error;
pub mod session;

pub use audio::AudioFrame;
pub use error::{Error, Result};
pub use session::{BroadcastSession, GuestMediaSession, SpeakerSession, TurnServerConfig};
