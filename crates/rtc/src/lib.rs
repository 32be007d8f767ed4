//! Real-time audio-room orchestration.
//!
//! This crate creates or joins a live multi-participant audio room,
//! negotiates WebRTC media sessions through a Janus-style signaling
//! gateway, maintains a control channel for room events, and exposes a
//! plugin system so independent modules can observe or inject audio
//! without the core depending on them.
//!
//! Composition, leaves first:
//! - [`signaling`]: gateway client (session/handle lifecycle, room
//!   create/join, SDP exchange, long-poll event loop)
//! - [`media`]: PCM to WebRTC track bridging, both directions
//! - [`control`]: duplex control channel for room events
//! - [`space`]: [`space::SpaceHost`] and [`space::SpaceParticipant`]
//!   orchestrators
//! - [`plugin`] / [`plugins`]: lifecycle contract and built-ins

pub mod config;
pub mod control;
pub mod events;
pub mod media;
pub mod plugin;
pub mod plugins;
pub mod signaling;
pub mod space;

pub use airwave_core::{AudioFrame, Error, Result};
pub use config::{ControlChannelConfig, GatewayConfig, GatewayTimeouts, GuestConfig, HostConfig};
pub use control::{ChannelFactory, ChatClient, ControlChannel, WebSocketChannelFactory};
pub use events::SpaceEvent;
pub use plugin::{PluginContext, PluginRegistration, PluginRegistry, SpacePlugin};
pub use plugins::{AudioLevelPlugin, IdleMonitorPlugin, RecordToDiskPlugin};
pub use signaling::{
    GatewayFactory, GatewayIds, JanusClient, JanusGatewayFactory, JoinedRoom, MediaGateway,
    PublisherInfo,
};
pub use space::{HostState, ParticipantState, SpaceHost, SpaceHostDeps, SpaceParticipant,
    SpaceParticipantDeps};
