//! Room plugin contract and registry.
//!
//! Plugins observe a room's lifecycle and audio without owning any of
//! it. A plugin may be registered before or after the room goes live;
//! the registry replays the missed lifecycle hooks on late attach so
//! every plugin sees the same sequence: attach, init, gateway ready,
//! audio, cleanup.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use airwave_core::{AudioFrame, Result};

use crate::events::SpaceEvent;
use crate::signaling::MediaGateway;

/// What a plugin sees of the room it is attached to.
#[derive(Clone)]
pub struct PluginContext {
    /// Room identifier; empty until the room is initialized.
    pub room_id: String,
    /// The room's event stream. Plugins may both subscribe and emit.
    pub events: broadcast::Sender<SpaceEvent>,
    /// Free-form per-registration configuration.
    pub config: Value,
}

/// Observer hooks for a room. Every hook has a no-op default, so a
/// plugin implements only what it cares about.
#[async_trait]
pub trait SpacePlugin: Send + Sync {
    fn name(&self) -> &str {
        "plugin"
    }

    /// Called immediately at registration, live or not.
    async fn on_attach(&self, _context: &PluginContext) -> Result<()> {
        Ok(())
    }

    /// Called once the room is initialized (or at registration, if the
    /// room already is).
    async fn init(&self, _context: &PluginContext) -> Result<()> {
        Ok(())
    }

    /// Called when the media gateway is connected and usable.
    async fn on_gateway_ready(&self, _gateway: &Arc<dyn MediaGateway>) -> Result<()> {
        Ok(())
    }

    /// Called for every inbound audio frame, sequentially.
    async fn on_audio_data(&self, _frame: &AudioFrame) -> Result<()> {
        Ok(())
    }

    /// Called during room teardown.
    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }
}

/// One registered plugin with its configuration.
pub struct PluginRegistration {
    pub plugin: Arc<dyn SpacePlugin>,
    pub config: Value,
}

/// Holds a room's plugins and fans lifecycle and audio out to them.
///
/// Registration is append-only and never deduplicates: registering the
/// same plugin twice delivers every hook twice.
pub struct PluginRegistry {
    room_id: RwLock<String>,
    events: broadcast::Sender<SpaceEvent>,
    registrations: tokio::sync::Mutex<Vec<PluginRegistration>>,
    initialized: AtomicBool,
    gateway: RwLock<Option<Arc<dyn MediaGateway>>>,
}

impl PluginRegistry {
    pub fn new(events: broadcast::Sender<SpaceEvent>) -> Self {
        Self {
            room_id: RwLock::new(String::new()),
            events,
            registrations: tokio::sync::Mutex::new(Vec::new()),
            initialized: AtomicBool::new(false),
            gateway: RwLock::new(None),
        }
    }

    fn context_for(&self, config: &Value) -> PluginContext {
        PluginContext {
            room_id: self.room_id.read().clone(),
            events: self.events.clone(),
            config: config.clone(),
        }
    }

    /// Register a plugin. `on_attach` fires immediately; if the room is
    /// already initialized, `init` (and `on_gateway_ready` when the
    /// gateway is up) are replayed before this returns.
    pub async fn register(&self, plugin: Arc<dyn SpacePlugin>, config: Value) -> Result<()> {
        let context = self.context_for(&config);
        plugin.on_attach(&context).await?;
        if self.initialized.load(Ordering::SeqCst) {
            plugin.init(&context).await?;
            let gateway = self.gateway.read().clone();
            if let Some(gateway) = gateway {
                plugin.on_gateway_ready(&gateway).await?;
            }
        }
        debug!(plugin = plugin.name(), "plugin registered");
        self.registrations
            .lock()
            .await
            .push(PluginRegistration { plugin, config });
        Ok(())
    }

    /// Transition to initialized and run `init` on every plugin. The
    /// flag is monotonic; calling this twice re-runs no hooks.
    pub async fn mark_initialized(&self, room_id: &str) -> Result<()> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        *self.room_id.write() = room_id.to_owned();
        let registrations = self.registrations.lock().await;
        for registration in registrations.iter() {
            let context = self.context_for(&registration.config);
            registration.plugin.init(&context).await?;
        }
        Ok(())
    }

    /// Announce the connected gateway to every plugin and remember it
    /// for late registrations.
    pub async fn gateway_ready(&self, gateway: Arc<dyn MediaGateway>) -> Result<()> {
        *self.gateway.write() = Some(Arc::clone(&gateway));
        let registrations = self.registrations.lock().await;
        for registration in registrations.iter() {
            registration.plugin.on_gateway_ready(&gateway).await?;
        }
        Ok(())
    }

    /// Deliver one audio frame to every plugin, in registration order.
    /// A failing plugin is logged and skipped; the rest still run.
    pub async fn dispatch_audio(&self, frame: &AudioFrame) {
        let registrations = self.registrations.lock().await;
        for registration in registrations.iter() {
            if let Err(e) = registration.plugin.on_audio_data(frame).await {
                warn!(plugin = registration.plugin.name(), error = %e, "plugin audio hook failed");
            }
        }
    }

    /// Run `cleanup` on every plugin. Failures are logged per plugin
    /// and never interrupt the remaining cleanups.
    pub async fn cleanup(&self) {
        let registrations = self.registrations.lock().await;
        for registration in registrations.iter() {
            if let Err(e) = registration.plugin.cleanup().await {
                warn!(plugin = registration.plugin.name(), error = %e, "plugin cleanup failed");
            }
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }
}
