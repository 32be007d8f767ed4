//! Idle-room detection.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::debug;

use airwave_core::{AudioFrame, Result};

use crate::events::SpaceEvent;
use crate::plugin::{PluginContext, SpacePlugin};

/// Emits [`SpaceEvent::IdleTimeout`] whenever the room has heard no
/// audio for longer than the threshold.
///
/// The check runs on a fixed interval and re-fires on every tick while
/// the silence lasts, so a 60 s threshold checked every 10 s produces
/// one event per 10 s of continued silence. Consumers that want a
/// single notification debounce on their side.
pub struct IdleMonitorPlugin {
    threshold: Duration,
    check_interval: Duration,
    last_audio: Arc<Mutex<Instant>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl IdleMonitorPlugin {
    pub fn new(threshold: Duration, check_interval: Duration) -> Self {
        Self {
            threshold,
            check_interval,
            last_audio: Arc::new(Mutex::new(Instant::now())),
            ticker: Mutex::new(None),
        }
    }

    fn spawn_ticker(&self, events: broadcast::Sender<SpaceEvent>) -> JoinHandle<()> {
        let threshold = self.threshold;
        let check_interval = self.check_interval;
        let last_audio = Arc::clone(&self.last_audio);
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + check_interval, check_interval);
            loop {
                ticker.tick().await;
                let idle = last_audio.lock().elapsed();
                if idle > threshold {
                    debug!(idle_ms = idle.as_millis() as u64, "room is idle");
                    let _ = events.send(SpaceEvent::IdleTimeout {
                        idle_ms: idle.as_millis() as u64,
                    });
                }
            }
        })
    }
}

#[async_trait]
impl SpacePlugin for IdleMonitorPlugin {
    fn name(&self) -> &str {
        "idle-monitor"
    }

    async fn init(&self, context: &PluginContext) -> Result<()> {
        *self.last_audio.lock() = Instant::now();
        let task = self.spawn_ticker(context.events.clone());
        if let Some(previous) = self.ticker.lock().replace(task) {
            previous.abort();
        }
        Ok(())
    }

    async fn on_audio_data(&self, _frame: &AudioFrame) -> Result<()> {
        *self.last_audio.lock() = Instant::now();
        Ok(())
    }

    async fn cleanup(&self) -> Result<()> {
        if let Some(task) = self.ticker.lock().take() {
            task.abort();
        }
        Ok(())
    }
}
