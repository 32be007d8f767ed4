//! Idle detection timing, driven on a paused clock.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::broadcast;

use airwave_core::AudioFrame;
use airwave_rtc::plugin::PluginRegistry;
use airwave_rtc::plugins::IdleMonitorPlugin;
use airwave_rtc::SpaceEvent;

fn drain_idle_events(rx: &mut broadcast::Receiver<SpaceEvent>) -> Vec<u64> {
    let mut idle = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let SpaceEvent::IdleTimeout { idle_ms } = event {
            idle.push(idle_ms);
        }
    }
    idle
}

async fn advance_secs(total: u64) {
    // Stepped so every ticker deadline is observed in order
    for _ in 0..total {
        tokio::time::advance(Duration::from_secs(1)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_refires_every_check_interval_while_silent() {
    let (events, mut rx) = broadcast::channel(64);
    let registry = PluginRegistry::new(events);
    let plugin = Arc::new(IdleMonitorPlugin::new(
        Duration::from_secs(60),
        Duration::from_secs(10),
    ));
    registry.register(plugin, json!({})).await.unwrap();
    registry.mark_initialized("room-1").await.unwrap();

    // 110 s of silence with a 60 s threshold checked every 10 s:
    // ticks at 70, 80, 90, 100, 110 s fire, the tick at exactly 60 s
    // does not (the comparison is strictly greater).
    advance_secs(110).await;

    let idle = drain_idle_events(&mut rx);
    assert_eq!(idle.len(), 5);
    assert!(idle[0] > 60_000 && idle[0] <= 70_000);

    registry.cleanup().await;
}

#[tokio::test(start_paused = true)]
async fn test_audio_resets_the_idle_clock() {
    let (events, mut rx) = broadcast::channel(64);
    let registry = PluginRegistry::new(events);
    let plugin = Arc::new(IdleMonitorPlugin::new(
        Duration::from_secs(60),
        Duration::from_secs(10),
    ));
    registry.register(plugin, json!({})).await.unwrap();
    registry.mark_initialized("room-1").await.unwrap();

    advance_secs(50).await;
    registry
        .dispatch_audio(&AudioFrame::new(vec![0i16; 480], 48_000, 1))
        .await;
    advance_secs(60).await;
    // 110 s in, but only 60 s since the last frame: still quiet
    assert!(drain_idle_events(&mut rx).is_empty());

    advance_secs(10).await;
    assert_eq!(drain_idle_events(&mut rx).len(), 1);

    registry.cleanup().await;
}

#[tokio::test(start_paused = true)]
async fn test_no_events_after_cleanup() {
    let (events, mut rx) = broadcast::channel(64);
    let registry = PluginRegistry::new(events);
    let plugin = Arc::new(IdleMonitorPlugin::new(
        Duration::from_secs(60),
        Duration::from_secs(10),
    ));
    registry.register(plugin, json!({})).await.unwrap();
    registry.mark_initialized("room-1").await.unwrap();
    registry.cleanup().await;

    advance_secs(120).await;
    assert!(drain_idle_events(&mut rx).is_empty());
}
