//! Participant lifecycle: listening, speak requests, promotion to
//! speaker, and leaving.

mod common;

use std::sync::Arc;

use airwave_rtc::signaling::PublisherInfo;
use airwave_rtc::space::{ParticipantState, SpaceParticipant, SpaceParticipantDeps};
use airwave_rtc::GuestConfig;

use common::*;

struct Rig {
    guest: SpaceParticipant,
    log: CallLog,
    api: Arc<MockPlatformApi>,
    gateway: Arc<MockGateway>,
}

fn rig() -> Rig {
    let log = new_log();
    let api = MockPlatformApi::new(Arc::clone(&log));
    let gateway = MockGateway::new(Arc::clone(&log));
    let guest = SpaceParticipant::new(
        GuestConfig::new("guest-user", "room-1"),
        SpaceParticipantDeps {
            api: api.clone(),
            auth: Arc::new(MockAuth),
            directory: MockDirectory::new(Arc::clone(&log)),
            gateway_factory: MockGatewayFactory::new(Arc::clone(&log), Arc::clone(&gateway)),
            channel_factory: MockChannelFactory::new(Arc::clone(&log)),
        },
    );
    Rig { guest, log, api, gateway }
}

#[tokio::test]
async fn test_listener_join_calls_in_order() {
    let rig = rig();
    rig.guest.join_as_listener().await.unwrap();

    assert_eq!(rig.guest.state(), ParticipantState::Listening);
    assert_eq!(
        log_entries(&rig.log),
        vec![
            "directory.room_metadata(room-1)",
            "directory.stream_status(media-key-1)",
            "api.register_viewer(room-1)",
            "channel.connect(wss://chat.test/channel)",
        ]
    );
}

#[tokio::test]
async fn test_request_then_cancel_returns_to_listening() {
    let rig = rig();
    rig.guest.join_as_listener().await.unwrap();

    let uuid = rig.guest.request_speaker().await.unwrap();
    assert_eq!(uuid, "uuid-1");
    assert_eq!(rig.guest.state(), ParticipantState::SpeakerRequested);
    assert_eq!(rig.guest.session_uuid().as_deref(), Some("uuid-1"));

    rig.guest.cancel_speaker_request().await.unwrap();
    assert_eq!(rig.guest.state(), ParticipantState::Listening);
    assert!(rig.guest.session_uuid().is_none());
    assert!(log_entries(&rig.log).contains(&"api.cancel_speaker_request(uuid-1)".to_string()));
}

#[tokio::test]
async fn test_request_speaker_requires_listening() {
    let rig = rig();
    let err = rig.guest.request_speaker().await.unwrap_err();
    assert!(err.is_capability());

    rig.guest.join_as_listener().await.unwrap();
    rig.guest.request_speaker().await.unwrap();
    // A second request while one is pending is rejected
    let err = rig.guest.request_speaker().await.unwrap_err();
    assert!(err.is_capability());
}

#[tokio::test]
async fn test_become_speaker_negotiates_and_subscribes_existing() {
    let rig = rig();
    *rig.gateway.publishers.lock().unwrap() = vec![
        PublisherInfo { user_id: "guest-user".to_string(), feed_id: 99 },
        PublisherInfo { user_id: "host-user".to_string(), feed_id: 1 },
        PublisherInfo { user_id: "other-guest".to_string(), feed_id: 2 },
    ];
    rig.guest.join_as_listener().await.unwrap();
    rig.guest.request_speaker().await.unwrap();
    rig.log.lock().unwrap().clear();

    rig.guest.become_speaker().await.unwrap();
    assert_eq!(rig.guest.state(), ParticipantState::Speaking);
    // No room creation on the guest path, and no self-subscription
    assert_eq!(
        log_entries(&rig.log),
        vec![
            "api.turn_servers",
            "api.negotiate_guest_stream",
            "gateway.connect(room-1)",
            "gateway.join_as_publisher",
            "gateway.configure_publisher",
            "gateway.subscribe(host-user)",
            "gateway.subscribe(other-guest)",
        ]
    );
}

#[tokio::test]
async fn test_one_bad_feed_does_not_block_promotion() {
    let rig = rig();
    *rig.gateway.publishers.lock().unwrap() = vec![
        PublisherInfo { user_id: "host-user".to_string(), feed_id: 1 },
        PublisherInfo { user_id: "other-guest".to_string(), feed_id: 2 },
    ];
    rig.gateway.fail_on("subscribe_speaker");
    rig.guest.join_as_listener().await.unwrap();
    rig.guest.request_speaker().await.unwrap();

    rig.guest.become_speaker().await.unwrap();
    assert_eq!(rig.guest.state(), ParticipantState::Speaking);
}

#[tokio::test]
async fn test_newly_accepted_speaker_is_auto_subscribed() {
    let rig = rig();
    rig.guest.join_as_listener().await.unwrap();
    rig.guest.request_speaker().await.unwrap();
    rig.guest.become_speaker().await.unwrap();
    rig.log.lock().unwrap().clear();

    let events = rig.gateway.events.lock().unwrap().clone().unwrap();
    events
        .send(airwave_rtc::SpaceEvent::NewSpeakerAccepted {
            user_id: "late-guest".to_string(),
            username: "late".to_string(),
            session_uuid: "uuid-9".to_string(),
        })
        .unwrap();

    let expected = "gateway.subscribe(late-guest)".to_string();
    for _ in 0..100 {
        tokio::task::yield_now().await;
        if log_entries(&rig.log).contains(&expected) {
            break;
        }
    }
    assert!(log_entries(&rig.log).contains(&expected));
}

#[tokio::test]
async fn test_mute_self_uses_own_session() {
    let rig = rig();
    rig.guest.join_as_listener().await.unwrap();
    rig.guest.request_speaker().await.unwrap();
    rig.guest.become_speaker().await.unwrap();
    rig.log.lock().unwrap().clear();

    rig.guest.mute_self().await.unwrap();
    rig.guest.unmute_self().await.unwrap();
    assert_eq!(
        log_entries(&rig.log),
        vec![
            "api.mute_speaker(uuid=uuid-1)",
            "api.unmute_speaker(uuid=uuid-1)",
        ]
    );
}

#[tokio::test]
async fn test_mute_requires_speaking() {
    let rig = rig();
    rig.guest.join_as_listener().await.unwrap();
    let err = rig.guest.mute_self().await.unwrap_err();
    assert!(err.is_capability());
}

#[tokio::test]
async fn test_push_audio_requires_speaking() {
    let rig = rig();
    rig.guest.join_as_listener().await.unwrap();
    let err = rig.guest.push_audio(&[0i16; 480], 48_000, 1).await.unwrap_err();
    assert!(err.is_capability());
}

#[tokio::test]
async fn test_leave_releases_everything_once() {
    let rig = rig();
    rig.guest.join_as_listener().await.unwrap();
    rig.guest.request_speaker().await.unwrap();
    rig.guest.become_speaker().await.unwrap();
    rig.api.fail_on("stop_watching");
    rig.log.lock().unwrap().clear();

    rig.guest.leave().await.unwrap();
    assert_eq!(rig.guest.state(), ParticipantState::Left);
    assert_eq!(
        log_entries(&rig.log),
        vec![
            "gateway.leave_room",
            "gateway.stop",
            "api.stop_watching",
            "channel.disconnect",
        ]
    );

    rig.log.lock().unwrap().clear();
    rig.guest.leave().await.unwrap();
    assert!(log_entries(&rig.log).is_empty());
}

#[tokio::test]
async fn test_listener_leave_skips_media() {
    let rig = rig();
    rig.guest.join_as_listener().await.unwrap();
    rig.log.lock().unwrap().clear();

    rig.guest.leave().await.unwrap();
    assert_eq!(
        log_entries(&rig.log),
        vec!["api.stop_watching", "channel.disconnect"]
    );
}
