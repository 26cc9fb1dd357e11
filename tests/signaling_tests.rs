// Signaling channel: join echo, self-echo filtering, typed subscriptions,
// reconnection with linear backoff and the terminal state.

mod common;

use anyhow::Result;
use common::settle;
use loqa_rooms::config::SignalingConfig;
use loqa_rooms::signaling::PromptSummary;
use loqa_rooms::{ChannelStatus, EventKind, LocalRelay, Role, SignalEvent, SignalingChannel};
use std::sync::Arc;
use std::time::Duration;

async fn connect(relay: &Arc<LocalRelay>, role: Role, name: &str) -> SignalingChannel {
    SignalingChannel::connect(relay.clone(), SignalingConfig::default(), "ROOM1", role, name)
        .await
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_join_is_echoed_so_both_sides_learn_each_other() -> Result<()> {
    let relay = Arc::new(LocalRelay::new());

    let conductor = connect(&relay, Role::Conductor, "dr-lee").await;
    let mut conductor_joins = conductor.subscribe(&[EventKind::Join]);

    let responder = connect(&relay, Role::Responder, "sam").await;
    let mut responder_joins = responder.subscribe(&[EventKind::Join]);
    settle().await;

    let seen_by_responder = responder_joins.try_recv().expect("responder saw the echo");
    assert_eq!(seen_by_responder.role, Role::Conductor);
    assert!(matches!(seen_by_responder.event, SignalEvent::Join { ref name, .. } if name == "dr-lee"));
    assert!(responder_joins.try_recv().is_none());

    // The announcement plus the responder's own echo of the conductor's echo
    let mut seen_by_conductor = Vec::new();
    while let Some(inbound) = conductor_joins.try_recv() {
        seen_by_conductor.push(inbound);
    }
    assert!(!seen_by_conductor.is_empty() && seen_by_conductor.len() <= 2);
    assert!(seen_by_conductor
        .iter()
        .all(|inbound| inbound.role == Role::Responder && inbound.sender == responder.sender_id()));

    // Echoes stop once both sides know each other
    settle().await;
    assert!(responder_joins.try_recv().is_none());
    assert!(conductor_joins.try_recv().is_none());

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_own_events_are_not_delivered_back() -> Result<()> {
    let relay = Arc::new(LocalRelay::new());
    let conductor = connect(&relay, Role::Conductor, "dr-lee").await;
    let responder = connect(&relay, Role::Responder, "sam").await;

    let mut own = conductor.subscribe(&[EventKind::PromptIndexChanged]);
    let mut remote = responder.subscribe(&[EventKind::PromptIndexChanged]);
    settle().await;

    conductor.send(SignalEvent::PromptIndexChanged { index: 2 }).await?;
    settle().await;

    assert!(own.try_recv().is_none());
    let inbound = remote.try_recv().expect("responder got the index");
    assert_eq!(inbound.event, SignalEvent::PromptIndexChanged { index: 2 });

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_subscription_only_receives_its_kinds() -> Result<()> {
    let relay = Arc::new(LocalRelay::new());
    let conductor = connect(&relay, Role::Conductor, "dr-lee").await;
    let responder = connect(&relay, Role::Responder, "sam").await;
    let mut samples = conductor.subscribe(&[EventKind::LiveSample]);
    settle().await;

    responder.send(SignalEvent::RosterUpdate { count: 2 }).await?;
    responder
        .send(SignalEvent::LiveSample {
            label: "Happy".to_string(),
            confidence: 0.8,
        })
        .await?;
    settle().await;

    let inbound = samples.try_recv().expect("live sample delivered");
    assert_eq!(inbound.event.kind(), EventKind::LiveSample);
    assert!(samples.try_recv().is_none());

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_dropping_subscription_unregisters_once() -> Result<()> {
    let relay = Arc::new(LocalRelay::new());
    let channel = connect(&relay, Role::Conductor, "dr-lee").await;
    assert_eq!(channel.session_code(), "ROOM1");
    assert_eq!(channel.role(), Role::Conductor);

    let first = channel.subscribe(EventKind::SESSION);
    let second = channel.subscribe(EventKind::PEER);
    assert_eq!(channel.subscriber_count(), 2);

    drop(first);
    assert_eq!(channel.subscriber_count(), 1);
    drop(second);
    assert_eq!(channel.subscriber_count(), 0);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_reconnects_after_transport_loss() -> Result<()> {
    let relay = Arc::new(LocalRelay::new());
    let conductor = connect(&relay, Role::Conductor, "dr-lee").await;
    let responder = connect(&relay, Role::Responder, "sam").await;
    let mut remote = responder.subscribe(&[EventKind::PromptAdded]);
    settle().await;
    assert_eq!(relay.attach_count(), 2);

    relay.sever_all();
    settle().await;
    assert_ne!(conductor.status(), ChannelStatus::Connected);

    // First retry waits one backoff step
    tokio::time::sleep(Duration::from_millis(1100)).await;

    let state = *conductor.state().borrow();
    assert_eq!(state.status, ChannelStatus::Connected);
    assert_eq!(state.epoch, 2);
    assert!(!state.terminal);
    assert_eq!(relay.attach_count(), 4);

    conductor
        .send(SignalEvent::PromptAdded {
            prompt: PromptSummary {
                id: 7,
                text: "What made you smile today?".to_string(),
                position: 0,
            },
        })
        .await?;
    settle().await;
    assert!(remote.try_recv().is_some(), "events flow after reconnect");

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_gives_up_after_retry_budget() -> Result<()> {
    let relay = Arc::new(LocalRelay::new());
    let channel = connect(&relay, Role::Responder, "sam").await;
    let mut state = channel.state();

    relay.set_available(false);
    relay.sever_all();

    // 1 + 2 + 3 + 4 + 5 seconds of linear backoff
    tokio::time::sleep(Duration::from_secs(14)).await;
    assert!(!state.borrow_and_update().terminal);

    tokio::time::sleep(Duration::from_secs(2)).await;
    let last = *state.borrow_and_update();
    assert_eq!(last.status, ChannelStatus::Disconnected);
    assert!(last.terminal);
    assert!(channel.send(SignalEvent::RosterUpdate { count: 1 }).await.is_err());

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_recovers_when_relay_returns_within_budget() -> Result<()> {
    let relay = Arc::new(LocalRelay::new());
    let channel = connect(&relay, Role::Responder, "sam").await;

    relay.set_available(false);
    relay.sever_all();
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(channel.status(), ChannelStatus::Connecting);

    relay.set_available(true);
    tokio::time::sleep(Duration::from_secs(4)).await;

    let state = *channel.state().borrow();
    assert_eq!(state.status, ChannelStatus::Connected);
    assert_eq!(state.epoch, 2);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_leave_is_delivered_on_disconnect() -> Result<()> {
    let relay = Arc::new(LocalRelay::new());
    let conductor = connect(&relay, Role::Conductor, "dr-lee").await;
    let mut leaves = conductor.subscribe(&[EventKind::Leave]);
    let responder = connect(&relay, Role::Responder, "sam").await;
    settle().await;

    responder.disconnect().await;
    settle().await;

    let inbound = leaves.try_recv().expect("leave delivered");
    assert_eq!(inbound.event, SignalEvent::Leave { name: "sam".to_string() });
    let state = *responder.state().borrow();
    assert!(state.terminal);

    Ok(())
}

#[test]
fn test_wire_format_uses_kebab_case_types() {
    let event = SignalEvent::CaptureStarted {
        prompt_id: 3,
        duration_seconds: 10,
    };
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["type"], "capture-started");
    assert_eq!(json["promptId"], 3);
    assert_eq!(json["durationSeconds"], 10);

    let join: SignalEvent =
        serde_json::from_str(r#"{"type":"join","sessionCode":"ROOM1","role":"responder","name":"sam"}"#).unwrap();
    assert_eq!(join.kind(), EventKind::Join);
}
