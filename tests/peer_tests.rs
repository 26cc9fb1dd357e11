// Peer link supervisor: initiator-only offers after the settle delay,
// automatic restart on failure, disconnect grace, and track toggles that
// never renegotiate.

mod common;

use anyhow::Result;
use common::{settle, FakeConnector, FakeMedia};
use loqa_rooms::config::{PeerConfig, SignalingConfig};
use loqa_rooms::{
    EngineEvent, LinkState, LocalRelay, PeerLinkHandle, PeerLinkSupervisor, Role, SignalEvent, SignalingChannel,
    TrackKind,
};
use std::sync::Arc;
use std::time::Duration;

struct Side {
    link: PeerLinkHandle,
    connector: Arc<FakeConnector>,
    media: Arc<FakeMedia>,
    _channel: Arc<SignalingChannel>,
}

async fn side(relay: &Arc<LocalRelay>, role: Role, name: &str) -> Side {
    let channel = Arc::new(
        SignalingChannel::connect(relay.clone(), SignalingConfig::default(), "ROOM1", role, name)
            .await
            .unwrap(),
    );
    let connector = FakeConnector::new();
    let media = FakeMedia::new();
    let link = PeerLinkSupervisor::spawn(
        role,
        PeerConfig::default(),
        connector.clone(),
        media.clone(),
        channel.clone(),
    )
    .await
    .unwrap();

    Side {
        link,
        connector,
        media,
        _channel: channel,
    }
}

async fn connected_pair(relay: &Arc<LocalRelay>) -> (Side, Side) {
    let conductor = side(relay, Role::Conductor, "dr-lee").await;
    let responder = side(relay, Role::Responder, "sam").await;
    tokio::time::sleep(Duration::from_millis(3100)).await;

    conductor.connector.emit(EngineEvent::StateChanged(LinkState::Connected));
    responder.connector.emit(EngineEvent::StateChanged(LinkState::Connected));
    settle().await;
    (conductor, responder)
}

#[tokio::test(start_paused = true)]
async fn test_initiator_offers_after_settle_delay() -> Result<()> {
    let relay = Arc::new(LocalRelay::new());
    let conductor = side(&relay, Role::Conductor, "dr-lee").await;
    let responder = side(&relay, Role::Responder, "sam").await;

    tokio::time::sleep(Duration::from_millis(2900)).await;
    assert_eq!(conductor.connector.count("offer"), 0);
    assert_eq!(conductor.link.state(), LinkState::New);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(conductor.connector.count("offer") >= 1);
    assert_eq!(responder.connector.count("accept-offer"), conductor.connector.count("offer"));
    assert_eq!(conductor.connector.count("accept-answer"), conductor.connector.count("offer"));
    assert_eq!(conductor.link.state(), LinkState::Negotiating);
    assert_eq!(responder.link.state(), LinkState::Negotiating);

    // The responder only ever answers
    assert_eq!(responder.connector.count("offer"), 0);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_candidates_are_relayed_unmodified() -> Result<()> {
    let relay = Arc::new(LocalRelay::new());
    let (conductor, responder) = connected_pair(&relay).await;

    conductor.connector.emit(EngineEvent::LocalCandidate(serde_json::json!({
        "candidate": "candidate:1 1 udp 2122260223 10.0.0.2 54400 typ host",
        "sdpMid": "0",
    })));
    settle().await;

    assert_eq!(responder.connector.count("candidate"), 1);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_failed_link_renegotiates_without_external_trigger() -> Result<()> {
    let relay = Arc::new(LocalRelay::new());
    let (conductor, responder) = connected_pair(&relay).await;
    assert_eq!(conductor.link.state(), LinkState::Connected);
    let answers_before = responder.connector.count("accept-offer");

    conductor.connector.emit(EngineEvent::StateChanged(LinkState::Failed));
    settle().await;

    assert_eq!(conductor.link.state(), LinkState::Negotiating);
    assert_eq!(conductor.link.restarts(), 1);
    assert_eq!(conductor.connector.count("restart-ice"), 1);
    assert_eq!(conductor.connector.count("offer:restart"), 1);
    assert_eq!(responder.connector.count("accept-offer"), answers_before + 1);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_responder_failure_waits_for_initiator_offer() -> Result<()> {
    let relay = Arc::new(LocalRelay::new());
    let (_conductor, responder) = connected_pair(&relay).await;

    responder.connector.emit(EngineEvent::StateChanged(LinkState::Failed));
    settle().await;

    assert_eq!(responder.link.state(), LinkState::Negotiating);
    assert_eq!(responder.link.restarts(), 1);
    assert_eq!(responder.connector.count("offer:restart"), 0);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_brief_disconnect_is_absorbed() -> Result<()> {
    let relay = Arc::new(LocalRelay::new());
    let (conductor, _responder) = connected_pair(&relay).await;

    conductor.connector.emit(EngineEvent::StateChanged(LinkState::Disconnected));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(conductor.link.state(), LinkState::Disconnected);

    conductor.connector.emit(EngineEvent::StateChanged(LinkState::Connected));
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(conductor.link.state(), LinkState::Connected);
    assert_eq!(conductor.link.restarts(), 0);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_lasting_disconnect_restarts_after_grace() -> Result<()> {
    let relay = Arc::new(LocalRelay::new());
    let (conductor, _responder) = connected_pair(&relay).await;

    conductor.connector.emit(EngineEvent::StateChanged(LinkState::Disconnected));
    tokio::time::sleep(Duration::from_millis(2900)).await;
    assert_eq!(conductor.link.restarts(), 0);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(conductor.link.restarts(), 1);
    assert_eq!(conductor.link.state(), LinkState::Negotiating);
    assert_eq!(conductor.connector.count("offer:restart"), 1);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_connected_link_never_returns_to_new() -> Result<()> {
    let relay = Arc::new(LocalRelay::new());
    let (conductor, _responder) = connected_pair(&relay).await;
    let mut states = conductor.link.watch_state();
    states.borrow_and_update();

    conductor.connector.emit(EngineEvent::StateChanged(LinkState::New));
    settle().await;

    assert_eq!(conductor.link.state(), LinkState::Connected);
    assert!(!states.has_changed()?);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_track_toggles_do_not_renegotiate() -> Result<()> {
    let relay = Arc::new(LocalRelay::new());
    let (conductor, _responder) = connected_pair(&relay).await;
    let offers_before = conductor.connector.log().len();

    assert!(conductor.link.set_track_enabled(TrackKind::Video, false).await);
    assert!(conductor.link.set_track_enabled(TrackKind::Audio, false).await);
    assert!(conductor.link.set_track_enabled(TrackKind::Video, true).await);
    settle().await;

    assert_eq!(conductor.connector.log().len(), offers_before);
    assert_eq!(conductor.link.state(), LinkState::Connected);
    assert_eq!(conductor.link.restarts(), 0);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_closes_link_and_releases_media() -> Result<()> {
    let relay = Arc::new(LocalRelay::new());
    let (mut conductor, _responder) = connected_pair(&relay).await;
    assert_eq!(conductor.media.acquired(), 1);

    conductor.link.shutdown().await;

    assert_eq!(conductor.link.state(), LinkState::Closed);
    assert_eq!(conductor.connector.count("close"), 1);
    assert_eq!(conductor.media.released(), 1);

    // Engine noise after close is ignored
    conductor.connector.emit(EngineEvent::StateChanged(LinkState::Failed));
    settle().await;
    assert_eq!(conductor.link.restarts(), 0);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_offer_during_media_setup_is_answered() -> Result<()> {
    let relay = Arc::new(LocalRelay::new());
    let conductor = Arc::new(
        SignalingChannel::connect(relay.clone(), SignalingConfig::default(), "ROOM1", Role::Conductor, "dr-lee").await?,
    );
    let responder = Arc::new(
        SignalingChannel::connect(relay.clone(), SignalingConfig::default(), "ROOM1", Role::Responder, "sam").await?,
    );
    let connector = FakeConnector::new();

    // Camera takes a second to open; the offer lands in the meantime
    let pending = tokio::spawn(PeerLinkSupervisor::spawn(
        Role::Responder,
        PeerConfig::default(),
        connector.clone(),
        FakeMedia::slow(Duration::from_secs(1)),
        responder.clone(),
    ));
    settle().await;
    conductor.send(SignalEvent::PeerOffer { sdp: "v=0 offer".to_string() }).await?;
    settle().await;
    assert_eq!(connector.count("accept-offer"), 0);

    let link = pending.await??;
    settle().await;

    assert_eq!(connector.count("accept-offer"), 1);
    assert_eq!(link.state(), LinkState::Negotiating);

    Ok(())
}
