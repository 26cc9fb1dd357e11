use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;

use super::engine::{EngineEvent, LinkState, PeerConnection, PeerConnector};

impl From<RTCPeerConnectionState> for LinkState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Connecting => LinkState::Negotiating,
            RTCPeerConnectionState::Connected => LinkState::Connected,
            RTCPeerConnectionState::Disconnected => LinkState::Disconnected,
            RTCPeerConnectionState::Failed => LinkState::Failed,
            RTCPeerConnectionState::Closed => LinkState::Closed,
            _ => LinkState::New,
        }
    }
}

/// Opens webrtc-rs peer connections carrying one audio and one video transceiver
pub struct WebRtcConnector {
    ice_servers: Vec<String>,
}

impl WebRtcConnector {
    pub fn new(ice_servers: Vec<String>) -> Self {
        Self { ice_servers }
    }

    fn configuration(&self) -> RTCConfiguration {
        let ice_servers = self
            .ice_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .collect();

        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }
}

#[async_trait::async_trait]
impl PeerConnector for WebRtcConnector {
    async fn open(&self) -> Result<(Box<dyn PeerConnection>, mpsc::UnboundedReceiver<EngineEvent>)> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let pc = Arc::new(
            api.new_peer_connection(self.configuration())
                .await
                .context("Failed to create peer connection")?,
        );

        pc.add_transceiver_from_kind(RTPCodecType::Audio, None).await?;
        pc.add_transceiver_from_kind(RTPCodecType::Video, None).await?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let state_tx = events_tx.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            info!("Peer connection state changed: {}", state);
            let _ = state_tx.send(EngineEvent::StateChanged(LinkState::from(state)));
            Box::pin(async {})
        }));

        let candidate_tx = events_tx;
        pc.on_ice_candidate(Box::new(move |candidate| {
            let candidate_tx = candidate_tx.clone();
            Box::pin(async move {
                // `None` marks the end of gathering
                let Some(candidate) = candidate else {
                    debug!("ICE gathering complete");
                    return;
                };
                match candidate.to_json().map(serde_json::to_value) {
                    Ok(Ok(value)) => {
                        let _ = candidate_tx.send(EngineEvent::LocalCandidate(value));
                    }
                    Ok(Err(e)) => warn!("Failed to encode local candidate: {}", e),
                    Err(e) => warn!("Failed to read local candidate: {}", e),
                }
            })
        }));

        Ok((
            Box::new(WebRtcConnection {
                pc,
                restart_pending: false,
            }),
            events_rx,
        ))
    }

    fn name(&self) -> &str {
        "webrtc"
    }
}

struct WebRtcConnection {
    pc: Arc<RTCPeerConnection>,
    /// Set by `restart_ice`; the next offer carries fresh ICE credentials
    restart_pending: bool,
}

#[async_trait::async_trait]
impl PeerConnection for WebRtcConnection {
    async fn create_offer(&mut self, ice_restart: bool) -> Result<String> {
        let options = RTCOfferOptions {
            ice_restart: ice_restart || self.restart_pending,
            ..Default::default()
        };
        let offer = self.pc.create_offer(Some(options)).await?;
        self.pc.set_local_description(offer.clone()).await?;
        self.restart_pending = false;
        Ok(offer.sdp)
    }

    async fn accept_offer(&mut self, sdp: &str) -> Result<String> {
        let offer = RTCSessionDescription::offer(sdp.to_string()).context("Invalid offer")?;
        self.pc.set_remote_description(offer).await?;

        let answer = self.pc.create_answer(None).await?;
        self.pc.set_local_description(answer.clone()).await?;
        Ok(answer.sdp)
    }

    async fn accept_answer(&mut self, sdp: &str) -> Result<()> {
        let answer = RTCSessionDescription::answer(sdp.to_string()).context("Invalid answer")?;
        self.pc.set_remote_description(answer).await?;
        Ok(())
    }

    async fn add_remote_candidate(&mut self, candidate: serde_json::Value) -> Result<()> {
        let init: RTCIceCandidateInit = serde_json::from_value(candidate).context("Invalid candidate")?;
        self.pc.add_ice_candidate(init).await?;
        Ok(())
    }

    async fn restart_ice(&mut self) {
        self.restart_pending = true;
    }

    async fn close(&mut self) {
        if let Err(e) = self.pc.close().await {
            warn!("Failed to close peer connection: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn ice_ufrag(sdp: &str) -> Option<&str> {
        sdp.lines().find_map(|line| line.strip_prefix("a=ice-ufrag:"))
    }

    #[test]
    fn test_link_state_from_rtc() {
        assert_eq!(LinkState::from(RTCPeerConnectionState::New), LinkState::New);
        assert_eq!(LinkState::from(RTCPeerConnectionState::Connecting), LinkState::Negotiating);
        assert_eq!(LinkState::from(RTCPeerConnectionState::Connected), LinkState::Connected);
        assert_eq!(LinkState::from(RTCPeerConnectionState::Disconnected), LinkState::Disconnected);
        assert_eq!(LinkState::from(RTCPeerConnectionState::Failed), LinkState::Failed);
        assert_eq!(LinkState::from(RTCPeerConnectionState::Closed), LinkState::Closed);
        assert_eq!(LinkState::from(RTCPeerConnectionState::Unspecified), LinkState::New);
    }

    #[tokio::test]
    async fn test_offer_answer_between_two_connections() {
        let connector = WebRtcConnector::new(Vec::new());
        let (mut conductor, _conductor_events) = connector.open().await.unwrap();
        let (mut responder, _responder_events) = connector.open().await.unwrap();

        let offer = conductor.create_offer(false).await.unwrap();
        assert!(offer.contains("m=audio"));
        assert!(offer.contains("m=video"));

        let answer = responder.accept_offer(&offer).await.unwrap();
        assert!(answer.contains("m=audio"));
        conductor.accept_answer(&answer).await.unwrap();

        assert!(responder.accept_offer("not an sdp").await.is_err());

        conductor.close().await;
        responder.close().await;
    }

    #[tokio::test]
    async fn test_restart_ice_renegotiates_in_place() {
        let connector = WebRtcConnector::new(Vec::new());
        let (mut conductor, _conductor_events) = connector.open().await.unwrap();
        let (mut responder, _responder_events) = connector.open().await.unwrap();

        let offer = conductor.create_offer(false).await.unwrap();
        let answer = responder.accept_offer(&offer).await.unwrap();
        conductor.accept_answer(&answer).await.unwrap();
        assert!(ice_ufrag(&offer).is_some());

        conductor.restart_ice().await;
        let restarted = conductor.create_offer(false).await.unwrap();
        assert!(ice_ufrag(&restarted).is_some());
        let answer = responder.accept_offer(&restarted).await.unwrap();
        conductor.accept_answer(&answer).await.unwrap();

        conductor.close().await;
        responder.close().await;
    }

    #[tokio::test]
    async fn test_state_changes_reach_event_stream() {
        let connector = WebRtcConnector::new(Vec::new());
        let (mut connection, mut events) = connector.open().await.unwrap();

        connection.close().await;

        let closed = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(event) = events.recv().await {
                if event == EngineEvent::StateChanged(LinkState::Closed) {
                    return true;
                }
            }
            false
        })
        .await;
        assert_eq!(closed.ok(), Some(true));
    }
}
