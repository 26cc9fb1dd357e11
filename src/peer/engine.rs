use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Lifecycle of the peer-to-peer media link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    New,
    Negotiating,
    Connected,
    Disconnected,
    Failed,
    /// Torn down locally; terminal
    Closed,
}

/// Notifications from the media engine
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A network candidate was discovered and should reach the peer
    LocalCandidate(serde_json::Value),
    /// Connectivity changed
    StateChanged(LinkState),
}

/// The media engine's side of one peer connection.
///
/// Descriptions and candidates are opaque to everything above this trait.
#[async_trait::async_trait]
pub trait PeerConnection: Send {
    /// Create an offer and set it as the local description
    async fn create_offer(&mut self, ice_restart: bool) -> Result<String>;

    /// Apply a remote offer and return the local answer
    async fn accept_offer(&mut self, sdp: &str) -> Result<String>;

    /// Apply the remote answer to our offer
    async fn accept_answer(&mut self, sdp: &str) -> Result<()>;

    async fn add_remote_candidate(&mut self, candidate: serde_json::Value) -> Result<()>;

    /// Restart connectivity checks in place; the next offer carries new credentials
    async fn restart_ice(&mut self);

    async fn close(&mut self);
}

/// Opens peer connections
#[async_trait::async_trait]
pub trait PeerConnector: Send + Sync {
    async fn open(&self) -> Result<(Box<dyn PeerConnection>, mpsc::UnboundedReceiver<EngineEvent>)>;

    fn name(&self) -> &str;
}
