//! Peer-to-peer media link between conductor and responder
//!
//! The media engine sits behind `PeerConnector`/`PeerConnection`; the
//! supervisor only negotiates through the signaling channel and watches the
//! link's health. `WebRtcConnector` is the webrtc-rs engine.

mod engine;
mod rtc;
mod supervisor;

pub use engine::{EngineEvent, LinkState, PeerConnection, PeerConnector};
pub use rtc::WebRtcConnector;
pub use supervisor::{PeerLinkHandle, PeerLinkSupervisor};
