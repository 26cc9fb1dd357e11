pub mod capture;
pub mod config;
pub mod error;
pub mod http;
pub mod media;
pub mod nats;
pub mod peer;
pub mod records;
pub mod room;
pub mod session;
pub mod signaling;

pub use capture::{CaptureEvent, CaptureOutcome, CaptureWindow, Classification, EmotionClassifier, NatsClassifier};
pub use config::Config;
pub use error::{CaptureError, ChannelError, MediaError, RecordsError, Rejection, SyncError, SyncResult};
pub use http::{create_router, AppState};
pub use media::{FileMedia, MediaConstraints, MediaDevices, MediaLease, MediaStream, TrackKind, VideoFrame};
pub use nats::{ClassifyReply, ClassifyRequest, ConnectionStatus, NatsClient};
pub use peer::{
    EngineEvent, LinkState, PeerConnection, PeerConnector, PeerLinkHandle, PeerLinkSupervisor, WebRtcConnector,
};
pub use records::{InMemoryRecords, SessionRecords};
pub use room::{JoinRequest, RoomDeps, RoomHandle, RoomSnapshot, SessionRoom, SessionSyncCoordinator};
pub use session::{
    Analysis, CapturePhase, CaptureSample, GatePolicy, Prompt, PromptId, Role, Session, SessionStatus,
    SessionTimeline, SyncMachine, SyncState,
};
pub use signaling::{
    ChannelState, ChannelStatus, EventKind, Inbound, LocalRelay, NatsRelay, Relay, RelayLink, SignalEvent,
    SignalingChannel, Subscription,
};
