use thiserror::Error;

/// Why an operation was refused without touching state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("current prompt has no committed analysis")]
    GateClosed,
    #[error("already at the last prompt")]
    AtLastPrompt,
    #[error("already at the first prompt")]
    AtFirstPrompt,
    #[error("session has no prompts")]
    NoPrompts,
    #[error("only the conductor may do this")]
    ConductorOnly,
    #[error("only the responder may do this")]
    ResponderOnly,
    #[error("current prompt already has an analysis")]
    AnalysisExists,
    #[error("a capture window is already open")]
    CaptureInProgress,
    #[error("no capture window is open")]
    NotCapturing,
    #[error("session is completed")]
    SessionCompleted,
    #[error("prompt text is empty")]
    EmptyPrompt,
}

/// Errors surfaced by the session sync core.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Precondition failed; nothing was mutated.
    #[error("rejected: {0}")]
    Rejected(#[from] Rejection),

    #[error("session record service failed: {0}")]
    Records(#[from] RecordsError),

    #[error("capture failed: {0}")]
    Capture(#[from] CaptureError),

    #[error("signaling channel failed: {0}")]
    Channel(#[from] ChannelError),

    #[error("room is closed")]
    RoomClosed,
}

impl SyncError {
    pub fn is_rejection(&self) -> bool {
        matches!(self, SyncError::Rejected(_))
    }
}

/// Errors from the signaling channel handle.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("signaling channel is not connected")]
    NotConnected,
    #[error("signaling channel is closed")]
    Closed,
    #[error("relay failed: {0}")]
    Relay(#[from] anyhow::Error),
}

/// Errors from the session-record collaborator.
#[derive(Debug, Error)]
pub enum RecordsError {
    #[error("session {0} not found")]
    SessionNotFound(String),
    #[error("prompt {0} not found")]
    PromptNotFound(u64),
    #[error("prompt {0} already has an analysis")]
    AnalysisExists(u64),
    #[error("session {0} is completed")]
    SessionCompleted(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the media device provider.
#[derive(Debug, Error)]
pub enum MediaError {
    /// Camera/microphone access refused. Not retried.
    #[error("media device access denied: {0}")]
    DeviceDenied(String),
    #[error("media device unavailable: {0}")]
    Unavailable(String),
    #[error("failed to grab frame: {0}")]
    Frame(String),
}

/// Errors starting or running a capture window.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("media device access denied: {0}")]
    DeviceDenied(String),
    #[error("media device unavailable: {0}")]
    Unavailable(String),
    #[error("capture window is not idle")]
    NotIdle,
}

impl From<MediaError> for CaptureError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::DeviceDenied(msg) => CaptureError::DeviceDenied(msg),
            MediaError::Unavailable(msg) | MediaError::Frame(msg) => CaptureError::Unavailable(msg),
        }
    }
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;
