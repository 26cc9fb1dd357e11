use crate::error::MediaError;

/// Local media track kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

/// One camera frame, JPEG-encoded
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub jpeg: Vec<u8>,
    /// Milliseconds since the stream was acquired
    pub timestamp_ms: u64,
}

/// What to ask the device provider for
#[derive(Debug, Clone)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
    pub width: u32,
    pub height: u32,
}

impl MediaConstraints {
    /// Camera only, as used for sampling during a capture window
    pub fn camera_only() -> Self {
        Self {
            audio: false,
            ..Self::default()
        }
    }
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
            width: 640,
            height: 480,
        }
    }
}

/// Camera/microphone provider
///
/// Implementations:
/// - File: still images from a directory (development, batch runs)
/// - Test doubles in `tests/common`
#[async_trait::async_trait]
pub trait MediaDevices: Send + Sync {
    /// Acquire a stream; `DeviceDenied` is final and must not be retried
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<Box<dyn MediaStream>, MediaError>;

    /// Speak `text` to the local participant. Best-effort.
    async fn speak(&self, text: &str);

    /// Provider name for logging
    fn name(&self) -> &str;
}

/// An acquired camera/microphone stream
#[async_trait::async_trait]
pub trait MediaStream: Send {
    /// Grab the current video frame
    async fn grab_frame(&mut self) -> Result<VideoFrame, MediaError>;

    /// Enable or disable a track; returns false if the stream has no such track
    fn set_track_enabled(&mut self, kind: TrackKind, enabled: bool) -> bool;

    fn is_track_enabled(&self, kind: TrackKind) -> bool;

    /// Close device handles
    fn release(&mut self);
}

/// Scoped ownership of a media stream.
///
/// The stream is released exactly once: either through [`MediaLease::release`]
/// or when the lease is dropped, whichever comes first.
pub struct MediaLease {
    stream: Option<Box<dyn MediaStream>>,
}

impl MediaLease {
    pub fn new(stream: Box<dyn MediaStream>) -> Self {
        Self { stream: Some(stream) }
    }

    pub async fn grab_frame(&mut self) -> Result<VideoFrame, MediaError> {
        match self.stream.as_mut() {
            Some(stream) => stream.grab_frame().await,
            None => Err(MediaError::Unavailable("stream released".to_string())),
        }
    }

    pub fn set_track_enabled(&mut self, kind: TrackKind, enabled: bool) -> bool {
        self.stream
            .as_mut()
            .map_or(false, |stream| stream.set_track_enabled(kind, enabled))
    }

    pub fn is_track_enabled(&self, kind: TrackKind) -> bool {
        self.stream.as_ref().map_or(false, |stream| stream.is_track_enabled(kind))
    }

    pub fn release(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.release();
        }
    }
}

impl Drop for MediaLease {
    fn drop(&mut self) {
        self.release();
    }
}
