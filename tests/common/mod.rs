// Shared fakes for the integration tests: media devices, a scripted
// classifier and a peer engine driven by the test.
#![allow(dead_code)]

use anyhow::Result;
use loqa_rooms::{
    Classification, Config, EmotionClassifier, EngineEvent, GatePolicy, InMemoryRecords, JoinRequest, LocalRelay,
    MediaConstraints, MediaDevices, MediaError, MediaStream, PeerConnection, PeerConnector, Role, RoomDeps,
    RoomHandle, SessionRecords, SessionRoom, TrackKind, VideoFrame,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub const SESSION_ID: &str = "s-1";
pub const SESSION_CODE: &str = "ROOM1";

// ============================================================================
// Media
// ============================================================================

/// Media provider counting every acquire and release
#[derive(Default)]
pub struct FakeMedia {
    deny: AtomicBool,
    acquire_delay: Option<Duration>,
    acquired: AtomicUsize,
    released: Arc<AtomicUsize>,
    spoken: Mutex<Vec<String>>,
}

impl FakeMedia {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Provider whose camera access is always refused
    pub fn denying() -> Arc<Self> {
        let media = Self::default();
        media.deny.store(true, Ordering::SeqCst);
        Arc::new(media)
    }

    /// Provider that takes `delay` to hand out a stream
    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            acquire_delay: Some(delay),
            ..Self::default()
        })
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl MediaDevices for FakeMedia {
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<Box<dyn MediaStream>, MediaError> {
        if let Some(delay) = self.acquire_delay {
            tokio::time::sleep(delay).await;
        }
        if self.deny.load(Ordering::SeqCst) {
            return Err(MediaError::DeviceDenied("camera blocked by user".to_string()));
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeStream {
            released: Arc::clone(&self.released),
            done: false,
            audio: constraints.audio,
            video: constraints.video,
            has_audio: constraints.audio,
            frames: 0,
        }))
    }

    async fn speak(&self, text: &str) {
        self.spoken.lock().unwrap().push(text.to_string());
    }

    fn name(&self) -> &str {
        "fake"
    }
}

struct FakeStream {
    released: Arc<AtomicUsize>,
    done: bool,
    audio: bool,
    video: bool,
    has_audio: bool,
    frames: u64,
}

#[async_trait::async_trait]
impl MediaStream for FakeStream {
    async fn grab_frame(&mut self) -> Result<VideoFrame, MediaError> {
        self.frames += 1;
        Ok(VideoFrame {
            jpeg: vec![0xFF, 0xD8, 0xFF, 0xD9],
            timestamp_ms: self.frames * 1000,
        })
    }

    fn set_track_enabled(&mut self, kind: TrackKind, enabled: bool) -> bool {
        match kind {
            TrackKind::Audio if self.has_audio => {
                self.audio = enabled;
                true
            }
            TrackKind::Audio => false,
            TrackKind::Video => {
                self.video = enabled;
                true
            }
        }
    }

    fn is_track_enabled(&self, kind: TrackKind) -> bool {
        match kind {
            TrackKind::Audio => self.audio,
            TrackKind::Video => self.video,
        }
    }

    fn release(&mut self) {
        assert!(!self.done, "stream released twice");
        self.done = true;
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Classifier
// ============================================================================

/// Classifier replaying a script; `None` entries fail that frame.
/// Once the script runs out every frame is `fallback`.
pub struct ScriptedClassifier {
    script: Mutex<VecDeque<Option<(String, f32)>>>,
    fallback: Option<(String, f32)>,
    calls: AtomicUsize,
}

impl ScriptedClassifier {
    pub fn new(script: Vec<Option<(&str, f32)>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(
                script
                    .into_iter()
                    .map(|entry| entry.map(|(label, confidence)| (label.to_string(), confidence)))
                    .collect(),
            ),
            fallback: Some(("Happy".to_string(), 0.9)),
            calls: AtomicUsize::new(0),
        })
    }

    /// Every frame classifies as Happy/0.9
    pub fn happy() -> Arc<Self> {
        Self::new(Vec::new())
    }

    /// Every frame fails
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            fallback: None,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl EmotionClassifier for ScriptedClassifier {
    async fn classify(&self, _frame: &VideoFrame) -> Result<Classification> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        let verdict = match next {
            Some(entry) => entry,
            None => self.fallback.clone(),
        };
        match verdict {
            Some((label, confidence)) => Ok(Classification { label, confidence }),
            None => anyhow::bail!("classifier unavailable"),
        }
    }
}

// ============================================================================
// Peer engine
// ============================================================================

/// Peer connector whose engine events are pushed by the test
#[derive(Default)]
pub struct FakeConnector {
    events: Mutex<Option<mpsc::UnboundedSender<EngineEvent>>>,
    log: Arc<Mutex<Vec<String>>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Report an engine event to the supervisor
    pub fn emit(&self, event: EngineEvent) {
        if let Some(events) = self.events.lock().unwrap().as_ref() {
            let _ = events.send(event);
        }
    }

    /// Calls made on the connection, in order
    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.log().iter().filter(|entry| entry.as_str() == call).count()
    }
}

#[async_trait::async_trait]
impl PeerConnector for FakeConnector {
    async fn open(&self) -> Result<(Box<dyn PeerConnection>, mpsc::UnboundedReceiver<EngineEvent>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.events.lock().unwrap() = Some(tx);
        Ok((
            Box::new(FakeConnection {
                log: Arc::clone(&self.log),
            }),
            rx,
        ))
    }

    fn name(&self) -> &str {
        "fake"
    }
}

struct FakeConnection {
    log: Arc<Mutex<Vec<String>>>,
}

impl FakeConnection {
    fn record(&self, call: &str) {
        self.log.lock().unwrap().push(call.to_string());
    }
}

#[async_trait::async_trait]
impl PeerConnection for FakeConnection {
    async fn create_offer(&mut self, ice_restart: bool) -> Result<String> {
        self.record(if ice_restart { "offer:restart" } else { "offer" });
        Ok("v=0 offer".to_string())
    }

    async fn accept_offer(&mut self, _sdp: &str) -> Result<String> {
        self.record("accept-offer");
        Ok("v=0 answer".to_string())
    }

    async fn accept_answer(&mut self, _sdp: &str) -> Result<()> {
        self.record("accept-answer");
        Ok(())
    }

    async fn add_remote_candidate(&mut self, _candidate: serde_json::Value) -> Result<()> {
        self.record("candidate");
        Ok(())
    }

    async fn restart_ice(&mut self) {
        self.record("restart-ice");
    }

    async fn close(&mut self) {
        self.record("close");
    }
}

// ============================================================================
// Rooms
// ============================================================================

pub fn test_config(policy: GatePolicy) -> Config {
    let mut config = Config::default();
    config.capture.gate_policy = policy;
    config
}

/// Record store holding session `s-1` / `ROOM1` with the given prompts
pub async fn seeded_records(prompts: &[&str]) -> Arc<InMemoryRecords> {
    let records = Arc::new(InMemoryRecords::new());
    records.create_session(SESSION_ID, SESSION_CODE, "dr-lee").await;
    for text in prompts {
        records.append_prompt(SESSION_ID, text).await.unwrap();
    }
    records
}

pub fn room_deps(
    records: Arc<InMemoryRecords>,
    relay: Arc<LocalRelay>,
    media: Arc<FakeMedia>,
    classifier: Arc<ScriptedClassifier>,
    config: Config,
) -> RoomDeps {
    let records: Arc<dyn SessionRecords> = records;
    RoomDeps {
        records,
        classifier,
        media,
        relay,
        peer: None,
        config: Arc::new(config),
    }
}

pub async fn join(deps: &RoomDeps, role: Role, name: &str) -> RoomHandle {
    SessionRoom::open(
        deps.clone(),
        JoinRequest {
            session_id: SESSION_ID.to_string(),
            session_code: SESSION_CODE.to_string(),
            role,
            name: name.to_string(),
        },
    )
    .await
    .unwrap()
}

/// Let every task run until all of them are waiting on a timer
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}
