use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::capture::{CaptureEvent, CaptureWindow};
use crate::config::CaptureConfig;
use crate::error::{CaptureError, Rejection, RecordsError, SyncResult};
use crate::media::{MediaDevices, TrackKind};
use crate::peer::{LinkState, PeerLinkHandle};
use crate::records::SessionRecords;
use crate::session::{
    Analysis, Applied, CaptureSample, ParticipantPresence, Prompt, Role, SessionStatus,
    SessionTimeline, SyncMachine, SyncState,
};
use crate::signaling::{ChannelState, ChannelStatus, Inbound, PromptSummary, SignalEvent, SignalingChannel};

/// What the control API shows for one room
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub session_id: String,
    pub session_code: String,
    pub role: Role,
    pub name: String,
    pub status: SessionStatus,
    pub state: SyncState,
    pub prompts: Vec<Prompt>,
    pub capture_progress: f32,
    pub live_samples: Vec<CaptureSample>,
    pub peer: Option<ParticipantPresence>,
    pub link: Option<LinkState>,
    pub audio_enabled: bool,
    pub video_enabled: bool,
    pub last_error: Option<String>,
}

/// Keeps one participant's view of the session in step with the other's.
///
/// Every local operation checks its precondition on the [`SyncMachine`],
/// applies the event it is about to broadcast, then broadcasts it. Inbound
/// events take the same `apply` path, so both sides replay identical
/// transitions. The record service stays the source of truth: the mirror is
/// re-read after every reconnect and whenever a commit loses a race.
pub struct SessionSyncCoordinator {
    machine: SyncMachine,
    role: Role,
    name: String,
    records: Arc<dyn SessionRecords>,
    channel: Arc<SignalingChannel>,
    media: Arc<dyn MediaDevices>,
    capture: CaptureWindow,
    capture_config: CaptureConfig,
    peer: Option<PeerLinkHandle>,

    /// Samples relayed by the responder during the open window (conductor side)
    live_samples: Vec<CaptureSample>,
    /// Free-text response attached to the next analysis (responder side)
    staged_response: Option<String>,
    /// Duration of the open window
    capture_duration: u32,
    capture_deadline: Option<Instant>,
    analysis_deadline: Option<Instant>,

    presence: Option<ParticipantPresence>,
    audio_enabled: bool,
    video_enabled: bool,
    channel_epoch: u32,
    last_error: Option<String>,
    closed: bool,
}

impl SessionSyncCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        machine: SyncMachine,
        role: Role,
        name: impl Into<String>,
        records: Arc<dyn SessionRecords>,
        channel: Arc<SignalingChannel>,
        media: Arc<dyn MediaDevices>,
        capture: CaptureWindow,
        capture_config: CaptureConfig,
    ) -> Self {
        let mut machine = machine;
        let channel_state = *channel.state().borrow();
        machine.set_channel_status(channel_state.status);

        Self {
            machine,
            role,
            name: name.into(),
            records,
            channel,
            media,
            capture,
            capture_config,
            peer: None,
            live_samples: Vec::new(),
            staged_response: None,
            capture_duration: 0,
            capture_deadline: None,
            analysis_deadline: None,
            presence: None,
            audio_enabled: true,
            video_enabled: true,
            channel_epoch: channel_state.epoch,
            last_error: None,
            closed: false,
        }
    }

    /// Hand over the peer link so toggles and teardown reach it
    pub fn attach_peer(&mut self, peer: PeerLinkHandle) {
        self.peer = Some(peer);
    }

    pub fn set_last_error(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
    }

    pub fn state(&self) -> &SyncState {
        self.machine.state()
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn capture_active(&self) -> bool {
        self.capture.is_active()
    }

    pub fn capture_deadline(&self) -> Option<Instant> {
        self.capture_deadline
    }

    pub fn analysis_deadline(&self) -> Option<Instant> {
        self.analysis_deadline
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        let session = self.machine.session();
        RoomSnapshot {
            session_id: session.id.clone(),
            session_code: session.code.clone(),
            role: self.role,
            name: self.name.clone(),
            status: session.status,
            state: self.machine.state().clone(),
            prompts: session.prompts.clone(),
            capture_progress: self.capture.progress(),
            live_samples: self.live_samples.clone(),
            peer: self.presence.clone().map(|mut presence| {
                if let Some(peer) = &self.peer {
                    presence.link = peer.state();
                }
                presence
            }),
            link: self.peer.as_ref().map(|peer| peer.state()),
            audio_enabled: self.audio_enabled,
            video_enabled: self.video_enabled,
            last_error: self.last_error.clone(),
        }
    }

    pub fn timeline(&self) -> SessionTimeline {
        SessionTimeline::from_session(self.machine.session())
    }

    // ------------------------------------------------------------------
    // Local operations
    // ------------------------------------------------------------------

    pub async fn advance_prompt(&mut self) -> SyncResult<SyncState> {
        let index = self.machine.check_advance()?;
        self.transition(SignalEvent::PromptIndexChanged { index }).await;
        info!("Advanced to prompt {}", index);
        Ok(self.machine.state().clone())
    }

    pub async fn retreat_prompt(&mut self) -> SyncResult<SyncState> {
        let index = self.machine.check_retreat()?;
        self.transition(SignalEvent::PromptIndexChanged { index }).await;
        info!("Went back to prompt {}", index);
        Ok(self.machine.state().clone())
    }

    pub async fn add_prompt(&mut self, text: &str) -> SyncResult<Prompt> {
        self.require(Role::Conductor)?;
        self.machine.check_add_prompt(text)?;

        let session_id = self.machine.session().id.clone();
        let prompt = self.records.append_prompt(&session_id, text).await?;
        info!("Added prompt {} at position {}", prompt.id, prompt.position);

        self.transition(SignalEvent::PromptAdded {
            prompt: PromptSummary::from(&prompt),
        })
        .await;
        Ok(prompt)
    }

    pub async fn begin_capture(&mut self, duration_seconds: Option<u32>) -> SyncResult<SyncState> {
        self.require(Role::Conductor)?;
        let prompt_id = self.machine.check_begin_capture()?;
        let duration = duration_seconds.unwrap_or(self.capture_config.default_duration_secs);

        self.live_samples.clear();
        self.capture_duration = duration;
        self.analysis_deadline = None;

        self.transition(SignalEvent::CaptureStarted {
            prompt_id,
            duration_seconds: duration,
        })
        .await;
        self.capture_deadline = Some(Instant::now() + Duration::from_secs(u64::from(duration)));

        info!("Capture window opened on prompt {} for {}s", prompt_id, duration);
        Ok(self.machine.state().clone())
    }

    /// Close the open window early.
    ///
    /// The conductor tells the responder to stop and waits for its analysis;
    /// the responder closes its own window and commits right away.
    pub async fn stop_capture(&mut self) -> SyncResult<SyncState> {
        let prompt_id = self.machine.check_end_capture()?;
        self.capture_deadline = None;

        match self.role {
            Role::Conductor => {
                self.broadcast(SignalEvent::CaptureStopped { prompt_id }).await;
                self.analysis_deadline = Some(Instant::now() + self.capture_config.analysis_grace());
                info!("Stopped capture on prompt {}; waiting for analysis", prompt_id);
            }
            Role::Responder => {
                let outcome = self.capture.stop().await.unwrap_or_default();
                self.end_capture(outcome.samples, outcome.duration_secs).await?;
            }
        }
        Ok(self.machine.state().clone())
    }

    /// Aggregate a closed window and commit it to the current prompt
    pub async fn end_capture(&mut self, samples: Vec<CaptureSample>, duration_secs: u32) -> SyncResult<SyncState> {
        let prompt_id = self.machine.check_end_capture()?;
        let session_id = self.machine.session().id.clone();
        let analysis = Analysis::aggregate(&samples, duration_secs, self.staged_response.take());

        let committed = match self.records.commit_analysis(&session_id, prompt_id, &analysis).await {
            Ok(committed) => committed,
            Err(RecordsError::AnalysisExists(_)) => {
                info!("Prompt {} already has an analysis; adopting the stored one", prompt_id);
                self.analysis_deadline = None;
                self.resync().await?;
                return Ok(self.machine.state().clone());
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            "Committed analysis for prompt {}: {} samples, dominant {:?}",
            prompt_id, committed.sample_count, committed.dominant_label
        );

        self.analysis_deadline = None;
        self.live_samples.clear();
        self.transition(SignalEvent::CaptureCompleted {
            prompt_id,
            analysis: committed,
        })
        .await;
        Ok(self.machine.state().clone())
    }

    /// Stage a free-text response for the open window
    pub fn set_response(&mut self, text: &str) -> SyncResult<()> {
        self.require(Role::Responder)?;
        if !self.machine.is_capturing() {
            return Err(Rejection::NotCapturing.into());
        }
        self.staged_response = Some(text.to_string());
        Ok(())
    }

    pub async fn complete_session(&mut self, notes: Option<&str>) -> SyncResult<SyncState> {
        self.require(Role::Conductor)?;
        if self.machine.session().is_completed() {
            return Err(Rejection::SessionCompleted.into());
        }

        let session_id = self.machine.session().id.clone();
        self.records.complete_session(&session_id, notes).await?;
        self.transition(SignalEvent::SessionCompleted).await;
        info!("Session {} completed", session_id);

        self.shutdown().await;
        Ok(self.machine.state().clone())
    }

    /// Toggle a local track; the peer link is never renegotiated
    pub async fn set_track_enabled(&mut self, kind: TrackKind, enabled: bool) -> bool {
        match kind {
            TrackKind::Audio => self.audio_enabled = enabled,
            TrackKind::Video => self.video_enabled = enabled,
        }
        match &self.peer {
            Some(peer) => peer.set_track_enabled(kind, enabled).await,
            None => true,
        }
    }

    /// Re-read the session from the record service
    pub async fn resync(&mut self) -> SyncResult<SyncState> {
        let session_id = self.machine.session().id.clone();
        let fresh = self.records.fetch_session(&session_id).await?;
        let previous = self.machine.state().current_prompt_index;

        self.machine.resync(fresh);
        self.settle(previous);

        info!(
            "Resynchronized session {}: {} prompts, index {}",
            session_id,
            self.machine.prompt_count(),
            self.machine.state().current_prompt_index
        );
        Ok(self.machine.state().clone())
    }

    // ------------------------------------------------------------------
    // Inputs from the room loop
    // ------------------------------------------------------------------

    /// Apply an event received from the other participant
    pub async fn handle_inbound(&mut self, inbound: Inbound) {
        if self.closed {
            return;
        }

        match &inbound.event {
            SignalEvent::Join { name, role, .. } => {
                self.on_peer_joined(name, *role).await;
                return;
            }
            SignalEvent::Leave { name } => {
                if let Some(presence) = self.presence.as_mut() {
                    presence.joined = false;
                    presence.channel = ChannelStatus::Disconnected;
                }
                info!("{} left the room", name);
                if self.role.is_conductor() {
                    self.broadcast(SignalEvent::RosterUpdate { count: self.roster_count() }).await;
                }
                return;
            }
            SignalEvent::RosterUpdate { count } => {
                debug!("Roster now has {} participants", count);
                return;
            }
            SignalEvent::LiveSample { label, confidence } => {
                if self.role.is_conductor() && self.machine.is_capturing() {
                    self.live_samples.push(CaptureSample::new(label.clone(), *confidence));
                }
                return;
            }
            SignalEvent::CaptureStopped { prompt_id } => {
                self.on_stop_requested(*prompt_id).await;
                return;
            }
            SignalEvent::SessionState { count, .. } if *count > self.machine.prompt_count() => {
                // The snapshot references prompts we never saw
                if let Err(e) = self.resync().await {
                    warn!("Resync before applying session state failed: {}", e);
                }
            }
            _ => {}
        }

        let previous = self.machine.state().current_prompt_index;
        let was_capturing = self.machine.is_capturing();
        let applied = self.machine.apply(&inbound.event);
        self.settle(previous);

        match inbound.event {
            SignalEvent::PromptAdded { prompt } if applied == Applied::Changed => {
                if !self.role.is_conductor() {
                    self.media.speak(&prompt.text).await;
                }
            }
            SignalEvent::CaptureStarted { duration_seconds, .. } => {
                if !was_capturing && self.machine.is_capturing() {
                    self.capture_duration = duration_seconds;
                    self.open_window(duration_seconds).await;
                }
            }
            SignalEvent::SessionState {
                capturing: true,
                remaining_seconds,
                ..
            } => {
                // Joined mid-window: only capture for what is left of it
                if self.machine.is_capturing() && !self.capture.is_active() && remaining_seconds > 0 {
                    self.capture_duration = remaining_seconds;
                    self.open_window(remaining_seconds).await;
                }
            }
            SignalEvent::CaptureCompleted { prompt_id, .. } => {
                if self.role.is_conductor() {
                    self.analysis_deadline = None;
                    self.live_samples.clear();
                }
                debug!("Analysis for prompt {} received", prompt_id);
            }
            SignalEvent::SessionCompleted => {
                info!("Conductor completed the session");
                self.shutdown().await;
            }
            _ => {}
        }
    }

    /// Output of the local capture window
    pub async fn handle_capture_event(&mut self, event: CaptureEvent) {
        match event {
            CaptureEvent::Sample(sample) => {
                self.broadcast(SignalEvent::LiveSample {
                    label: sample.label,
                    confidence: sample.confidence,
                })
                .await;
            }
            CaptureEvent::Finished(outcome) => {
                if !self.machine.is_capturing() {
                    debug!("Capture window finished after the prompt moved on");
                    return;
                }
                if let Err(e) = self.end_capture(outcome.samples, outcome.duration_secs).await {
                    error!("Failed to commit analysis: {}", e);
                    self.last_error = Some(e.to_string());
                }
            }
        }
    }

    /// Next output of the local capture window, if one is open
    pub async fn next_capture_event(&mut self) -> Option<CaptureEvent> {
        self.capture.next_event().await
    }

    /// The conductor's own countdown for the open window ran out
    pub async fn on_capture_deadline(&mut self) {
        self.capture_deadline = None;
        if !self.machine.is_capturing() {
            return;
        }
        if let Err(e) = self.stop_capture().await {
            warn!("Failed to stop capture at deadline: {}", e);
        }
    }

    /// No analysis arrived in time after a stop: resync, then commit our own
    pub async fn on_analysis_deadline(&mut self) {
        self.analysis_deadline = None;

        if let Err(e) = self.resync().await {
            warn!("Resync after missing analysis failed: {}", e);
        }
        if !self.machine.is_capturing() {
            return;
        }

        let samples = std::mem::take(&mut self.live_samples);
        warn!(
            "No analysis arrived within grace period; committing {} live samples",
            samples.len()
        );
        if let Err(e) = self.end_capture(samples, self.capture_duration).await {
            error!("Fallback analysis commit failed: {}", e);
            self.last_error = Some(e.to_string());
        }
    }

    pub async fn on_channel_state(&mut self, state: ChannelState) {
        if self.closed {
            return;
        }
        self.machine.set_channel_status(state.status);

        if state.status == ChannelStatus::Connected && state.epoch > self.channel_epoch {
            let reconnected = self.channel_epoch > 0;
            self.channel_epoch = state.epoch;
            if reconnected {
                info!("Signaling channel reconnected (epoch {}); resyncing", state.epoch);
                if let Err(e) = self.resync().await {
                    warn!("Resync after reconnect failed: {}", e);
                }
            }
        }

        if state.terminal {
            error!("Signaling channel is down for good");
            self.last_error = Some("signaling channel disconnected".to_string());
        }
    }

    /// Stop capture, close the peer link and leave the channel
    pub async fn leave(&mut self) {
        self.shutdown().await;
        self.channel.disconnect().await;
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn on_peer_joined(&mut self, name: &str, role: Role) {
        let presence = ParticipantPresence::joined(name, role);
        self.presence = Some(presence);
        if !role.is_conductor() {
            self.machine.set_responder(name);
        }
        self.machine.activate();

        if self.role.is_conductor() {
            let state = self.machine.state();
            let snapshot = SignalEvent::SessionState {
                index: state.current_prompt_index,
                capturing: self.machine.is_capturing(),
                count: self.machine.prompt_count(),
                remaining_seconds: self.remaining_capture_secs(),
            };
            self.broadcast(snapshot).await;
            self.broadcast(SignalEvent::RosterUpdate { count: self.roster_count() }).await;
        }
    }

    /// Ourselves plus the other participant while they are present
    fn roster_count(&self) -> usize {
        1 + self.presence.as_ref().map_or(0, |presence| usize::from(presence.joined))
    }

    /// Whole seconds left before the capture deadline, rounded up
    fn remaining_capture_secs(&self) -> u32 {
        self.capture_deadline.map_or(0, |deadline| {
            let remaining = deadline.saturating_duration_since(Instant::now());
            u32::try_from(remaining.as_millis().div_ceil(1000)).unwrap_or(u32::MAX)
        })
    }

    async fn on_stop_requested(&mut self, prompt_id: u64) {
        if self.role.is_conductor() || !self.capture.is_active() {
            return;
        }
        if self.machine.current_prompt().map(|p| p.id) != Some(prompt_id) {
            debug!("Ignoring stop for prompt {} that is not current", prompt_id);
            return;
        }

        info!("Conductor stopped the capture on prompt {}", prompt_id);
        let outcome = self.capture.stop().await.unwrap_or_default();
        if let Err(e) = self.end_capture(outcome.samples, outcome.duration_secs).await {
            error!("Failed to commit analysis after stop: {}", e);
            self.last_error = Some(e.to_string());
        }
    }

    async fn open_window(&mut self, duration_secs: u32) {
        if self.role.is_conductor() {
            return;
        }
        if self.capture.is_active() {
            warn!("Capture window already open");
            return;
        }
        self.capture.rearm();

        match self.capture.start(duration_secs).await {
            Ok(()) => {}
            Err(CaptureError::DeviceDenied(msg)) => {
                error!("Camera access denied; cannot capture: {}", msg);
                self.last_error = Some(format!("camera access denied: {}", msg));
            }
            Err(e) => {
                error!("Failed to open capture window: {}", e);
                self.last_error = Some(e.to_string());
            }
        }
    }

    /// Local side effects that follow a state change
    fn settle(&mut self, previous_index: usize) {
        if self.machine.state().current_prompt_index != previous_index {
            self.capture.rearm();
            self.live_samples.clear();
            self.staged_response = None;
            self.analysis_deadline = None;
        }
        if !self.machine.is_capturing() {
            self.capture_deadline = None;
            if self.capture.is_active() {
                self.capture.rearm();
            }
        }
    }

    async fn transition(&mut self, event: SignalEvent) {
        let previous = self.machine.state().current_prompt_index;
        self.machine.apply(&event);
        self.settle(previous);
        self.broadcast(event).await;
    }

    async fn broadcast(&self, event: SignalEvent) {
        let kind = event.kind();
        if let Err(e) = self.channel.send(event).await {
            warn!("Failed to broadcast {:?}: {}", kind, e);
        }
    }

    fn require(&self, role: Role) -> Result<(), Rejection> {
        match (self.role, role) {
            (Role::Conductor, Role::Conductor) | (Role::Responder, Role::Responder) => Ok(()),
            (_, Role::Conductor) => Err(Rejection::ConductorOnly),
            (_, Role::Responder) => Err(Rejection::ResponderOnly),
        }
    }

    async fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.capture.teardown();
        self.capture_deadline = None;
        self.analysis_deadline = None;
        if let Some(mut peer) = self.peer.take() {
            peer.shutdown().await;
        }
    }
}
