use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{error, info, warn};

use super::coordinator::{RoomSnapshot, SessionSyncCoordinator};
use crate::capture::{CaptureWindow, EmotionClassifier};
use crate::config::Config;
use crate::error::{SyncError, SyncResult};
use crate::media::{MediaDevices, TrackKind};
use crate::peer::{PeerConnector, PeerLinkSupervisor};
use crate::records::SessionRecords;
use crate::session::{CaptureSample, Prompt, Role, SessionTimeline, SyncMachine, SyncState};
use crate::signaling::{ChannelState, EventKind, Relay, SignalingChannel, Subscription};

const COMMAND_BUFFER: usize = 32;

/// Collaborators shared by every room this process opens
#[derive(Clone)]
pub struct RoomDeps {
    pub records: Arc<dyn SessionRecords>,
    pub classifier: Arc<dyn EmotionClassifier>,
    pub media: Arc<dyn MediaDevices>,
    pub relay: Arc<dyn Relay>,
    /// `None` runs the room without a peer media link
    pub peer: Option<Arc<dyn PeerConnector>>,
    pub config: Arc<Config>,
}

/// Who is joining which session
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub session_id: String,
    pub session_code: String,
    pub role: Role,
    pub name: String,
}

type Reply<T> = oneshot::Sender<SyncResult<T>>;

enum RoomCommand {
    Advance(Reply<SyncState>),
    Retreat(Reply<SyncState>),
    AddPrompt { text: String, reply: Reply<Prompt> },
    BeginCapture { duration_seconds: Option<u32>, reply: Reply<SyncState> },
    StopCapture(Reply<SyncState>),
    EndCapture { samples: Vec<CaptureSample>, duration_secs: u32, reply: Reply<SyncState> },
    SetResponse { text: String, reply: Reply<()> },
    SetTrack { kind: TrackKind, enabled: bool, reply: Reply<bool> },
    Complete { notes: Option<String>, reply: Reply<SyncState> },
    Resync(Reply<SyncState>),
    Snapshot(oneshot::Sender<RoomSnapshot>),
    Timeline(oneshot::Sender<SessionTimeline>),
    Leave(oneshot::Sender<()>),
}

/// Cloneable handle to a running [`SessionRoom`]
#[derive(Clone)]
pub struct RoomHandle {
    session_code: String,
    role: Role,
    commands: mpsc::Sender<RoomCommand>,
}

impl RoomHandle {
    pub fn session_code(&self) -> &str {
        &self.session_code
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    pub async fn advance_prompt(&self) -> SyncResult<SyncState> {
        self.request(RoomCommand::Advance).await
    }

    pub async fn retreat_prompt(&self) -> SyncResult<SyncState> {
        self.request(RoomCommand::Retreat).await
    }

    pub async fn add_prompt(&self, text: impl Into<String>) -> SyncResult<Prompt> {
        let text = text.into();
        self.request(|reply| RoomCommand::AddPrompt { text, reply }).await
    }

    pub async fn begin_capture(&self, duration_seconds: Option<u32>) -> SyncResult<SyncState> {
        self.request(|reply| RoomCommand::BeginCapture { duration_seconds, reply })
            .await
    }

    pub async fn stop_capture(&self) -> SyncResult<SyncState> {
        self.request(RoomCommand::StopCapture).await
    }

    pub async fn end_capture(&self, samples: Vec<CaptureSample>, duration_secs: u32) -> SyncResult<SyncState> {
        self.request(|reply| RoomCommand::EndCapture {
            samples,
            duration_secs,
            reply,
        })
        .await
    }

    pub async fn set_response(&self, text: impl Into<String>) -> SyncResult<()> {
        let text = text.into();
        self.request(|reply| RoomCommand::SetResponse { text, reply }).await
    }

    pub async fn set_track_enabled(&self, kind: TrackKind, enabled: bool) -> SyncResult<bool> {
        self.request(|reply| RoomCommand::SetTrack { kind, enabled, reply })
            .await
    }

    pub async fn complete_session(&self, notes: Option<String>) -> SyncResult<SyncState> {
        self.request(|reply| RoomCommand::Complete { notes, reply }).await
    }

    pub async fn resync(&self) -> SyncResult<SyncState> {
        self.request(RoomCommand::Resync).await
    }

    pub async fn snapshot(&self) -> SyncResult<RoomSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(RoomCommand::Snapshot(reply)).await?;
        rx.await.map_err(|_| SyncError::RoomClosed)
    }

    pub async fn timeline(&self) -> SyncResult<SessionTimeline> {
        let (reply, rx) = oneshot::channel();
        self.send(RoomCommand::Timeline(reply)).await?;
        rx.await.map_err(|_| SyncError::RoomClosed)
    }

    /// Tear the room down: stop capture, close the peer link, leave the channel
    pub async fn leave(&self) -> SyncResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(RoomCommand::Leave(reply)).await?;
        rx.await.map_err(|_| SyncError::RoomClosed)
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> RoomCommand) -> SyncResult<T> {
        let (reply, rx) = oneshot::channel();
        self.send(command(reply)).await?;
        rx.await.map_err(|_| SyncError::RoomClosed)?
    }

    async fn send(&self, command: RoomCommand) -> SyncResult<()> {
        self.commands.send(command).await.map_err(|_| SyncError::RoomClosed)
    }
}

/// Event loop owning one participant's coordinator.
///
/// Commands from the control API, inbound signaling, channel-state changes,
/// capture output and the two capture timers are all handled on this one
/// task, so no handler ever runs concurrently with another.
pub struct SessionRoom {
    coordinator: SessionSyncCoordinator,
    commands: mpsc::Receiver<RoomCommand>,
    subscription: Subscription,
    channel_state: watch::Receiver<ChannelState>,
}

impl SessionRoom {
    /// Fetch the session, join its channel and start the room loop
    pub async fn open(deps: RoomDeps, request: JoinRequest) -> SyncResult<RoomHandle> {
        let JoinRequest {
            session_id,
            session_code,
            role,
            name,
        } = request;
        let config = Arc::clone(&deps.config);

        let session = deps.records.fetch_session(&session_id).await?;
        if session.code != session_code {
            warn!(
                "Session {} has code {}, joining requested code {}",
                session_id, session.code, session_code
            );
        }

        let channel = Arc::new(
            SignalingChannel::connect(
                Arc::clone(&deps.relay),
                config.signaling.clone(),
                &session_code,
                role,
                &name,
            )
            .await?,
        );
        let subscription = channel.subscribe(EventKind::SESSION);
        let channel_state = channel.state();

        let machine = SyncMachine::new(session, config.capture.gate_policy);
        let capture = CaptureWindow::new(
            Arc::clone(&deps.media),
            Arc::clone(&deps.classifier),
            config.capture.sample_interval(),
        );
        let mut coordinator = SessionSyncCoordinator::new(
            machine,
            role,
            name.clone(),
            Arc::clone(&deps.records),
            Arc::clone(&channel),
            Arc::clone(&deps.media),
            capture,
            config.capture.clone(),
        );

        match &deps.peer {
            Some(connector) => {
                match PeerLinkSupervisor::spawn(
                    role,
                    config.peer.clone(),
                    Arc::clone(connector),
                    Arc::clone(&deps.media),
                    Arc::clone(&channel),
                )
                .await
                {
                    Ok(peer) => coordinator.attach_peer(peer),
                    Err(e) => {
                        error!("Peer link unavailable for {}: {}", name, e);
                        coordinator.set_last_error(e.to_string());
                    }
                }
            }
            None => info!("Peer link disabled for room {}", session_code),
        }

        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let room = SessionRoom {
            coordinator,
            commands: commands_rx,
            subscription,
            channel_state,
        };

        info!("{} joined room {} as {}", name, session_code, role.as_str());
        tokio::spawn(room.run());

        Ok(RoomHandle {
            session_code,
            role,
            commands: commands_tx,
        })
    }

    async fn run(mut self) {
        loop {
            let capture_deadline = self.coordinator.capture_deadline();
            let analysis_deadline = self.coordinator.analysis_deadline();
            let capturing = self.coordinator.capture_active();

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(RoomCommand::Leave(reply)) => {
                        self.coordinator.leave().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.coordinator.leave().await;
                        break;
                    }
                },
                inbound = self.subscription.recv() => {
                    if let Some(inbound) = inbound {
                        self.coordinator.handle_inbound(inbound).await;
                    }
                }
                changed = self.channel_state.changed() => {
                    if changed.is_ok() {
                        let state = *self.channel_state.borrow_and_update();
                        self.coordinator.on_channel_state(state).await;
                    }
                }
                event = self.coordinator.next_capture_event(), if capturing => {
                    if let Some(event) = event {
                        self.coordinator.handle_capture_event(event).await;
                    }
                }
                _ = sleep_until(capture_deadline), if capture_deadline.is_some() => {
                    self.coordinator.on_capture_deadline().await;
                }
                _ = sleep_until(analysis_deadline), if analysis_deadline.is_some() => {
                    self.coordinator.on_analysis_deadline().await;
                }
            }
        }

        info!("Room loop for {:?} stopped", self.coordinator.role());
    }

    async fn handle_command(&mut self, command: RoomCommand) {
        let coordinator = &mut self.coordinator;
        match command {
            RoomCommand::Advance(reply) => {
                let _ = reply.send(coordinator.advance_prompt().await);
            }
            RoomCommand::Retreat(reply) => {
                let _ = reply.send(coordinator.retreat_prompt().await);
            }
            RoomCommand::AddPrompt { text, reply } => {
                let _ = reply.send(coordinator.add_prompt(&text).await);
            }
            RoomCommand::BeginCapture { duration_seconds, reply } => {
                let _ = reply.send(coordinator.begin_capture(duration_seconds).await);
            }
            RoomCommand::StopCapture(reply) => {
                let _ = reply.send(coordinator.stop_capture().await);
            }
            RoomCommand::EndCapture {
                samples,
                duration_secs,
                reply,
            } => {
                let _ = reply.send(coordinator.end_capture(samples, duration_secs).await);
            }
            RoomCommand::SetResponse { text, reply } => {
                let _ = reply.send(coordinator.set_response(&text));
            }
            RoomCommand::SetTrack { kind, enabled, reply } => {
                let _ = reply.send(Ok(coordinator.set_track_enabled(kind, enabled).await));
            }
            RoomCommand::Complete { notes, reply } => {
                let _ = reply.send(coordinator.complete_session(notes.as_deref()).await);
            }
            RoomCommand::Resync(reply) => {
                let _ = reply.send(coordinator.resync().await);
            }
            RoomCommand::Snapshot(reply) => {
                let _ = reply.send(coordinator.snapshot());
            }
            RoomCommand::Timeline(reply) => {
                let _ = reply.send(coordinator.timeline());
            }
            RoomCommand::Leave(reply) => {
                coordinator.leave().await;
                let _ = reply.send(());
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
