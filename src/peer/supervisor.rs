use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Sleep;
use tracing::{debug, error, info, warn};

use super::engine::{EngineEvent, LinkState, PeerConnection, PeerConnector};
use crate::config::PeerConfig;
use crate::error::MediaError;
use crate::media::{MediaConstraints, MediaDevices, MediaLease, TrackKind};
use crate::session::Role;
use crate::signaling::{EventKind, Inbound, SignalEvent, SignalingChannel, Subscription};

enum PeerCommand {
    SetTrack {
        kind: TrackKind,
        enabled: bool,
        reply: oneshot::Sender<bool>,
    },
    Shutdown,
}

type Timer = Option<Pin<Box<Sleep>>>;

/// Handle to a running [`PeerLinkSupervisor`]
pub struct PeerLinkHandle {
    commands: mpsc::UnboundedSender<PeerCommand>,
    state: watch::Receiver<LinkState>,
    restarts: watch::Receiver<u32>,
    task: Option<JoinHandle<()>>,
}

impl PeerLinkHandle {
    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.state.clone()
    }

    /// Renegotiations triggered so far
    pub fn restarts(&self) -> u32 {
        *self.restarts.borrow()
    }

    /// Toggle a local track; never renegotiates
    pub async fn set_track_enabled(&self, kind: TrackKind, enabled: bool) -> bool {
        let (reply, rx) = oneshot::channel();
        if self
            .commands
            .send(PeerCommand::SetTrack { kind, enabled, reply })
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Close the connection and release local media
    pub async fn shutdown(&mut self) {
        let _ = self.commands.send(PeerCommand::Shutdown);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("Peer link task panicked: {}", e);
            }
        }
    }
}

impl Drop for PeerLinkHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Owns the peer-to-peer media link.
///
/// The conductor initiates: once local media is ready it waits the settle
/// delay and sends an offer. `failed` restarts negotiation immediately;
/// `disconnected` restarts only if it lasts longer than the grace period.
pub struct PeerLinkSupervisor {
    role: Role,
    config: PeerConfig,
    channel: Arc<SignalingChannel>,
    connection: Box<dyn PeerConnection>,
    local_media: MediaLease,
    state: watch::Sender<LinkState>,
    restarts: watch::Sender<u32>,
}

impl PeerLinkSupervisor {
    /// Acquire local media, open a connection and start supervising it.
    ///
    /// Signals arriving while media and the connection are being set up are
    /// queued and handled once supervision starts.
    pub async fn spawn(
        role: Role,
        config: PeerConfig,
        connector: Arc<dyn PeerConnector>,
        media: Arc<dyn MediaDevices>,
        channel: Arc<SignalingChannel>,
    ) -> Result<PeerLinkHandle, MediaError> {
        let subscription = channel.subscribe(&[
            EventKind::PeerOffer,
            EventKind::PeerAnswer,
            EventKind::PeerCandidate,
            EventKind::Join,
        ]);

        let local_media = MediaLease::new(media.acquire(&MediaConstraints::default()).await?);
        let (connection, engine_events) = connector
            .open()
            .await
            .map_err(|e| MediaError::Unavailable(format!("{} connector: {}", connector.name(), e)))?;

        let (state_tx, state_rx) = watch::channel(LinkState::New);
        let (restarts_tx, restarts_rx) = watch::channel(0);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        let supervisor = Self {
            role,
            config,
            channel,
            connection,
            local_media,
            state: state_tx,
            restarts: restarts_tx,
        };

        info!("Peer link supervisor started as {}", role.as_str());
        let task = tokio::spawn(supervisor.run(subscription, engine_events, commands_rx));

        Ok(PeerLinkHandle {
            commands: commands_tx,
            state: state_rx,
            restarts: restarts_rx,
            task: Some(task),
        })
    }

    fn is_initiator(&self) -> bool {
        self.role.is_conductor()
    }

    fn current(&self) -> LinkState {
        *self.state.borrow()
    }

    async fn run(
        mut self,
        mut subscription: Subscription,
        mut engine_events: mpsc::UnboundedReceiver<EngineEvent>,
        mut commands: mpsc::UnboundedReceiver<PeerCommand>,
    ) {
        let mut settle: Timer = self.is_initiator().then(|| Box::pin(tokio::time::sleep(self.config.settle_delay())));
        let mut grace: Timer = None;

        loop {
            tokio::select! {
                _ = wait(&mut settle), if settle.is_some() => {
                    settle = None;
                    if self.current() != LinkState::Connected {
                        self.send_offer(false).await;
                    }
                }
                _ = wait(&mut grace), if grace.is_some() => {
                    grace = None;
                    if self.current() == LinkState::Disconnected {
                        info!("Peer link still disconnected after grace period");
                        self.restart().await;
                    }
                }
                inbound = subscription.recv() => match inbound {
                    Some(inbound) => {
                        if self.handle_signal(inbound).await && self.is_initiator() {
                            settle = Some(Box::pin(tokio::time::sleep(self.config.settle_delay())));
                        }
                    }
                    None => break,
                },
                event = engine_events.recv() => match event {
                    Some(event) => {
                        if let Some(timer) = self.handle_engine_event(event).await {
                            grace = timer;
                        }
                    }
                    None => {
                        warn!("Peer engine event stream ended");
                        break;
                    }
                },
                command = commands.recv() => match command {
                    Some(PeerCommand::SetTrack { kind, enabled, reply }) => {
                        let applied = self.local_media.set_track_enabled(kind, enabled);
                        info!("Local {:?} track enabled={} (applied={})", kind, enabled, applied);
                        let _ = reply.send(applied);
                    }
                    Some(PeerCommand::Shutdown) | None => break,
                },
            }
        }

        self.connection.close().await;
        self.local_media.release();
        self.state.send_replace(LinkState::Closed);
        info!("Peer link closed");
    }

    /// Returns true when a peer (re)joined and the initiator should offer again
    async fn handle_signal(&mut self, inbound: Inbound) -> bool {
        match inbound.event {
            SignalEvent::Join { name, .. } => {
                let needs_offer = self.current() != LinkState::Connected;
                if needs_offer {
                    debug!("{} joined while link is {:?}", name, self.current());
                }
                needs_offer
            }
            SignalEvent::PeerOffer { sdp } => {
                self.transition(LinkState::Negotiating);
                match self.connection.accept_offer(&sdp).await {
                    Ok(answer) => {
                        if let Err(e) = self.channel.send(SignalEvent::PeerAnswer { sdp: answer }).await {
                            warn!("Failed to send peer answer: {}", e);
                        }
                    }
                    Err(e) => warn!("Failed to handle peer offer: {}", e),
                }
                false
            }
            SignalEvent::PeerAnswer { sdp } => {
                if let Err(e) = self.connection.accept_answer(&sdp).await {
                    warn!("Failed to handle peer answer: {}", e);
                }
                false
            }
            SignalEvent::PeerCandidate { candidate } => {
                if let Err(e) = self.connection.add_remote_candidate(candidate).await {
                    warn!("Failed to add remote candidate: {}", e);
                }
                false
            }
            _ => false,
        }
    }

    /// Returns the new grace timer when it changes
    async fn handle_engine_event(&mut self, event: EngineEvent) -> Option<Timer> {
        match event {
            EngineEvent::LocalCandidate(candidate) => {
                if let Err(e) = self.channel.send(SignalEvent::PeerCandidate { candidate }).await {
                    warn!("Dropping local candidate: {}", e);
                }
                None
            }
            EngineEvent::StateChanged(LinkState::Connected) => {
                self.transition(LinkState::Connected);
                Some(None)
            }
            EngineEvent::StateChanged(LinkState::Disconnected) => {
                self.transition(LinkState::Disconnected);
                Some(Some(Box::pin(tokio::time::sleep(self.config.disconnect_grace()))))
            }
            EngineEvent::StateChanged(LinkState::Failed) => {
                self.transition(LinkState::Failed);
                self.restart().await;
                Some(None)
            }
            EngineEvent::StateChanged(other) => {
                debug!("Ignoring engine state {:?}", other);
                None
            }
        }
    }

    async fn send_offer(&mut self, ice_restart: bool) {
        match self.connection.create_offer(ice_restart).await {
            Ok(sdp) => {
                self.transition(LinkState::Negotiating);
                if let Err(e) = self.channel.send(SignalEvent::PeerOffer { sdp }).await {
                    warn!("Failed to send peer offer: {}", e);
                }
            }
            Err(e) => error!("Failed to create peer offer: {}", e),
        }
    }

    /// Renegotiate in place without tearing the call down
    async fn restart(&mut self) {
        self.restarts.send_modify(|count| *count += 1);
        info!("Restarting peer link (restart #{})", *self.restarts.borrow());
        self.connection.restart_ice().await;
        self.transition(LinkState::Negotiating);
        // Only the initiator offers, so both sides restarting cannot collide
        if self.is_initiator() {
            self.send_offer(true).await;
        }
    }

    fn transition(&self, next: LinkState) -> bool {
        let current = self.current();
        if current == next {
            return false;
        }
        if next == LinkState::New || current == LinkState::Closed {
            warn!("Refusing peer link transition {:?} -> {:?}", current, next);
            return false;
        }
        info!("Peer link {:?} -> {:?}", current, next);
        self.state.send_replace(next);
        true
    }
}

async fn wait(timer: &mut Timer) {
    match timer.as_mut() {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}
