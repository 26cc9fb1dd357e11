use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::messages::{Envelope, EventKind, SignalEvent};
use super::relay::{Relay, RelayLink};
use crate::config::SignalingConfig;
use crate::error::ChannelError;
use crate::session::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    Connecting,
    Connected,
    Disconnected,
}

/// Observable channel state.
///
/// `epoch` counts successful attaches, so an observer can tell a reconnect
/// apart from the first connect even if it missed the disconnect in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelState {
    pub status: ChannelStatus,
    pub epoch: u32,
    /// Retry budget exhausted; the channel will not come back on its own
    pub terminal: bool,
}

/// An event delivered from the other participant
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    pub sender: Uuid,
    pub role: Role,
    pub event: SignalEvent,
}

struct Registration {
    id: u64,
    kinds: Vec<EventKind>,
    tx: mpsc::UnboundedSender<Inbound>,
}

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    entries: Mutex<Vec<Registration>>,
}

impl Registry {
    fn entries(&self) -> MutexGuard<'_, Vec<Registration>> {
        match self.entries.lock() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn dispatch(&self, inbound: &Inbound) {
        let kind = inbound.event.kind();
        let mut entries = self.entries();
        entries.retain(|entry| {
            if !entry.kinds.contains(&kind) {
                return true;
            }
            entry.tx.send(inbound.clone()).is_ok()
        });
    }

    fn remove(&self, id: u64) {
        self.entries().retain(|entry| entry.id != id);
    }
}

/// Typed receiver for a set of event kinds.
///
/// Dropping it unregisters it, exactly once.
pub struct Subscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<Inbound>,
    registry: Weak<Registry>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<Inbound> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Inbound> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

struct Shared {
    session_code: String,
    role: Role,
    name: String,
    sender: Uuid,
    outbound: Mutex<Option<(u32, mpsc::Sender<Envelope>)>>,
    registry: Arc<Registry>,
    state: watch::Sender<ChannelState>,
    /// Epoch of a link found dead while sending
    lost: watch::Sender<u32>,
    known_peers: Mutex<HashSet<Uuid>>,
}

impl Shared {
    fn outbound(&self) -> MutexGuard<'_, Option<(u32, mpsc::Sender<Envelope>)>> {
        match self.outbound.lock() {
            Ok(outbound) => outbound,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn known_peers(&self) -> MutexGuard<'_, HashSet<Uuid>> {
        match self.known_peers.lock() {
            Ok(peers) => peers,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn set_state(&self, status: ChannelStatus, terminal: bool) {
        self.state.send_modify(|state| {
            state.status = status;
            state.terminal = terminal;
        });
    }

    fn install(&self, outbound: mpsc::Sender<Envelope>) -> u32 {
        let mut epoch = 0;
        self.state.send_modify(|state| {
            state.epoch += 1;
            state.status = ChannelStatus::Connected;
            state.terminal = false;
            epoch = state.epoch;
        });
        *self.outbound() = Some((epoch, outbound));
        epoch
    }

    fn join_event(&self) -> SignalEvent {
        SignalEvent::Join {
            session_code: self.session_code.clone(),
            role: self.role,
            name: self.name.clone(),
        }
    }

    async fn send(&self, event: SignalEvent) -> Result<(), ChannelError> {
        let link = self.outbound().clone();
        let Some((epoch, tx)) = link else {
            return Err(ChannelError::NotConnected);
        };

        let envelope = Envelope {
            session_code: self.session_code.clone(),
            sender: self.sender,
            role: self.role,
            event,
        };

        if tx.send(envelope).await.is_err() {
            self.lost.send_replace(epoch);
            return Err(ChannelError::NotConnected);
        }
        Ok(())
    }

    async fn dispatch(&self, envelope: Envelope) {
        if envelope.sender == self.sender || envelope.session_code != self.session_code {
            return;
        }

        match &envelope.event {
            SignalEvent::Join { name, role, .. } => {
                let first_seen = self.known_peers().insert(envelope.sender);
                if first_seen {
                    info!("{} ({}) joined room {}", name, role.as_str(), self.session_code);
                    // Echo our own join so the newcomer learns about us
                    if let Err(e) = self.send(self.join_event()).await {
                        warn!("Failed to echo join in room {}: {}", self.session_code, e);
                    }
                }
            }
            SignalEvent::Leave { name } => {
                self.known_peers().remove(&envelope.sender);
                info!("{} left room {}", name, self.session_code);
            }
            _ => {}
        }

        self.registry.dispatch(&Inbound {
            sender: envelope.sender,
            role: envelope.role,
            event: envelope.event,
        });
    }
}

/// Handle to the relayed event bus for one room.
///
/// Delivery is at-most-once and ordered per sender only. The handle retries
/// the underlying relay on loss with linear backoff and gives up after the
/// configured number of attempts.
pub struct SignalingChannel {
    shared: Arc<Shared>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl SignalingChannel {
    /// Attach to the relay and announce ourselves to the room
    pub async fn connect(
        relay: Arc<dyn Relay>,
        config: SignalingConfig,
        session_code: &str,
        role: Role,
        name: &str,
    ) -> Result<Self, ChannelError> {
        let (state, _) = watch::channel(ChannelState {
            status: ChannelStatus::Connecting,
            epoch: 0,
            terminal: false,
        });
        let (lost, _) = watch::channel(0);

        let shared = Arc::new(Shared {
            session_code: session_code.to_string(),
            role,
            name: name.to_string(),
            sender: Uuid::new_v4(),
            outbound: Mutex::new(None),
            registry: Arc::new(Registry::default()),
            state,
            lost,
            known_peers: Mutex::new(HashSet::new()),
        });

        info!(
            "Connecting to room {} via {} relay as {} ({})",
            session_code,
            relay.name(),
            name,
            role.as_str()
        );

        let link = match relay.attach(session_code).await {
            Ok(link) => link,
            Err(e) => {
                warn!("Initial attach to room {} failed: {}", session_code, e);
                match reattach(relay.as_ref(), &config, &shared).await {
                    Ok(link) => link,
                    Err(e) => {
                        shared.set_state(ChannelStatus::Disconnected, true);
                        return Err(ChannelError::Relay(e));
                    }
                }
            }
        };

        let RelayLink { outbound, inbound } = link;
        let epoch = shared.install(outbound);
        if let Err(e) = shared.send(shared.join_event()).await {
            warn!("Failed to announce join to room {}: {}", session_code, e);
        }

        let supervisor = tokio::spawn(supervise(relay, config, Arc::clone(&shared), inbound, epoch));

        Ok(Self {
            shared,
            supervisor: Mutex::new(Some(supervisor)),
        })
    }

    /// Broadcast an event to the other participant
    pub async fn send(&self, event: SignalEvent) -> Result<(), ChannelError> {
        self.shared.send(event).await
    }

    /// Register for a set of event kinds
    pub fn subscribe(&self, kinds: &[EventKind]) -> Subscription {
        let registry = &self.shared.registry;
        let id = registry.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        registry.entries().push(Registration {
            id,
            kinds: kinds.to_vec(),
            tx,
        });
        Subscription {
            id,
            rx,
            registry: Arc::downgrade(registry),
        }
    }

    pub fn state(&self) -> watch::Receiver<ChannelState> {
        self.shared.state.subscribe()
    }

    pub fn status(&self) -> ChannelStatus {
        self.shared.state.borrow().status
    }

    pub fn session_code(&self) -> &str {
        &self.shared.session_code
    }

    pub fn role(&self) -> Role {
        self.shared.role
    }

    pub fn sender_id(&self) -> Uuid {
        self.shared.sender
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.shared.registry.entries().len()
    }

    /// Announce departure and tear the link down
    pub async fn disconnect(&self) {
        if let Err(e) = self
            .shared
            .send(SignalEvent::Leave {
                name: self.shared.name.clone(),
            })
            .await
        {
            debug!("Leave for room {} not delivered: {}", self.shared.session_code, e);
        }
        self.shutdown();
        info!("Disconnected from room {}", self.shared.session_code);
    }

    fn shutdown(&self) {
        let handle = match self.supervisor.lock() {
            Ok(mut supervisor) => supervisor.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            handle.abort();
        }
        *self.shared.outbound() = None;
        self.shared.set_state(ChannelStatus::Disconnected, true);
    }
}

impl Drop for SignalingChannel {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn supervise(
    relay: Arc<dyn Relay>,
    config: SignalingConfig,
    shared: Arc<Shared>,
    mut inbound: mpsc::Receiver<Envelope>,
    mut epoch: u32,
) {
    let mut lost = shared.lost.subscribe();

    loop {
        loop {
            tokio::select! {
                envelope = inbound.recv() => match envelope {
                    Some(envelope) => shared.dispatch(envelope).await,
                    None => break,
                },
                changed = lost.changed() => {
                    if changed.is_err() || *lost.borrow_and_update() == epoch {
                        break;
                    }
                }
            }
        }

        *shared.outbound() = None;
        shared.set_state(ChannelStatus::Disconnected, false);
        warn!("Lost relay link for room {}", shared.session_code);

        match reattach(relay.as_ref(), &config, &shared).await {
            Ok(RelayLink { outbound, inbound: next }) => {
                inbound = next;
                epoch = shared.install(outbound);
                info!("Reconnected to room {} (epoch {})", shared.session_code, epoch);
                if let Err(e) = shared.send(shared.join_event()).await {
                    warn!("Failed to re-announce join to room {}: {}", shared.session_code, e);
                }
            }
            Err(e) => {
                error!(
                    "Giving up on room {} after {} attempts: {}",
                    shared.session_code, config.max_reconnect_attempts, e
                );
                shared.set_state(ChannelStatus::Disconnected, true);
                return;
            }
        }
    }
}

async fn reattach(relay: &dyn Relay, config: &SignalingConfig, shared: &Shared) -> anyhow::Result<RelayLink> {
    let mut last_error = anyhow::anyhow!("no reconnect attempts configured");

    for attempt in 1..=config.max_reconnect_attempts {
        shared.set_state(ChannelStatus::Connecting, false);
        tokio::time::sleep(config.backoff_for(attempt)).await;

        match relay.attach(&shared.session_code).await {
            Ok(link) => return Ok(link),
            Err(e) => {
                warn!(
                    "Reconnect attempt {}/{} for room {} failed: {}",
                    attempt, config.max_reconnect_attempts, shared.session_code, e
                );
                last_error = e;
            }
        }
    }

    Err(last_error)
}
