use anyhow::Result;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, warn};

use super::messages::Envelope;

/// Buffer size for link channels
pub const LINK_BUFFER: usize = 256;

/// One live attachment to the relay for a session code.
///
/// The link is considered lost as soon as `inbound` yields `None`.
pub struct RelayLink {
    pub outbound: mpsc::Sender<Envelope>,
    pub inbound: mpsc::Receiver<Envelope>,
}

/// Relay transport routing envelopes between participants of the same room
#[async_trait::async_trait]
pub trait Relay: Send + Sync {
    /// Open a fresh link for `session_code`
    async fn attach(&self, session_code: &str) -> Result<RelayLink>;

    /// Relay name for logging
    fn name(&self) -> &str;
}

/// In-process relay.
///
/// Routes envelopes between handles living in the same process. Links can be
/// severed and attaches refused to exercise reconnection.
pub struct LocalRelay {
    rooms: Mutex<HashMap<String, broadcast::Sender<Envelope>>>,
    available: AtomicBool,
    attaches: AtomicUsize,
    severed: watch::Sender<u64>,
}

impl LocalRelay {
    pub fn new() -> Self {
        let (severed, _) = watch::channel(0);
        Self {
            rooms: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
            attaches: AtomicUsize::new(0),
            severed,
        }
    }

    /// Drop every open link, as if the transport went away
    pub fn sever_all(&self) {
        self.severed.send_modify(|generation| *generation += 1);
    }

    /// Refuse (or accept again) new attaches
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Successful attaches so far
    pub fn attach_count(&self) -> usize {
        self.attaches.load(Ordering::SeqCst)
    }

    fn room(&self, session_code: &str) -> broadcast::Sender<Envelope> {
        let mut rooms = match self.rooms.lock() {
            Ok(rooms) => rooms,
            Err(poisoned) => poisoned.into_inner(),
        };
        rooms
            .entry(session_code.to_string())
            .or_insert_with(|| broadcast::channel(LINK_BUFFER).0)
            .clone()
    }
}

impl Default for LocalRelay {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Relay for LocalRelay {
    async fn attach(&self, session_code: &str) -> Result<RelayLink> {
        if !self.available.load(Ordering::SeqCst) {
            anyhow::bail!("local relay unavailable");
        }

        let room = self.room(session_code);
        let mut room_rx = room.subscribe();
        let (out_tx, mut out_rx) = mpsc::channel::<Envelope>(LINK_BUFFER);
        let (in_tx, in_rx) = mpsc::channel::<Envelope>(LINK_BUFFER);
        let mut severed = self.severed.subscribe();
        severed.borrow_and_update();

        self.attaches.fetch_add(1, Ordering::SeqCst);
        let code = session_code.to_string();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = severed.changed() => {
                        debug!("Local relay link for {} severed", code);
                        break;
                    }
                    outgoing = out_rx.recv() => match outgoing {
                        // No receivers is fine: nobody else has joined yet
                        Some(envelope) => { let _ = room.send(envelope); }
                        None => break,
                    },
                    incoming = room_rx.recv() => match incoming {
                        Ok(envelope) => {
                            if in_tx.send(envelope).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("Local relay link for {} dropped {} envelopes", code, skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });

        Ok(RelayLink {
            outbound: out_tx,
            inbound: in_rx,
        })
    }

    fn name(&self) -> &str {
        "local"
    }
}
