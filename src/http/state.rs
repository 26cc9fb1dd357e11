use crate::room::{RoomDeps, RoomHandle};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::RwLock;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Open rooms (session_code → room)
    pub rooms: Arc<RwLock<HashMap<String, RoomHandle>>>,

    /// Session codes whose room is still being opened
    opening: Arc<Mutex<HashSet<String>>>,

    /// Collaborators handed to every room opened through the API
    pub deps: RoomDeps,
}

impl AppState {
    pub fn new(deps: RoomDeps) -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            opening: Arc::new(Mutex::new(HashSet::new())),
            deps,
        }
    }

    /// Look up a room that is still running
    pub async fn room(&self, session_code: &str) -> Option<RoomHandle> {
        let rooms = self.rooms.read().await;
        rooms
            .get(session_code)
            .filter(|room| !room.is_closed())
            .cloned()
    }

    /// Reserve `session_code` for a room about to open.
    ///
    /// Returns `None` while a live room or another claim holds the code. The
    /// claim is released when dropped.
    pub async fn claim(&self, session_code: &str) -> Option<RoomClaim> {
        let rooms = self.rooms.read().await;
        if rooms.get(session_code).map_or(false, |room| !room.is_closed()) {
            return None;
        }
        if !lock(&self.opening).insert(session_code.to_string()) {
            return None;
        }
        Some(RoomClaim {
            session_code: session_code.to_string(),
            opening: Arc::clone(&self.opening),
        })
    }
}

/// Exclusive right to open the room for one session code
pub struct RoomClaim {
    session_code: String,
    opening: Arc<Mutex<HashSet<String>>>,
}

impl Drop for RoomClaim {
    fn drop(&mut self) {
        lock(&self.opening).remove(&self.session_code);
    }
}

fn lock(opening: &Mutex<HashSet<String>>) -> MutexGuard<'_, HashSet<String>> {
    match opening.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
