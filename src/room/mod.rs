//! One participant's side of a live session
//!
//! `SessionSyncCoordinator` keeps the prompt index and capture phase in step
//! with the other participant; `SessionRoom` runs it on a single task and
//! exposes it through a cloneable `RoomHandle`.

mod coordinator;
mod runner;

pub use coordinator::{RoomSnapshot, SessionSyncCoordinator};
pub use runner::{JoinRequest, RoomDeps, RoomHandle, SessionRoom};
