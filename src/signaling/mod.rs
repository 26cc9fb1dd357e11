//! Signaling channel between the two participants of a room
//!
//! This module provides:
//! - Wire events and the envelope that carries them through the relay
//! - The `Relay` transport trait, with NATS and in-process implementations
//! - `SignalingChannel`, a reconnecting handle with typed subscriptions

mod channel;
pub mod messages;
mod nats;
mod relay;

pub use channel::{ChannelState, ChannelStatus, Inbound, SignalingChannel, Subscription};
pub use messages::{Envelope, EventKind, PromptSummary, SignalEvent};
pub use nats::NatsRelay;
pub use relay::{LocalRelay, Relay, RelayLink};
