pub mod client;
pub mod messages;

pub use client::{ConnectionStatus, NatsClient};
pub use messages::{ClassifyReply, ClassifyRequest};
