//! Session data model and prompt synchronization
//!
//! This module provides:
//! - The session, prompt, sample and analysis types
//! - Aggregation of capture samples into an analysis
//! - `SyncMachine`, the pure state machine both participants replay events through
//! - Session-wide timeline statistics

mod machine;
mod model;
mod stats;

pub use machine::{Applied, SyncMachine};
pub use model::{
    Analysis, CapturePhase, CaptureSample, GatePolicy, LabelCount, ParticipantPresence, Prompt,
    PromptId, Role, Session, SessionStatus, SyncState,
};
pub use stats::{LabelShare, SessionTimeline, TimelineEntry};
