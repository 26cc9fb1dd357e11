use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::session::{Analysis, Prompt, PromptId, Role};

/// Prompt as carried on the wire (no analysis attached)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptSummary {
    pub id: PromptId,
    pub text: String,
    pub position: usize,
}

impl From<&Prompt> for PromptSummary {
    fn from(prompt: &Prompt) -> Self {
        Self {
            id: prompt.id,
            text: prompt.text.clone(),
            position: prompt.position,
        }
    }
}

impl From<PromptSummary> for Prompt {
    fn from(summary: PromptSummary) -> Self {
        Self {
            id: summary.id,
            text: summary.text,
            position: summary.position,
            analysis: None,
        }
    }
}

/// Events exchanged between the two participants of a room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalEvent {
    #[serde(rename_all = "camelCase")]
    Join {
        session_code: String,
        role: Role,
        name: String,
    },
    Leave {
        name: String,
    },
    RosterUpdate {
        count: usize,
    },
    /// Snapshot sent by the conductor to a participant that just joined
    #[serde(rename_all = "camelCase")]
    SessionState {
        index: usize,
        capturing: bool,
        count: usize,
        /// Whole seconds left in the open capture window, 0 when idle
        #[serde(default)]
        remaining_seconds: u32,
    },
    PromptAdded {
        prompt: PromptSummary,
    },
    PromptIndexChanged {
        index: usize,
    },
    #[serde(rename_all = "camelCase")]
    CaptureStarted {
        prompt_id: PromptId,
        duration_seconds: u32,
    },
    #[serde(rename_all = "camelCase")]
    CaptureStopped {
        prompt_id: PromptId,
    },
    #[serde(rename_all = "camelCase")]
    CaptureCompleted {
        prompt_id: PromptId,
        analysis: Analysis,
    },
    LiveSample {
        label: String,
        confidence: f32,
    },
    SessionCompleted,
    PeerOffer {
        sdp: String,
    },
    PeerAnswer {
        sdp: String,
    },
    /// Opaque candidate, relayed without interpretation
    PeerCandidate {
        candidate: serde_json::Value,
    },
}

/// Logical event names used for subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Join,
    Leave,
    RosterUpdate,
    SessionState,
    PromptAdded,
    PromptIndexChanged,
    CaptureStarted,
    CaptureStopped,
    CaptureCompleted,
    LiveSample,
    SessionCompleted,
    PeerOffer,
    PeerAnswer,
    PeerCandidate,
}

impl EventKind {
    /// Everything the session coordinator listens to
    pub const SESSION: &'static [EventKind] = &[
        EventKind::Join,
        EventKind::Leave,
        EventKind::RosterUpdate,
        EventKind::SessionState,
        EventKind::PromptAdded,
        EventKind::PromptIndexChanged,
        EventKind::CaptureStarted,
        EventKind::CaptureStopped,
        EventKind::CaptureCompleted,
        EventKind::LiveSample,
        EventKind::SessionCompleted,
    ];

    /// Peer link handshake traffic
    pub const PEER: &'static [EventKind] = &[EventKind::PeerOffer, EventKind::PeerAnswer, EventKind::PeerCandidate];
}

impl SignalEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SignalEvent::Join { .. } => EventKind::Join,
            SignalEvent::Leave { .. } => EventKind::Leave,
            SignalEvent::RosterUpdate { .. } => EventKind::RosterUpdate,
            SignalEvent::SessionState { .. } => EventKind::SessionState,
            SignalEvent::PromptAdded { .. } => EventKind::PromptAdded,
            SignalEvent::PromptIndexChanged { .. } => EventKind::PromptIndexChanged,
            SignalEvent::CaptureStarted { .. } => EventKind::CaptureStarted,
            SignalEvent::CaptureStopped { .. } => EventKind::CaptureStopped,
            SignalEvent::CaptureCompleted { .. } => EventKind::CaptureCompleted,
            SignalEvent::LiveSample { .. } => EventKind::LiveSample,
            SignalEvent::SessionCompleted => EventKind::SessionCompleted,
            SignalEvent::PeerOffer { .. } => EventKind::PeerOffer,
            SignalEvent::PeerAnswer { .. } => EventKind::PeerAnswer,
            SignalEvent::PeerCandidate { .. } => EventKind::PeerCandidate,
        }
    }
}

/// What actually travels through the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub session_code: String,
    /// Per-connection id, used to drop our own echoes
    pub sender: Uuid,
    pub role: Role,
    pub event: SignalEvent,
}
