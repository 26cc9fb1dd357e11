use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::peer::LinkState;
use crate::signaling::ChannelStatus;

pub type PromptId = u64;

/// Which side of the session a participant is on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Poses prompts and controls progression
    Conductor,
    /// Has their media sampled during capture windows
    Responder,
}

impl Role {
    pub fn is_conductor(self) -> bool {
        matches!(self, Role::Conductor)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Conductor => "conductor",
            Role::Responder => "responder",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Waiting,
    Active,
    /// Terminal; only reachable by conductor action
    Completed,
}

/// One item in the session's ordered prompt list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prompt {
    pub id: PromptId,
    pub text: String,
    /// Stable, append-only position in the list
    pub position: usize,
    pub analysis: Option<Analysis>,
}

/// Mirror of the session record the coordinator works on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub code: String,
    pub conductor: String,
    pub responder: Option<String>,
    pub prompts: Vec<Prompt>,
    pub status: SessionStatus,
}

impl Session {
    pub fn new(id: impl Into<String>, code: impl Into<String>, conductor: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            code: code.into(),
            conductor: conductor.into(),
            responder: None,
            prompts: Vec::new(),
            status: SessionStatus::Waiting,
        }
    }

    pub fn prompt(&self, id: PromptId) -> Option<&Prompt> {
        self.prompts.iter().find(|p| p.id == id)
    }

    pub fn prompt_mut(&mut self, id: PromptId) -> Option<&mut Prompt> {
        self.prompts.iter_mut().find(|p| p.id == id)
    }

    pub fn is_completed(&self) -> bool {
        self.status == SessionStatus::Completed
    }
}

/// One classified frame, held only while a capture window is open
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureSample {
    pub label: String,
    /// Classifier confidence in [0, 1]
    pub confidence: f32,
    pub captured_at: DateTime<Utc>,
}

impl CaptureSample {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence: confidence.clamp(0.0, 1.0),
            captured_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelCount {
    pub label: String,
    pub count: usize,
}

/// Committed aggregate of one capture window. Immutable once attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    /// Most frequent label; `None` when the window produced no samples
    pub dominant_label: Option<String>,
    /// Share of samples carrying the dominant label, in percent (2 decimals)
    pub dominant_percentage: f64,
    /// Arithmetic mean of sample confidences (3 decimals)
    pub mean_confidence: f64,
    pub sample_count: usize,
    /// Per-label counts in first-seen order
    pub label_counts: Vec<LabelCount>,
    pub duration_secs: u32,
    pub response: Option<String>,
}

impl Analysis {
    /// Aggregate a window's samples.
    ///
    /// Ties on the dominant label go to the label seen first.
    pub fn aggregate(samples: &[CaptureSample], duration_secs: u32, response: Option<String>) -> Self {
        let mut label_counts: Vec<LabelCount> = Vec::new();
        let mut confidence_sum = 0.0_f64;

        for sample in samples {
            confidence_sum += f64::from(sample.confidence);
            match label_counts.iter_mut().find(|c| c.label == sample.label) {
                Some(entry) => entry.count += 1,
                None => label_counts.push(LabelCount {
                    label: sample.label.clone(),
                    count: 1,
                }),
            }
        }

        let total = samples.len();
        let mut dominant: Option<&LabelCount> = None;
        for entry in &label_counts {
            // strict comparison keeps the first-seen label on ties
            if dominant.map_or(true, |d| entry.count > d.count) {
                dominant = Some(entry);
            }
        }

        let (dominant_label, dominant_percentage) = match dominant {
            Some(entry) if total > 0 => (
                Some(entry.label.clone()),
                round_to(entry.count as f64 / total as f64 * 100.0, 2),
            ),
            _ => (None, 0.0),
        };

        let mean_confidence = if total > 0 {
            round_to(confidence_sum / total as f64, 3)
        } else {
            0.0
        };

        Self {
            dominant_label,
            dominant_percentage,
            mean_confidence,
            sample_count: total,
            label_counts,
            duration_secs,
            response: response.filter(|r| !r.trim().is_empty()),
        }
    }
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10_f64.powi(places);
    (value * factor).round() / factor
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapturePhase {
    Idle,
    Capturing,
    Completed,
}

/// Whether a zero-sample analysis clears the advance gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatePolicy {
    /// Any committed analysis clears the gate, even with no samples
    #[default]
    AnyAnalysis,
    /// The analysis must hold at least one sample
    RequireSamples,
}

impl GatePolicy {
    pub fn is_satisfied_by(self, analysis: &Analysis) -> bool {
        match self {
            GatePolicy::AnyAnalysis => true,
            GatePolicy::RequireSamples => analysis.sample_count > 0,
        }
    }
}

/// The coordinator's working set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub current_prompt_index: usize,
    pub capture_phase: CapturePhase,
    pub can_advance: bool,
    pub channel_status: ChannelStatus,
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            current_prompt_index: 0,
            capture_phase: CapturePhase::Idle,
            can_advance: false,
            channel_status: ChannelStatus::Connecting,
        }
    }
}

/// Per-participant connectivity, rebuilt from presence events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantPresence {
    pub name: String,
    pub role: Role,
    pub joined: bool,
    pub channel: ChannelStatus,
    pub link: LinkState,
}

impl ParticipantPresence {
    pub fn joined(name: impl Into<String>, role: Role) -> Self {
        Self {
            name: name.into(),
            role,
            joined: true,
            channel: ChannelStatus::Connected,
            link: LinkState::New,
        }
    }
}
