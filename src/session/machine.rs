use tracing::debug;

use super::model::{CapturePhase, GatePolicy, Prompt, PromptId, Session, SessionStatus, SyncState};
use crate::error::Rejection;
use crate::signaling::{ChannelStatus, SignalEvent};

/// Outcome of applying one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Changed,
    Unchanged,
}

/// Pure prompt/capture state machine.
///
/// Local operations check their preconditions here, then feed the event they
/// are about to broadcast through [`SyncMachine::apply`]; inbound events go
/// through the same `apply`. Two machines fed the same event sequence end up
/// in the same state.
#[derive(Debug, Clone)]
pub struct SyncMachine {
    session: Session,
    state: SyncState,
    policy: GatePolicy,
}

impl SyncMachine {
    pub fn new(mut session: Session, policy: GatePolicy) -> Self {
        session.prompts.sort_by_key(|p| p.position);
        let mut machine = Self {
            session,
            state: SyncState::default(),
            policy,
        };
        machine.recompute();
        machine
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn policy(&self) -> GatePolicy {
        self.policy
    }

    pub fn prompt_count(&self) -> usize {
        self.session.prompts.len()
    }

    pub fn current_prompt(&self) -> Option<&Prompt> {
        self.session.prompts.get(self.state.current_prompt_index)
    }

    pub fn is_capturing(&self) -> bool {
        self.state.capture_phase == CapturePhase::Capturing
    }

    /// Index the next `advance` would move to
    pub fn check_advance(&self) -> Result<usize, Rejection> {
        self.ensure_open()?;
        let count = self.prompt_count();
        if count == 0 {
            return Err(Rejection::NoPrompts);
        }
        if self.state.current_prompt_index + 1 >= count {
            return Err(Rejection::AtLastPrompt);
        }
        if !self.state.can_advance {
            return Err(Rejection::GateClosed);
        }
        Ok(self.state.current_prompt_index + 1)
    }

    /// Index the next `retreat` would move to; going back is never gated
    pub fn check_retreat(&self) -> Result<usize, Rejection> {
        self.ensure_open()?;
        if self.state.current_prompt_index == 0 {
            return Err(Rejection::AtFirstPrompt);
        }
        Ok(self.state.current_prompt_index - 1)
    }

    /// Prompt a new capture window would cover
    pub fn check_begin_capture(&self) -> Result<PromptId, Rejection> {
        self.ensure_open()?;
        let prompt = self.current_prompt().ok_or(Rejection::NoPrompts)?;
        if prompt.analysis.is_some() {
            return Err(Rejection::AnalysisExists);
        }
        if self.state.capture_phase != CapturePhase::Idle {
            return Err(Rejection::CaptureInProgress);
        }
        Ok(prompt.id)
    }

    /// Prompt the open capture window covers
    pub fn check_end_capture(&self) -> Result<PromptId, Rejection> {
        if !self.is_capturing() {
            return Err(Rejection::NotCapturing);
        }
        self.current_prompt().map(|p| p.id).ok_or(Rejection::NoPrompts)
    }

    pub fn check_add_prompt(&self, text: &str) -> Result<(), Rejection> {
        self.ensure_open()?;
        if text.trim().is_empty() {
            return Err(Rejection::EmptyPrompt);
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), Rejection> {
        if self.session.is_completed() {
            return Err(Rejection::SessionCompleted);
        }
        Ok(())
    }

    /// Apply one event to the working set
    pub fn apply(&mut self, event: &SignalEvent) -> Applied {
        let before = (self.state.clone(), self.session.prompts.len(), self.session.status);
        let analyses_before = self.analysis_count();

        match event {
            SignalEvent::PromptAdded { prompt } => {
                if self.session.prompt(prompt.id).is_none() {
                    self.session.prompts.push(prompt.clone().into());
                    self.session.prompts.sort_by_key(|p| p.position);
                }
            }
            SignalEvent::PromptIndexChanged { index } => {
                self.move_to(*index);
            }
            SignalEvent::CaptureStarted { prompt_id, .. } => {
                self.start_capture(*prompt_id);
            }
            SignalEvent::CaptureCompleted { prompt_id, analysis } => {
                if let Some(prompt) = self.session.prompt_mut(*prompt_id) {
                    if prompt.analysis.is_none() {
                        prompt.analysis = Some(analysis.clone());
                    }
                }
                if self.current_prompt().map(|p| p.id) == Some(*prompt_id) {
                    self.state.capture_phase = CapturePhase::Completed;
                }
            }
            SignalEvent::SessionState { index, capturing, .. } => {
                let index = self.clamp(*index);
                if index != self.state.current_prompt_index {
                    self.move_to(index);
                }
                let has_analysis = self.current_prompt().map_or(true, |p| p.analysis.is_some());
                if *capturing && !has_analysis {
                    self.state.capture_phase = CapturePhase::Capturing;
                } else if !*capturing && self.is_capturing() {
                    self.state.capture_phase = CapturePhase::Idle;
                }
            }
            SignalEvent::SessionCompleted => {
                self.session.status = SessionStatus::Completed;
                if self.is_capturing() {
                    self.state.capture_phase = CapturePhase::Idle;
                }
            }
            _ => {}
        }

        self.recompute();

        let after = (self.state.clone(), self.session.prompts.len(), self.session.status);
        if before == after && analyses_before == self.analysis_count() {
            Applied::Unchanged
        } else {
            debug!("Applied {:?} -> {:?}", event.kind(), self.state);
            Applied::Changed
        }
    }

    /// Replace the mirrored session with a fresh copy from the record service
    pub fn resync(&mut self, mut fresh: Session) {
        fresh.prompts.sort_by_key(|p| p.position);
        if self.session.is_completed() {
            fresh.status = SessionStatus::Completed;
        }
        self.session = fresh;
        self.state.current_prompt_index = self.clamp(self.state.current_prompt_index);

        let has_analysis = self.current_prompt().map_or(false, |p| p.analysis.is_some());
        if self.is_capturing() && has_analysis {
            self.state.capture_phase = CapturePhase::Completed;
        }
        self.recompute();
    }

    pub fn set_channel_status(&mut self, status: ChannelStatus) {
        self.state.channel_status = status;
    }

    /// Both participants are present
    pub fn activate(&mut self) {
        if self.session.status == SessionStatus::Waiting {
            self.session.status = SessionStatus::Active;
        }
    }

    pub fn set_responder(&mut self, name: &str) {
        if self.session.responder.is_none() {
            self.session.responder = Some(name.to_string());
        }
    }

    fn start_capture(&mut self, prompt_id: PromptId) {
        if self.is_capturing() || self.session.is_completed() {
            return;
        }
        let Some(position) = self.session.prompts.iter().position(|p| p.id == prompt_id) else {
            return;
        };
        if self.session.prompts[position].analysis.is_some() {
            return;
        }
        // A lost index event leaves us on another prompt; follow the capture
        if position != self.state.current_prompt_index {
            self.state.current_prompt_index = position;
        }
        self.state.capture_phase = CapturePhase::Capturing;
    }

    fn move_to(&mut self, index: usize) {
        self.state.current_prompt_index = self.clamp(index);
        self.state.capture_phase = CapturePhase::Idle;
    }

    fn clamp(&self, index: usize) -> usize {
        index.min(self.prompt_count().saturating_sub(1))
    }

    fn analysis_count(&self) -> usize {
        self.session.prompts.iter().filter(|p| p.analysis.is_some()).count()
    }

    fn recompute(&mut self) {
        let policy = self.policy;
        self.state.can_advance = self
            .current_prompt()
            .and_then(|p| p.analysis.as_ref())
            .map_or(false, |analysis| policy.is_satisfied_by(analysis));
    }
}
