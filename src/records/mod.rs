//! Session-record service
//!
//! The durable source of truth for prompts and analyses. Rooms mirror it and
//! re-read it after every reconnect.

mod memory;

pub use memory::InMemoryRecords;

use crate::error::RecordsError;
use crate::session::{Analysis, Prompt, PromptId, Session};

#[async_trait::async_trait]
pub trait SessionRecords: Send + Sync {
    /// Full session: roster, ordered prompts, committed analyses
    async fn fetch_session(&self, session_id: &str) -> Result<Session, RecordsError>;

    /// Append a prompt at the end of the list
    async fn append_prompt(&self, session_id: &str, text: &str) -> Result<Prompt, RecordsError>;

    /// Attach an analysis to a prompt; fails with `AnalysisExists` if one is there
    async fn commit_analysis(
        &self,
        session_id: &str,
        prompt_id: PromptId,
        analysis: &Analysis,
    ) -> Result<Analysis, RecordsError>;

    /// Mark the session completed (terminal)
    async fn complete_session(&self, session_id: &str, notes: Option<&str>) -> Result<(), RecordsError>;
}
