use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tracing::info;

use super::SessionRecords;
use crate::error::RecordsError;
use crate::session::{Analysis, Prompt, PromptId, Session, SessionStatus};

struct StoredSession {
    session: Session,
    notes: Option<String>,
}

/// Record service kept in process memory
pub struct InMemoryRecords {
    sessions: RwLock<HashMap<String, StoredSession>>,
    next_prompt_id: AtomicU64,
    fetches: AtomicUsize,
}

impl InMemoryRecords {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_prompt_id: AtomicU64::new(1),
            fetches: AtomicUsize::new(0),
        }
    }

    /// Register a session
    pub async fn insert(&self, session: Session) {
        if let Some(max_id) = session.prompts.iter().map(|p| p.id).max() {
            self.next_prompt_id.fetch_max(max_id + 1, Ordering::SeqCst);
        }
        let mut sessions = self.sessions.write().await;
        sessions.insert(
            session.id.clone(),
            StoredSession {
                session,
                notes: None,
            },
        );
    }

    /// Create an empty session for `conductor`
    pub async fn create_session(&self, session_id: &str, session_code: &str, conductor: &str) -> Session {
        let session = Session::new(session_id, session_code, conductor);
        self.insert(session.clone()).await;
        info!("Created session {} ({})", session_id, session_code);
        session
    }

    /// Times `fetch_session` was called
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub async fn notes(&self, session_id: &str) -> Option<String> {
        let sessions = self.sessions.read().await;
        sessions.get(session_id).and_then(|stored| stored.notes.clone())
    }
}

impl Default for InMemoryRecords {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SessionRecords for InMemoryRecords {
    async fn fetch_session(&self, session_id: &str) -> Result<Session, RecordsError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let sessions = self.sessions.read().await;
        sessions
            .get(session_id)
            .map(|stored| stored.session.clone())
            .ok_or_else(|| RecordsError::SessionNotFound(session_id.to_string()))
    }

    async fn append_prompt(&self, session_id: &str, text: &str) -> Result<Prompt, RecordsError> {
        let mut sessions = self.sessions.write().await;
        let stored = sessions
            .get_mut(session_id)
            .ok_or_else(|| RecordsError::SessionNotFound(session_id.to_string()))?;

        if stored.session.status == SessionStatus::Completed {
            return Err(RecordsError::SessionCompleted(session_id.to_string()));
        }

        let prompt = Prompt {
            id: self.next_prompt_id.fetch_add(1, Ordering::SeqCst),
            text: text.trim().to_string(),
            position: stored.session.prompts.len(),
            analysis: None,
        };
        stored.session.prompts.push(prompt.clone());
        Ok(prompt)
    }

    async fn commit_analysis(
        &self,
        session_id: &str,
        prompt_id: PromptId,
        analysis: &Analysis,
    ) -> Result<Analysis, RecordsError> {
        let mut sessions = self.sessions.write().await;
        let stored = sessions
            .get_mut(session_id)
            .ok_or_else(|| RecordsError::SessionNotFound(session_id.to_string()))?;
        let prompt = stored
            .session
            .prompt_mut(prompt_id)
            .ok_or(RecordsError::PromptNotFound(prompt_id))?;

        if prompt.analysis.is_some() {
            return Err(RecordsError::AnalysisExists(prompt_id));
        }
        prompt.analysis = Some(analysis.clone());
        Ok(analysis.clone())
    }

    async fn complete_session(&self, session_id: &str, notes: Option<&str>) -> Result<(), RecordsError> {
        let mut sessions = self.sessions.write().await;
        let stored = sessions
            .get_mut(session_id)
            .ok_or_else(|| RecordsError::SessionNotFound(session_id.to_string()))?;
        stored.session.status = SessionStatus::Completed;
        stored.notes = notes.map(str::to_string);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::CaptureSample;

    #[tokio::test]
    async fn test_prompts_append_in_order() {
        let records = InMemoryRecords::new();
        records.create_session("s-1", "ROOM1", "dr-lee").await;

        let first = records.append_prompt("s-1", "How are you?").await.unwrap();
        let second = records.append_prompt("s-1", "  And today?  ").await.unwrap();

        assert_eq!(first.position, 0);
        assert_eq!(second.position, 1);
        assert_eq!(second.text, "And today?");
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_analysis_commits_once() {
        let records = InMemoryRecords::new();
        records.create_session("s-1", "ROOM1", "dr-lee").await;
        let prompt = records.append_prompt("s-1", "How are you?").await.unwrap();
        let analysis = Analysis::aggregate(&[CaptureSample::new("Happy", 0.9)], 5, None);

        records.commit_analysis("s-1", prompt.id, &analysis).await.unwrap();
        let second = records.commit_analysis("s-1", prompt.id, &analysis).await;

        assert!(matches!(second, Err(RecordsError::AnalysisExists(id)) if id == prompt.id));
    }

    #[tokio::test]
    async fn test_completed_session_refuses_prompts() {
        let records = InMemoryRecords::new();
        records.create_session("s-1", "ROOM1", "dr-lee").await;
        records.complete_session("s-1", Some("good progress")).await.unwrap();

        let result = records.append_prompt("s-1", "one more").await;
        assert!(matches!(result, Err(RecordsError::SessionCompleted(_))));
        assert_eq!(records.notes("s-1").await.as_deref(), Some("good progress"));
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let records = InMemoryRecords::new();
        assert!(matches!(
            records.fetch_session("missing").await,
            Err(RecordsError::SessionNotFound(_))
        ));
    }
}
