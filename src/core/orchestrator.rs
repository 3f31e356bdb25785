//! Ties authentication, indexing, sessions and conversations together.
//!
//! Front ends (the CLI and REPL) only talk to [`OrchestratorCore`].

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::api::Backend;
use crate::auth::{AuthError, AuthGate, AuthState, Credential};
use crate::core::conversation::{ChatError, ConversationController, ConversationState, SendOutcome};
use crate::core::jobs::{IndexError, IndexingCoordinator, Job, JobState};
use crate::core::message::Message;
use crate::core::sessions::{ChatSession, ChatSessionStore, SessionId, SessionSummary, StoreError};

/// Everything a front end needs to render.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub auth: AuthState,
    pub job: JobState,
    pub recent_folders: Vec<Job>,
    pub sessions: Vec<SessionSummary>,
    pub active_session: Option<ChatSession>,
    pub conversation: ConversationState,
}

pub struct OrchestratorCore {
    auth: AuthGate,
    jobs: IndexingCoordinator,
    sessions: Arc<ChatSessionStore>,
    conversation: ConversationController,
}

fn indexed_notice(job: &Job) -> String {
    let files = if job.file_count == 1 { "file" } else { "files" };
    format!(
        "Folder indexed successfully! Found {} {} in {}. You can now start asking questions.",
        job.file_count, files, job.display_name
    )
}

impl OrchestratorCore {
    pub fn new(
        auth: AuthGate,
        backend: Arc<dyn Backend>,
        sessions: Arc<ChatSessionStore>,
        recent_folder_capacity: usize,
    ) -> Self {
        Self {
            auth,
            jobs: IndexingCoordinator::new(Arc::clone(&backend), recent_folder_capacity),
            conversation: ConversationController::new(backend, Arc::clone(&sessions)),
            sessions,
        }
    }

    pub fn sessions(&self) -> &ChatSessionStore {
        &self.sessions
    }

    pub fn credential(&self) -> Option<Credential> {
        self.auth.credential()
    }

    pub fn restore(&self) -> bool {
        self.auth.restore()
    }

    pub async fn login(&self) -> Result<Credential, AuthError> {
        self.auth.login().await
    }

    /// Sign out. Chat history stays on disk; folders and focus are dropped.
    pub fn logout(&self) {
        self.sessions.clear_active();
        self.jobs.clear();
        self.auth.logout();
    }

    pub async fn submit_folder(&self, folder_reference: &str) -> Result<Job, IndexError> {
        let credential = self.auth.credential().ok_or(IndexError::NotAuthenticated)?;
        match self.jobs.submit(folder_reference, &credential).await {
            Ok(_) if !self.auth.is_authenticated() => {
                debug!("signed out while indexing, not opening a chat");
                Err(IndexError::Cancelled)
            }
            Ok(job) => {
                let session_id = self.sessions.bind_to_job(&job.id);
                if let Err(err) = self
                    .sessions
                    .append(&session_id, Message::system(indexed_notice(&job)))
                {
                    warn!(error = %err, "could not announce indexed folder");
                }
                Ok(job)
            }
            Err(IndexError::Cancelled) => Err(IndexError::Cancelled),
            Err(err) => {
                if let Some(active) = self.sessions.active() {
                    if let Err(append_err) =
                        self.sessions.append(&active, Message::system(err.to_string()))
                    {
                        warn!(error = %append_err, "could not report indexing failure");
                    }
                }
                Err(err)
            }
        }
    }

    /// Focus a recent folder and continue its conversation.
    pub fn open_job(&self, job_id: &str) -> Result<SessionId, IndexError> {
        let job = self.jobs.activate(job_id)?;
        Ok(self.sessions.bind_to_job(&job.id))
    }

    pub async fn refresh_job(&self, job_id: &str) -> Result<Job, IndexError> {
        let credential = self.auth.credential().ok_or(IndexError::NotAuthenticated)?;
        self.jobs.refresh_status(job_id, &credential).await
    }

    pub fn recent_folders(&self) -> Vec<Job> {
        self.jobs.recent()
    }

    pub fn new_chat(&self) -> SessionId {
        self.sessions.create()
    }

    pub fn switch_chat(&self, id: &SessionId) -> Result<(), StoreError> {
        self.sessions.switch_to(id)
    }

    pub async fn send(&self, text: &str) -> Result<SendOutcome, ChatError> {
        let credential = self.auth.credential().ok_or(ChatError::NotAuthenticated)?;
        if text.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let active = self.sessions.active();
        let linked = active
            .as_ref()
            .and_then(|id| self.sessions.session(id))
            .and_then(|session| session.linked_job_id);
        let job_id = match &linked {
            Some(job_id) => job_id.clone(),
            None => self.jobs.active_job().ok_or(ChatError::NoJob)?.id,
        };

        let session_id = match active {
            Some(id) => id,
            None => self.sessions.create(),
        };
        if linked.is_none() {
            info!(session = %session_id, job_id = %job_id, "linking session to active folder");
            self.sessions.link_job(&session_id, &job_id)?;
        }

        self.conversation
            .send(text, &session_id, &job_id, &credential)
            .await
    }

    pub fn snapshot(&self) -> Snapshot {
        let active_session = self.sessions.active_session();
        let conversation = active_session
            .as_ref()
            .map(|session| self.conversation.state(&session.id))
            .unwrap_or(ConversationState::Idle);
        Snapshot {
            auth: self.auth.state(),
            job: self.jobs.state(),
            recent_folders: self.jobs.recent(),
            sessions: self.sessions.summaries(),
            active_session,
            conversation,
        }
    }

    /// Write every pending session before exit.
    pub fn shutdown(&self) {
        self.sessions.flush_all();
        info!("sessions flushed");
    }
}
