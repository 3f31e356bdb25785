//! Sending a user message and placing the answer in the right session.

use std::collections::HashSet;
use std::error::Error;
use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::api::{ApiError, Backend};
use crate::auth::Credential;
use crate::core::message::Message;
use crate::core::sessions::{ChatSessionStore, SessionId, StoreError};
use crate::utils::sync::lock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    Idle,
    Sending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    NotAuthenticated,
    /// No indexed folder to ask about.
    NoJob,
    EmptyMessage,
    /// A message for this session is still awaiting its answer.
    Busy,
    UnknownSession(SessionId),
    Exchange(ApiError),
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatError::NotAuthenticated => write!(f, "Sign in to start chatting."),
            ChatError::NoJob => write!(f, "Index a folder before asking questions."),
            ChatError::EmptyMessage => write!(f, "Type a message first."),
            ChatError::Busy => write!(f, "Still waiting for the previous answer."),
            ChatError::UnknownSession(id) => write!(f, "Unknown chat session: {id}"),
            ChatError::Exchange(err) => write!(f, "Sorry, I encountered an error: {err}"),
        }
    }
}

impl Error for ChatError {}

impl From<StoreError> for ChatError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UnknownSession(id) => ChatError::UnknownSession(id),
        }
    }
}

/// How a send resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The answer was appended to the originating session.
    Answered(Message),
    /// The exchange failed; `notice` was appended instead.
    Failed { error: ApiError, notice: Message },
    /// The user moved to another session before the result arrived.
    Discarded,
}

/// Marks a session as sending until dropped, including when the send is cancelled.
struct SendingGuard<'a> {
    sending: &'a Mutex<HashSet<SessionId>>,
    session_id: SessionId,
}

impl Drop for SendingGuard<'_> {
    fn drop(&mut self) {
        lock(self.sending).remove(&self.session_id);
    }
}

pub struct ConversationController {
    backend: Arc<dyn Backend>,
    sessions: Arc<ChatSessionStore>,
    sending: Mutex<HashSet<SessionId>>,
}

impl ConversationController {
    pub fn new(backend: Arc<dyn Backend>, sessions: Arc<ChatSessionStore>) -> Self {
        Self {
            backend,
            sessions,
            sending: Mutex::new(HashSet::new()),
        }
    }

    pub fn state(&self, session_id: &SessionId) -> ConversationState {
        if lock(&self.sending).contains(session_id) {
            ConversationState::Sending
        } else {
            ConversationState::Idle
        }
    }

    fn begin(&self, session_id: &SessionId) -> Result<SendingGuard<'_>, ChatError> {
        if !lock(&self.sending).insert(session_id.clone()) {
            return Err(ChatError::Busy);
        }
        Ok(SendingGuard {
            sending: &self.sending,
            session_id: session_id.clone(),
        })
    }

    pub async fn send(
        &self,
        text: &str,
        session_id: &SessionId,
        job_id: &str,
        credential: &Credential,
    ) -> Result<SendOutcome, ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let _sending = self.begin(session_id)?;
        self.sessions.append(session_id, Message::user(text))?;

        debug!(session = %session_id, job_id, "sending chat message");
        let result = self
            .backend
            .send_chat(&credential.access_token, job_id, text)
            .await;

        let (message, failure) = match result {
            Ok(response) => {
                let (answer, citations) = response.into_parts();
                (Message::bot(answer, citations), None)
            }
            Err(err) => {
                warn!(session = %session_id, error = %err, "chat request failed");
                let notice = Message::system(ChatError::Exchange(err.clone()).to_string());
                (notice, Some(err))
            }
        };

        match self.sessions.append_if_active(session_id, message.clone()) {
            Ok(true) => {}
            Ok(false) | Err(_) => {
                info!(session = %session_id, "discarding result for inactive session");
                return Ok(SendOutcome::Discarded);
            }
        }

        Ok(match failure {
            None => SendOutcome::Answered(message),
            Some(error) => SendOutcome::Failed {
                error,
                notice: message,
            },
        })
    }
}
