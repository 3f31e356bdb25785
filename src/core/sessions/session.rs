use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

use crate::core::constants::{SESSION_TITLE_ELLIPSIS, SESSION_TITLE_MAX_LEN, UNTITLED_SESSION};
use crate::core::jobs::JobId;
use crate::core::message::Message;

/// Opaque chat session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix used in listings.
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(8)
            .map(|(idx, _)| idx)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// One conversation thread, persisted as a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: SessionId,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub linked_job_id: Option<JobId>,
    pub last_updated_at: DateTime<Utc>,
    #[serde(default)]
    pub message_count: usize,
}

impl ChatSession {
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            title: None,
            messages: Vec::new(),
            linked_job_id: None,
            last_updated_at: Utc::now(),
            message_count: 0,
        }
    }

    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(UNTITLED_SESSION)
    }

    pub fn push(&mut self, message: Message) {
        if self.title.is_none() && message.is_user() {
            self.title = derive_title(&message.content);
        }
        self.messages.push(message);
        self.message_count = self.messages.len();
        self.touch();
    }

    pub fn link_job(&mut self, job_id: &str) {
        self.linked_job_id = Some(job_id.to_string());
        self.touch();
    }

    fn touch(&mut self) {
        let now = Utc::now();
        // Keep the timestamp monotonic even if the wall clock steps back.
        self.last_updated_at = now.max(self.last_updated_at);
    }
}

/// Title from the first user message: trimmed, cut at a grapheme boundary.
pub fn derive_title(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return None;
    }
    let mut graphemes = trimmed.graphemes(true);
    let head: String = graphemes.by_ref().take(SESSION_TITLE_MAX_LEN).collect();
    if graphemes.next().is_some() {
        Some(format!("{head}{SESSION_TITLE_ELLIPSIS}"))
    } else {
        Some(head)
    }
}
