use std::time::Duration;

/// Upper bound on persisted chat sessions.
pub const DEFAULT_SESSION_CAPACITY: usize = 50;

/// Upper bound on the recent-folders list.
pub const DEFAULT_RECENT_FOLDER_CAPACITY: usize = 20;

/// Quiet period before a mutated session is written to disk.
pub const DEFAULT_PERSIST_DEBOUNCE: Duration = Duration::from_millis(1000);

/// How long login waits for the identity provider to become usable.
pub const DEFAULT_IDENTITY_READY_TIMEOUT: Duration = Duration::from_secs(10);

/// Attempts made for a session write before giving up until the next mutation.
pub const PERSIST_MAX_ATTEMPTS: u32 = 3;

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8000";

/// Grapheme clusters kept from the first user message when titling a session.
pub const SESSION_TITLE_MAX_LEN: usize = 50;

pub const SESSION_TITLE_ELLIPSIS: &str = "...";

pub const UNTITLED_SESSION: &str = "New Chat";
