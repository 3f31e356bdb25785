use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::constants::{
    DEFAULT_BACKEND_URL, DEFAULT_IDENTITY_READY_TIMEOUT, DEFAULT_PERSIST_DEBOUNCE,
    DEFAULT_RECENT_FOLDER_CAPACITY, DEFAULT_SESSION_CAPACITY,
};

pub const ENV_BACKEND_URL: &str = "FOLDERTALK_BACKEND_URL";
pub const ENV_GOOGLE_CLIENT_ID: &str = "FOLDERTALK_GOOGLE_CLIENT_ID";
pub const ENV_GOOGLE_CLIENT_SECRET: &str = "FOLDERTALK_GOOGLE_CLIENT_SECRET";

/// On-disk configuration. Every field is optional; [`Settings`] fills the gaps.
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct Config {
    /// Base URL of the indexing/chat backend
    pub backend_url: Option<String>,
    /// OAuth client id used for Google sign-in
    pub google_client_id: Option<String>,
    /// OAuth client secret, required by Google for desktop clients
    pub google_client_secret: Option<String>,
    /// Maximum number of chat sessions kept on disk
    pub session_capacity: Option<usize>,
    /// Maximum number of folders in the recent list
    pub recent_folder_capacity: Option<usize>,
    /// Debounce window for session writes, in milliseconds
    pub persist_debounce_ms: Option<u64>,
    /// Bound on the identity provider readiness wait, in seconds
    pub identity_ready_timeout_secs: Option<u64>,
    /// Overrides the platform data directory
    pub data_dir: Option<PathBuf>,
}

/// Effective values after applying defaults and environment overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub backend_url: String,
    pub google_client_id: Option<String>,
    pub google_client_secret: Option<String>,
    pub session_capacity: usize,
    pub recent_folder_capacity: usize,
    pub persist_debounce: Duration,
    pub identity_ready_timeout: Duration,
    pub data_dir: Option<PathBuf>,
}

impl Config {
    pub fn settings(&self) -> Settings {
        self.settings_with_env(|key| std::env::var(key).ok())
    }

    pub(crate) fn settings_with_env<F>(&self, env: F) -> Settings
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |key: &str| env(key).filter(|value| !value.trim().is_empty());
        Settings {
            backend_url: env(ENV_BACKEND_URL)
                .or_else(|| self.backend_url.clone())
                .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string()),
            google_client_id: env(ENV_GOOGLE_CLIENT_ID).or_else(|| self.google_client_id.clone()),
            google_client_secret: env(ENV_GOOGLE_CLIENT_SECRET)
                .or_else(|| self.google_client_secret.clone()),
            session_capacity: self
                .session_capacity
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_SESSION_CAPACITY),
            recent_folder_capacity: self
                .recent_folder_capacity
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_RECENT_FOLDER_CAPACITY),
            persist_debounce: self
                .persist_debounce_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_PERSIST_DEBOUNCE),
            identity_ready_timeout: self
                .identity_ready_timeout_secs
                .filter(|n| *n > 0)
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_IDENTITY_READY_TIMEOUT),
            data_dir: self.data_dir.clone(),
        }
    }
}

/// Get a user-friendly display string for a path
/// Converts absolute paths to use ~ notation on Unix-like systems when possible
pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}
