use crate::core::config::data::Config;
use std::path::PathBuf;

/// Keys accepted by `foldertalk set` / `foldertalk unset`.
pub const CONFIG_KEYS: &[&str] = &[
    "backend-url",
    "google-client-id",
    "google-client-secret",
    "session-capacity",
    "recent-folder-capacity",
    "persist-debounce-ms",
    "identity-ready-timeout-secs",
    "data-dir",
];

fn parse_positive(key: &str, value: &str) -> Result<u64, String> {
    match value.trim().parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(format!("{key} expects a positive integer, got '{value}'")),
    }
}

impl Config {
    /// Applies `value` to `key`, returning a confirmation line.
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<String, String> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(format!("{key} requires a value"));
        }
        match key {
            "backend-url" => self.backend_url = Some(trimmed.trim_end_matches('/').to_string()),
            "google-client-id" => self.google_client_id = Some(trimmed.to_string()),
            "google-client-secret" => self.google_client_secret = Some(trimmed.to_string()),
            "session-capacity" => {
                self.session_capacity = Some(parse_positive(key, trimmed)? as usize)
            }
            "recent-folder-capacity" => {
                self.recent_folder_capacity = Some(parse_positive(key, trimmed)? as usize)
            }
            "persist-debounce-ms" => {
                let ms = trimmed
                    .parse::<u64>()
                    .map_err(|_| format!("{key} expects an integer, got '{value}'"))?;
                self.persist_debounce_ms = Some(ms);
            }
            "identity-ready-timeout-secs" => {
                self.identity_ready_timeout_secs = Some(parse_positive(key, trimmed)?)
            }
            "data-dir" => self.data_dir = Some(PathBuf::from(trimmed)),
            _ => return Err(unknown_key(key)),
        }
        Ok(format!("✅ Set {key} to: {trimmed}"))
    }

    pub fn unset_value(&mut self, key: &str) -> Result<String, String> {
        match key {
            "backend-url" => self.backend_url = None,
            "google-client-id" => self.google_client_id = None,
            "google-client-secret" => self.google_client_secret = None,
            "session-capacity" => self.session_capacity = None,
            "recent-folder-capacity" => self.recent_folder_capacity = None,
            "persist-debounce-ms" => self.persist_debounce_ms = None,
            "identity-ready-timeout-secs" => self.identity_ready_timeout_secs = None,
            "data-dir" => self.data_dir = None,
            _ => return Err(unknown_key(key)),
        }
        Ok(format!("✅ Unset {key}"))
    }
}

fn unknown_key(key: &str) -> String {
    format!(
        "Unknown config key: {key}. Available keys: {}",
        CONFIG_KEYS.join(", ")
    )
}
