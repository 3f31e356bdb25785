use crate::core::config::data::{path_display, Config, Settings};

fn show<T: std::fmt::Display>(value: Option<T>) -> String {
    value
        .map(|v| v.to_string())
        .unwrap_or_else(|| "(unset)".to_string())
}

impl Config {
    pub fn print_all(&self) {
        println!("Current configuration:");
        println!("  backend-url: {}", show(self.backend_url.as_deref()));
        println!("  google-client-id: {}", show(self.google_client_id.as_deref()));
        println!(
            "  google-client-secret: {}",
            if self.google_client_secret.is_some() {
                "(set)"
            } else {
                "(unset)"
            }
        );
        println!("  session-capacity: {}", show(self.session_capacity));
        println!(
            "  recent-folder-capacity: {}",
            show(self.recent_folder_capacity)
        );
        println!("  persist-debounce-ms: {}", show(self.persist_debounce_ms));
        println!(
            "  identity-ready-timeout-secs: {}",
            show(self.identity_ready_timeout_secs)
        );
        println!(
            "  data-dir: {}",
            show(self.data_dir.as_ref().map(path_display))
        );
    }
}

impl Settings {
    pub fn print_effective(&self) {
        println!("Effective settings:");
        println!("  backend: {}", self.backend_url);
        println!(
            "  google sign-in: {}",
            if self.google_client_id.is_some() {
                "configured"
            } else {
                "missing client id"
            }
        );
        println!(
            "  limits: {} sessions, {} recent folders",
            self.session_capacity, self.recent_folder_capacity
        );
        println!(
            "  persistence debounce: {} ms",
            self.persist_debounce.as_millis()
        );
    }
}
