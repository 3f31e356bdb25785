pub mod config;
pub mod constants;
pub mod conversation;
pub mod jobs;
pub mod message;
pub mod orchestrator;
pub mod sessions;
