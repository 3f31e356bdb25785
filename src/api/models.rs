//! Request and response payloads exchanged with the backend.

use serde::{Deserialize, Serialize};

use crate::core::message::Citation;

#[derive(Debug, Serialize)]
pub struct AuthRequest<'a> {
    pub access_token: &'a str,
    pub id_token: Option<&'a str>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AuthResponse {
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct IndexRequest<'a> {
    pub access_token: &'a str,
    pub folder_url: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexResponse {
    pub job_id: String,
    #[serde(default)]
    pub folder_name: Option<String>,
    #[serde(default)]
    pub files_count: Option<u64>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexStatusResponse {
    pub job_id: String,
    pub status: String,
    #[serde(default)]
    pub files_count: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct ChatRequest<'a> {
    pub access_token: &'a str,
    pub job_id: &'a str,
    pub message: &'a str,
}

/// Citation as the backend sends it. Only `file_name` is guaranteed.
#[derive(Debug, Clone, Deserialize)]
pub struct CitationPayload {
    pub file_name: String,
    #[serde(default)]
    pub file_id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    pub answer: String,
    #[serde(default)]
    pub citations: Vec<CitationPayload>,
}

impl From<CitationPayload> for Citation {
    fn from(payload: CitationPayload) -> Self {
        let source_reference = payload.url.or(payload.source).or(payload.file_id);
        Citation::new(payload.file_name, source_reference)
    }
}

impl ChatResponse {
    pub fn into_parts(self) -> (String, Vec<Citation>) {
        let citations = self.citations.into_iter().map(Citation::from).collect();
        (self.answer, citations)
    }
}
