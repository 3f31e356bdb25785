//! HTTP contract with the indexing/answering backend.
//!
//! [`Backend`] is the seam the rest of the crate talks through;
//! [`HttpBackend`] is the `reqwest` implementation.

pub mod models;

use std::error::Error;
use std::fmt;

use async_trait::async_trait;
use tracing::debug;

pub use models::{
    AuthRequest, AuthResponse, ChatRequest, ChatResponse, CitationPayload, IndexRequest,
    IndexResponse, IndexStatusResponse,
};

use crate::utils::url::construct_api_url;

/// Failure talking to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The request never produced a response (connection refused, DNS, TLS, ...).
    Transport(String),
    /// The backend answered with a non-success status.
    Status { status: u16, summary: String },
    /// The response body did not match the expected shape.
    Decode(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Transport(detail) => write!(f, "could not reach backend: {detail}"),
            ApiError::Status { status, summary } if summary.is_empty() => {
                write!(f, "backend returned status {status}")
            }
            ApiError::Status { status, summary } => {
                write!(f, "backend returned status {status}: {summary}")
            }
            ApiError::Decode(detail) => write!(f, "unexpected backend response: {detail}"),
        }
    }
}

impl Error for ApiError {}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else {
            ApiError::Transport(err.to_string())
        }
    }
}

#[async_trait]
pub trait Backend: Send + Sync {
    async fn authenticate(
        &self,
        access_token: &str,
        id_token: Option<&str>,
    ) -> Result<AuthResponse, ApiError>;

    async fn submit_index(
        &self,
        access_token: &str,
        folder_url: &str,
    ) -> Result<IndexResponse, ApiError>;

    async fn index_status(
        &self,
        access_token: &str,
        job_id: &str,
    ) -> Result<IndexStatusResponse, ApiError>;

    async fn send_chat(
        &self,
        access_token: &str,
        job_id: &str,
        message: &str,
    ) -> Result<ChatResponse, ApiError>;
}

#[derive(Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                summary: summarize_error_body(&body),
            });
        }
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|err| ApiError::Decode(err.to_string()))
    }

    async fn post_json<B, T>(&self, endpoint: &str, body: &B) -> Result<T, ApiError>
    where
        B: serde::Serialize + Sync,
        T: serde::de::DeserializeOwned,
    {
        let url = construct_api_url(&self.base_url, endpoint);
        debug!(%url, "POST");
        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;
        Self::decode(response).await
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn authenticate(
        &self,
        access_token: &str,
        id_token: Option<&str>,
    ) -> Result<AuthResponse, ApiError> {
        self.post_json(
            "auth/google",
            &AuthRequest {
                access_token,
                id_token,
            },
        )
        .await
    }

    async fn submit_index(
        &self,
        access_token: &str,
        folder_url: &str,
    ) -> Result<IndexResponse, ApiError> {
        self.post_json(
            "index",
            &IndexRequest {
                access_token,
                folder_url,
            },
        )
        .await
    }

    async fn index_status(
        &self,
        access_token: &str,
        job_id: &str,
    ) -> Result<IndexStatusResponse, ApiError> {
        let url = construct_api_url(&self.base_url, &format!("index/{job_id}"));
        debug!(%url, "GET");
        let response = self
            .client
            .get(url)
            .header("Authorization", format!("Bearer {access_token}"))
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn send_chat(
        &self,
        access_token: &str,
        job_id: &str,
        message: &str,
    ) -> Result<ChatResponse, ApiError> {
        self.post_json(
            "chat",
            &ChatRequest {
                access_token,
                job_id,
                message,
            },
        )
        .await
    }
}

fn extract_error_summary(value: &serde_json::Value) -> Option<String> {
    value
        .get("detail")
        .and_then(|detail| match detail {
            serde_json::Value::String(s) => Some(s.clone()),
            // FastAPI validation errors: [{"msg": ...}, ...]
            serde_json::Value::Array(items) => {
                let msgs: Vec<&str> = items
                    .iter()
                    .filter_map(|item| item.get("msg").and_then(|m| m.as_str()))
                    .collect();
                (!msgs.is_empty()).then(|| msgs.join("; "))
            }
            _ => None,
        })
        .or_else(|| {
            value
                .pointer("/error/message")
                .and_then(|v| v.as_str())
                .map(str::to_owned)
        })
        .or_else(|| {
            value
                .get("error")
                .and_then(|v| v.as_str())
                .map(str::to_owned)
        })
        .or_else(|| {
            value
                .get("message")
                .and_then(|v| v.as_str())
                .map(str::to_owned)
        })
}

/// Collapse an error body into a single line suitable for a chat notice.
pub fn summarize_error_body(body: &str) -> String {
    let trimmed = body.trim();
    let text = serde_json::from_str::<serde_json::Value>(trimmed)
        .ok()
        .and_then(|value| extract_error_summary(&value))
        .unwrap_or_else(|| trimmed.to_string());
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    const MAX: usize = 200;
    if collapsed.chars().count() > MAX {
        let cut: String = collapsed.chars().take(MAX).collect();
        format!("{cut}…")
    } else {
        collapsed
    }
}
