//! Fakes and fixtures shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::api::{
    ApiError, AuthResponse, Backend, ChatResponse, CitationPayload, IndexResponse,
    IndexStatusResponse,
};
use crate::auth::{Credential, CredentialStore, IdentityGrant, IdentityProvider, Profile};
use crate::core::sessions::{ChatSession, PersistError, SessionId, SessionRepository};
use crate::utils::sync::lock;

pub fn sample_profile() -> Profile {
    Profile {
        id: "user-1".to_string(),
        name: "Ada Lovelace".to_string(),
        email: "ada@example.com".to_string(),
        image_url: None,
    }
}

pub fn sample_credential() -> Credential {
    Credential {
        access_token: "access-token-1".to_string(),
        id_token: Some("id-token-1".to_string()),
        profile: sample_profile(),
        backend_session: Some("session_1".to_string()),
    }
}

/// Lets a test hold a fake call open and observe that it started.
pub struct CallGate {
    started: Semaphore,
    release: Semaphore,
}

impl Default for CallGate {
    fn default() -> Self {
        Self {
            started: Semaphore::new(0),
            release: Semaphore::new(0),
        }
    }
}

impl CallGate {
    async fn pass(&self) {
        self.started.add_permits(1);
        if let Ok(permit) = self.release.acquire().await {
            permit.forget();
        }
    }

    pub async fn wait_started(&self) {
        if let Ok(permit) = self.started.acquire().await {
            permit.forget();
        }
    }

    pub fn release(&self) {
        self.release.add_permits(1);
    }
}

enum Readiness {
    Ready,
    Never,
    Failing(String),
}

pub struct FakeIdentity {
    readiness: Readiness,
    sign_in_error: Option<String>,
    gate: Option<CallGate>,
    sign_in_calls: AtomicUsize,
}

impl FakeIdentity {
    fn with_readiness(readiness: Readiness) -> Self {
        Self {
            readiness,
            sign_in_error: None,
            gate: None,
            sign_in_calls: AtomicUsize::new(0),
        }
    }

    pub fn ready() -> Self {
        Self::with_readiness(Readiness::Ready)
    }

    pub fn never_ready() -> Self {
        Self::with_readiness(Readiness::Never)
    }

    pub fn failing_ready(reason: &str) -> Self {
        Self::with_readiness(Readiness::Failing(reason.to_string()))
    }

    pub fn failing_sign_in(mut self, reason: &str) -> Self {
        self.sign_in_error = Some(reason.to_string());
        self
    }

    pub fn with_sign_in_gate(mut self) -> Self {
        self.gate = Some(CallGate::default());
        self
    }

    pub async fn wait_for_sign_in_started(&self) {
        if let Some(gate) = &self.gate {
            gate.wait_started().await;
        }
    }

    pub fn release_sign_in(&self) {
        if let Some(gate) = &self.gate {
            gate.release();
        }
    }

    pub fn sign_in_calls(&self) -> usize {
        self.sign_in_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentity {
    async fn ready(&self) -> Result<(), String> {
        match &self.readiness {
            Readiness::Ready => Ok(()),
            Readiness::Never => std::future::pending().await,
            Readiness::Failing(reason) => Err(reason.clone()),
        }
    }

    async fn sign_in(&self) -> Result<IdentityGrant, String> {
        self.sign_in_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.pass().await;
        }
        if let Some(reason) = &self.sign_in_error {
            return Err(reason.clone());
        }
        let credential = sample_credential();
        Ok(IdentityGrant {
            access_token: credential.access_token,
            id_token: credential.id_token,
            profile: credential.profile,
        })
    }
}

#[derive(Default)]
pub struct MemoryCredentialStore {
    credential: Mutex<Option<Credential>>,
}

impl MemoryCredentialStore {
    pub fn current(&self) -> Option<Credential> {
        lock(&self.credential).clone()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<Option<Credential>, Box<dyn Error + Send + Sync>> {
        Ok(self.current())
    }

    fn save(&self, credential: &Credential) -> Result<(), Box<dyn Error + Send + Sync>> {
        *lock(&self.credential) = Some(credential.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        *lock(&self.credential) = None;
        Ok(())
    }
}

#[derive(Default)]
struct BackendScript {
    reject_auth: bool,
    index_reply: Option<IndexResponse>,
    index_failures: VecDeque<ApiError>,
    status_reply: Option<IndexStatusResponse>,
    chat_answer: Option<(String, Vec<CitationPayload>)>,
    chat_failures: VecDeque<ApiError>,
}

/// Scripted in-process backend.
#[derive(Default)]
pub struct FakeBackend {
    script: Mutex<BackendScript>,
    auth_calls: AtomicUsize,
    index_requests: Mutex<Vec<String>>,
    chat_requests: Mutex<Vec<(String, String)>>,
    index_gate: Option<CallGate>,
    chat_gate: Option<CallGate>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting_auth(self) -> Self {
        lock(&self.script).reject_auth = true;
        self
    }

    pub fn auth_calls(&self) -> usize {
        self.auth_calls.load(Ordering::SeqCst)
    }

    pub fn with_index_reply(self, job_id: &str, name: Option<&str>, files: Option<u64>) -> Self {
        self.set_index_reply(job_id, name, files);
        self
    }

    pub fn set_index_reply(&self, job_id: &str, name: Option<&str>, files: Option<u64>) {
        lock(&self.script).index_reply = Some(IndexResponse {
            job_id: job_id.to_string(),
            folder_name: name.map(str::to_string),
            files_count: files,
            status: Some("completed".to_string()),
        });
    }

    pub fn fail_next_index(&self, err: ApiError) {
        lock(&self.script).index_failures.push_back(err);
    }

    pub fn with_index_gate(mut self) -> Self {
        self.index_gate = Some(CallGate::default());
        self
    }

    pub async fn wait_for_index_started(&self) {
        if let Some(gate) = &self.index_gate {
            gate.wait_started().await;
        }
    }

    pub fn release_index(&self) {
        if let Some(gate) = &self.index_gate {
            gate.release();
        }
    }

    pub fn index_requests(&self) -> Vec<String> {
        lock(&self.index_requests).clone()
    }

    pub fn set_status_reply(&self, status: &str, files: Option<u64>) {
        lock(&self.script).status_reply = Some(IndexStatusResponse {
            job_id: String::new(),
            status: status.to_string(),
            files_count: files,
        });
    }

    /// `citations` are `(file_name, url)` pairs.
    pub fn with_chat_reply(self, answer: &str, citations: &[(&str, Option<&str>)]) -> Self {
        self.set_chat_reply(answer, citations);
        self
    }

    pub fn set_chat_reply(&self, answer: &str, citations: &[(&str, Option<&str>)]) {
        let citations = citations
            .iter()
            .map(|(file_name, url)| CitationPayload {
                file_name: file_name.to_string(),
                file_id: None,
                url: url.map(str::to_string),
                source: None,
            })
            .collect();
        lock(&self.script).chat_answer = Some((answer.to_string(), citations));
    }

    pub fn fail_next_chat(&self, err: ApiError) {
        lock(&self.script).chat_failures.push_back(err);
    }

    pub fn with_chat_gate(mut self) -> Self {
        self.chat_gate = Some(CallGate::default());
        self
    }

    pub async fn wait_for_chat_started(&self) {
        if let Some(gate) = &self.chat_gate {
            gate.wait_started().await;
        }
    }

    pub fn release_chat(&self) {
        if let Some(gate) = &self.chat_gate {
            gate.release();
        }
    }

    /// `(job_id, message)` per chat call.
    pub fn chat_requests(&self) -> Vec<(String, String)> {
        lock(&self.chat_requests).clone()
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn authenticate(
        &self,
        _access_token: &str,
        _id_token: Option<&str>,
    ) -> Result<AuthResponse, ApiError> {
        self.auth_calls.fetch_add(1, Ordering::SeqCst);
        if lock(&self.script).reject_auth {
            return Err(ApiError::Status {
                status: 401,
                summary: "Invalid token".to_string(),
            });
        }
        Ok(AuthResponse {
            session_id: Some("session_1".to_string()),
        })
    }

    async fn submit_index(
        &self,
        _access_token: &str,
        folder_url: &str,
    ) -> Result<IndexResponse, ApiError> {
        lock(&self.index_requests).push(folder_url.to_string());
        if let Some(gate) = &self.index_gate {
            gate.pass().await;
        }
        let mut script = lock(&self.script);
        if let Some(err) = script.index_failures.pop_front() {
            return Err(err);
        }
        script
            .index_reply
            .clone()
            .ok_or_else(|| ApiError::Transport("no index reply scripted".to_string()))
    }

    async fn index_status(
        &self,
        _access_token: &str,
        job_id: &str,
    ) -> Result<IndexStatusResponse, ApiError> {
        let mut reply = lock(&self.script)
            .status_reply
            .clone()
            .ok_or_else(|| ApiError::Transport("no status reply scripted".to_string()))?;
        reply.job_id = job_id.to_string();
        Ok(reply)
    }

    async fn send_chat(
        &self,
        _access_token: &str,
        job_id: &str,
        message: &str,
    ) -> Result<ChatResponse, ApiError> {
        lock(&self.chat_requests).push((job_id.to_string(), message.to_string()));
        if let Some(gate) = &self.chat_gate {
            gate.pass().await;
        }
        let mut script = lock(&self.script);
        if let Some(err) = script.chat_failures.pop_front() {
            return Err(err);
        }
        let (answer, citations) = script
            .chat_answer
            .clone()
            .unwrap_or_else(|| (format!("Echo: {message}"), Vec::new()));
        Ok(ChatResponse { answer, citations })
    }
}

/// Session repository kept in memory, counting writes.
#[derive(Default)]
pub struct MemorySessionRepository {
    sessions: Mutex<HashMap<SessionId, ChatSession>>,
    writes: AtomicUsize,
    failures_left: AtomicUsize,
}

impl MemorySessionRepository {
    pub fn seeded(sessions: Vec<ChatSession>) -> Self {
        let repository = Self::default();
        {
            let mut stored = lock(&repository.sessions);
            for session in sessions {
                stored.insert(session.id.clone(), session);
            }
        }
        repository
    }

    /// Successful saves so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn stored(&self, id: &SessionId) -> Option<ChatSession> {
        lock(&self.sessions).get(id).cloned()
    }

    pub fn stored_ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = lock(&self.sessions).keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Make the next `count` saves fail.
    pub fn fail_next_saves(&self, count: usize) {
        self.failures_left.store(count, Ordering::SeqCst);
    }
}

impl SessionRepository for MemorySessionRepository {
    fn save(&self, session: &ChatSession) -> Result<(), PersistError> {
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(PersistError::Io {
                path: format!("memory/{}", session.id).into(),
                source: std::io::Error::other("disk full"),
            });
        }
        lock(&self.sessions).insert(session.id.clone(), session.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn delete(&self, id: &SessionId) -> Result<(), PersistError> {
        lock(&self.sessions).remove(id);
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<ChatSession>, PersistError> {
        Ok(lock(&self.sessions).values().cloned().collect())
    }
}

pub fn test_client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .build()
        .expect("test client")
}

pub async fn read_http_request(
    stream: &mut TcpStream,
) -> Result<(String, Vec<(String, String)>, Vec<u8>), String> {
    use tokio::io::AsyncReadExt;

    let mut buffer = Vec::new();
    let header_end = loop {
        if let Some(end) = buffer
            .windows(4)
            .position(|window| window == b"\r\n\r\n")
            .map(|index| index + 4)
        {
            break end;
        }
        let mut chunk = [0_u8; 1024];
        let read = stream.read(&mut chunk).await.map_err(|err| err.to_string())?;
        if read == 0 {
            return Err("connection closed before headers ended".to_string());
        }
        buffer.extend_from_slice(&chunk[..read]);
    };

    let header_text =
        std::str::from_utf8(&buffer[..header_end]).map_err(|err| err.to_string())?;
    let mut lines = header_text.split("\r\n").filter(|line| !line.is_empty());
    let request_line = lines
        .next()
        .ok_or_else(|| "missing request line".to_string())?
        .to_string();

    let mut headers = Vec::new();
    let mut content_length = 0_usize;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().to_string();
        if name.eq_ignore_ascii_case("content-length") {
            content_length = value.parse().map_err(|_| "bad content-length".to_string())?;
        }
        headers.push((name.to_string(), value));
    }

    let mut body = buffer[header_end..].to_vec();
    while body.len() < content_length {
        let mut chunk = vec![0_u8; content_length - body.len()];
        let read = stream.read(&mut chunk).await.map_err(|err| err.to_string())?;
        if read == 0 {
            return Err("connection closed before body ended".to_string());
        }
        body.extend_from_slice(&chunk[..read]);
    }
    body.truncate(content_length);
    Ok((request_line, headers, body))
}

/// Serve one canned JSON response per connection, in order. The handle
/// yields each request line and body once every response has been sent.
pub async fn spawn_mock_http(
    responses: Vec<(&'static str, String)>,
) -> (String, JoinHandle<Vec<(String, Vec<u8>)>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock");
    let addr = listener.local_addr().expect("mock addr");
    let handle = tokio::spawn(async move {
        let mut captured = Vec::new();
        for (status, body) in responses {
            let (mut stream, _) = listener.accept().await.expect("accept");
            let (request_line, _, request_body) =
                read_http_request(&mut stream).await.expect("read request");
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream
                .write_all(response.as_bytes())
                .await
                .expect("write response");
            let _ = stream.shutdown().await;
            captured.push((request_line, request_body));
        }
        captured
    });
    (format!("http://{addr}"), handle)
}
