//! Google sign-in over an OAuth 2.0 loopback redirect with PKCE.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::auth::credential::Profile;
use crate::auth::identity::{IdentityGrant, IdentityProvider};

pub const GOOGLE_DISCOVERY_URL: &str =
    "https://accounts.google.com/.well-known/openid-configuration";

pub const GOOGLE_SCOPES: &str =
    "openid email profile https://www.googleapis.com/auth/drive.readonly";

const CALLBACK_PATH: &str = "/oauth/callback";
const CALLBACK_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryDocument {
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub userinfo_endpoint: String,
}

#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub id_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    id: Option<String>,
    sub: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    picture: Option<String>,
}

impl From<UserInfo> for Profile {
    fn from(info: UserInfo) -> Self {
        let email = info.email.unwrap_or_default();
        Profile {
            id: info.id.or(info.sub).unwrap_or_default(),
            name: info.name.unwrap_or_else(|| email.clone()),
            email,
            image_url: info.picture,
        }
    }
}

pub struct GoogleIdentity {
    client: reqwest::Client,
    client_id: String,
    client_secret: Option<String>,
    discovery_url: String,
    discovery: OnceCell<DiscoveryDocument>,
}

impl GoogleIdentity {
    pub fn new(client: reqwest::Client, client_id: String, client_secret: Option<String>) -> Self {
        Self {
            client,
            client_id,
            client_secret,
            discovery_url: GOOGLE_DISCOVERY_URL.to_string(),
            discovery: OnceCell::new(),
        }
    }

    async fn discovery(&self) -> Result<&DiscoveryDocument, String> {
        self.discovery
            .get_or_try_init(|| async {
                debug!(url = %self.discovery_url, "fetching OpenID discovery document");
                let response = self
                    .client
                    .get(&self.discovery_url)
                    .send()
                    .await
                    .map_err(|err| err.to_string())?;
                if !response.status().is_success() {
                    return Err(format!("discovery returned {}", response.status()));
                }
                response
                    .json::<DiscoveryDocument>()
                    .await
                    .map_err(|err| err.to_string())
            })
            .await
    }

    async fn exchange_code(
        &self,
        token_endpoint: &str,
        redirect_uri: &str,
        code: &str,
        code_verifier: &str,
    ) -> Result<TokenResponse, String> {
        let mut form_fields = vec![
            ("grant_type", "authorization_code"),
            ("redirect_uri", redirect_uri),
            ("code", code),
            ("code_verifier", code_verifier),
            ("client_id", self.client_id.as_str()),
        ];
        if let Some(secret) = self.client_secret.as_deref() {
            form_fields.push(("client_secret", secret));
        }
        let response = self
            .client
            .post(token_endpoint)
            .form(&form_fields)
            .send()
            .await
            .map_err(|err| err.to_string())?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(format!("token exchange failed ({status}): {text}"));
        }
        response
            .json::<TokenResponse>()
            .await
            .map_err(|err| err.to_string())
    }

    async fn fetch_profile(
        &self,
        userinfo_endpoint: &str,
        access_token: &str,
    ) -> Result<Profile, String> {
        let response = self
            .client
            .get(userinfo_endpoint)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|err| err.to_string())?;
        if !response.status().is_success() {
            return Err(format!(
                "failed to fetch user profile: {}",
                response.status()
            ));
        }
        let info = response
            .json::<UserInfo>()
            .await
            .map_err(|err| err.to_string())?;
        Ok(info.into())
    }
}

#[async_trait]
impl IdentityProvider for GoogleIdentity {
    async fn ready(&self) -> Result<(), String> {
        self.discovery().await.map(|_| ())
    }

    async fn sign_in(&self) -> Result<IdentityGrant, String> {
        let discovery = self.discovery().await?.clone();

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|err| format!("could not open callback listener: {err}"))?;
        let port = listener
            .local_addr()
            .map_err(|err| err.to_string())?
            .port();
        let redirect_uri = format!("http://127.0.0.1:{port}{CALLBACK_PATH}");
        let state = random_urlsafe(24);
        let verifier = random_urlsafe(48);
        let challenge = pkce_s256_challenge(&verifier);

        let url = build_authorization_url(
            &discovery.authorization_endpoint,
            &self.client_id,
            &redirect_uri,
            &state,
            &challenge,
        )?;
        eprintln!("Opening your browser to sign in with Google.");
        eprintln!("If it does not open, visit:\n  {url}");
        if let Err(err) = open_in_browser(url.as_str()) {
            debug!(error = %err, "browser launch failed");
        }

        let code = wait_for_oauth_callback(listener, &state).await?;
        let token = self
            .exchange_code(&discovery.token_endpoint, &redirect_uri, &code, &verifier)
            .await?;
        let profile = self
            .fetch_profile(&discovery.userinfo_endpoint, &token.access_token)
            .await?;
        info!(email = %profile.email, "Google sign-in completed");

        Ok(IdentityGrant {
            access_token: token.access_token,
            id_token: token.id_token,
            profile,
        })
    }
}

pub fn build_authorization_url(
    authorization_endpoint: &str,
    client_id: &str,
    redirect_uri: &str,
    state: &str,
    code_challenge: &str,
) -> Result<reqwest::Url, String> {
    let mut url = reqwest::Url::parse(authorization_endpoint).map_err(|err| err.to_string())?;
    url.query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", client_id)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("scope", GOOGLE_SCOPES)
        .append_pair("state", state)
        .append_pair("code_challenge", code_challenge)
        .append_pair("code_challenge_method", "S256")
        .append_pair("access_type", "online")
        .append_pair("prompt", "select_account");
    Ok(url)
}

/// Reads the OAuth redirect off `listener` and returns the authorization code.
pub async fn wait_for_oauth_callback(
    listener: TcpListener,
    expected_state: &str,
) -> Result<String, String> {
    let (mut stream, _) = tokio::time::timeout(CALLBACK_TIMEOUT, listener.accept())
        .await
        .map_err(|_| "timed out waiting for the browser to complete sign-in".to_string())?
        .map_err(|err| err.to_string())?;
    let mut buffer = vec![0_u8; 16 * 1024];
    let bytes_read = stream
        .read(&mut buffer)
        .await
        .map_err(|err| err.to_string())?;
    if bytes_read == 0 {
        return Err("OAuth callback received no data".to_string());
    }
    let request = String::from_utf8_lossy(&buffer[..bytes_read]);
    let target = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .ok_or("OAuth callback request line missing")?;
    let callback_url = reqwest::Url::parse(&format!("http://localhost{target}"))
        .map_err(|err| err.to_string())?;

    let mut state = None::<String>;
    let mut code = None::<String>;
    let mut error = None::<String>;
    for (key, value) in callback_url.query_pairs() {
        match key.as_ref() {
            "state" => state = Some(value.to_string()),
            "code" => code = Some(value.to_string()),
            "error" => error = Some(value.to_string()),
            _ => {}
        }
    }

    let outcome = match (error, state.as_deref() == Some(expected_state), code) {
        (Some(error), _, _) => Err(format!("Google returned an error: {error}")),
        (None, false, _) => Err("OAuth callback state mismatch".to_string()),
        (None, true, None) => Err("OAuth callback missing code".to_string()),
        (None, true, Some(code)) => Ok(code),
    };

    let (status, heading) = match &outcome {
        Ok(_) => ("200 OK", "You're signed in to foldertalk."),
        Err(_) => ("400 Bad Request", "Sign-in did not complete."),
    };
    write_callback_response(&mut stream, status, heading)
        .await
        .map_err(|err| err.to_string())?;
    outcome
}

async fn write_callback_response(
    stream: &mut tokio::net::TcpStream,
    status: &str,
    heading: &str,
) -> std::io::Result<()> {
    let body = format!(
        "<!doctype html><html><head><title>foldertalk</title></head>\
<body><h1>{heading}</h1><p>You can close this tab and return to the terminal.</p></body></html>"
    );
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await
}

pub fn open_in_browser(url: &str) -> Result<(), String> {
    #[cfg(target_os = "macos")]
    let mut command = std::process::Command::new("open");
    #[cfg(target_os = "windows")]
    let mut command = {
        let mut command = std::process::Command::new("cmd");
        command.args(["/C", "start", ""]);
        command
    };
    #[cfg(all(unix, not(target_os = "macos")))]
    let mut command = std::process::Command::new("xdg-open");

    let status = command.arg(url).status().map_err(|err| err.to_string())?;
    if status.success() {
        Ok(())
    } else {
        Err(format!("browser launcher exited with {status}"))
    }
}

pub fn random_urlsafe(bytes_len: usize) -> String {
    let mut bytes = vec![0_u8; bytes_len];
    if let Err(err) = getrandom::fill(&mut bytes) {
        // The OS RNG is unavailable; uuid's generator is the fallback source.
        debug!(error = %err, "getrandom failed, falling back to uuid entropy");
        for chunk in bytes.chunks_mut(16) {
            let random = uuid::Uuid::new_v4();
            chunk.copy_from_slice(&random.as_bytes()[..chunk.len()]);
        }
    }
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

pub fn pkce_s256_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest)
}
