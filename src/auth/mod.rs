//! Authentication lifecycle.
//!
//! [`AuthGate`] moves between [`AuthState`]s, owns the [`Credential`] and
//! coalesces concurrent login attempts into one pending sign-in.

pub mod credential;
pub mod google;
pub mod identity;

use std::error::Error;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, info, warn};

pub use credential::{Credential, CredentialStore, KeyringCredentialStore, Profile};
pub use identity::{wait_until_ready, IdentityGrant, IdentityProvider, UnconfiguredIdentity};

use crate::api::Backend;
use crate::utils::sync::lock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The identity provider never became usable.
    IdentityUnavailable(String),
    /// The user or the provider aborted the interactive sign-in.
    SignInFailed(String),
    /// The backend refused the token.
    Rejected(String),
    /// A logout happened while the attempt was in flight.
    Cancelled,
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::IdentityUnavailable(reason) => {
                write!(f, "Sign-in is unavailable: {reason}")
            }
            AuthError::SignInFailed(reason) => write!(f, "Sign-in failed: {reason}"),
            AuthError::Rejected(reason) => {
                write!(f, "The backend rejected the sign-in: {reason}")
            }
            AuthError::Cancelled => write!(f, "Sign-in was cancelled by logout"),
        }
    }
}

impl Error for AuthError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    Authenticating,
    Authenticated(Credential),
}

impl AuthState {
    pub fn label(&self) -> &'static str {
        match self {
            AuthState::Unauthenticated => "signed out",
            AuthState::Authenticating => "signing in",
            AuthState::Authenticated(_) => "signed in",
        }
    }
}

type LoginAttempt = Shared<BoxFuture<'static, Result<Credential, AuthError>>>;

struct GateInner {
    state: AuthState,
    /// Bumped for every new attempt and every logout.
    epoch: u64,
    pending: Option<LoginAttempt>,
}

pub struct AuthGate {
    identity: Arc<dyn IdentityProvider>,
    backend: Arc<dyn Backend>,
    store: Arc<dyn CredentialStore>,
    ready_timeout: Duration,
    inner: Mutex<GateInner>,
}

impl AuthGate {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        backend: Arc<dyn Backend>,
        store: Arc<dyn CredentialStore>,
        ready_timeout: Duration,
    ) -> Self {
        Self {
            identity,
            backend,
            store,
            ready_timeout,
            inner: Mutex::new(GateInner {
                state: AuthState::Unauthenticated,
                epoch: 0,
                pending: None,
            }),
        }
    }

    pub fn state(&self) -> AuthState {
        lock(&self.inner).state.clone()
    }

    pub fn credential(&self) -> Option<Credential> {
        match &lock(&self.inner).state {
            AuthState::Authenticated(credential) => Some(credential.clone()),
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(lock(&self.inner).state, AuthState::Authenticated(_))
    }

    /// Adopt the persisted credential, if any, without signing in again.
    pub fn restore(&self) -> bool {
        let stored = match self.store.load() {
            Ok(stored) => stored,
            Err(err) => {
                warn!(error = %err, "could not read stored credential");
                return false;
            }
        };
        let Some(credential) = stored else {
            return false;
        };

        let mut inner = lock(&self.inner);
        if !matches!(inner.state, AuthState::Unauthenticated) {
            return false;
        }
        info!(email = %credential.profile.email, "restored stored credential");
        inner.state = AuthState::Authenticated(credential);
        true
    }

    /// Sign in, or join the sign-in already in flight.
    pub async fn login(&self) -> Result<Credential, AuthError> {
        let (epoch, attempt) = {
            let mut inner = lock(&self.inner);
            if let AuthState::Authenticated(credential) = &inner.state {
                return Ok(credential.clone());
            }
            match &inner.pending {
                Some(attempt) => {
                    debug!("joining pending login");
                    (inner.epoch, attempt.clone())
                }
                None => {
                    inner.epoch += 1;
                    let attempt = attempt_login(
                        Arc::clone(&self.identity),
                        Arc::clone(&self.backend),
                        self.ready_timeout,
                    )
                    .boxed()
                    .shared();
                    inner.pending = Some(attempt.clone());
                    inner.state = AuthState::Authenticating;
                    info!("login started");
                    (inner.epoch, attempt)
                }
            }
        };

        let result = attempt.await;
        self.settle(epoch, result)
    }

    fn settle(
        &self,
        epoch: u64,
        result: Result<Credential, AuthError>,
    ) -> Result<Credential, AuthError> {
        let mut inner = lock(&self.inner);
        if inner.epoch != epoch {
            debug!("discarding login result after logout");
            return Err(AuthError::Cancelled);
        }
        if inner.pending.is_none() {
            // Another caller of the same attempt already settled it.
            return result;
        }
        inner.pending = None;
        match &result {
            Ok(credential) => {
                inner.state = AuthState::Authenticated(credential.clone());
                info!(email = %credential.profile.email, "login succeeded");
                // Saved under the gate lock so a concurrent logout clears it afterwards.
                if let Err(err) = self.store.save(credential) {
                    warn!(error = %err, "could not persist credential");
                }
            }
            Err(err) => {
                inner.state = AuthState::Unauthenticated;
                warn!(error = %err, "login failed");
            }
        }
        result
    }

    /// Drop the credential and any pending attempt. Chat history is untouched.
    pub fn logout(&self) {
        {
            let mut inner = lock(&self.inner);
            inner.epoch += 1;
            inner.pending = None;
            inner.state = AuthState::Unauthenticated;
        }
        if let Err(err) = self.store.clear() {
            warn!(error = %err, "could not clear stored credential");
        }
        info!("logged out");
    }
}

async fn attempt_login(
    identity: Arc<dyn IdentityProvider>,
    backend: Arc<dyn Backend>,
    ready_timeout: Duration,
) -> Result<Credential, AuthError> {
    wait_until_ready(identity.as_ref(), ready_timeout).await?;
    let grant = identity.sign_in().await.map_err(AuthError::SignInFailed)?;
    let confirmation = backend
        .authenticate(&grant.access_token, grant.id_token.as_deref())
        .await
        .map_err(|err| AuthError::Rejected(err.to_string()))?;

    Ok(Credential {
        access_token: grant.access_token,
        id_token: grant.id_token,
        profile: grant.profile,
        backend_session: confirmation.session_id,
    })
}
