use std::time::Duration;

use async_trait::async_trait;

use crate::auth::credential::Profile;
use crate::auth::AuthError;

/// Result of a successful interactive sign-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityGrant {
    pub access_token: String,
    pub id_token: Option<String>,
    pub profile: Profile,
}

/// The external identity SDK, reduced to the two calls the gate needs.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolves once the provider can accept a sign-in. May never resolve.
    async fn ready(&self) -> Result<(), String>;

    async fn sign_in(&self) -> Result<IdentityGrant, String>;
}

/// Stand-in used when no OAuth client is configured; it never becomes ready.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredIdentity;

#[async_trait]
impl IdentityProvider for UnconfiguredIdentity {
    async fn ready(&self) -> Result<(), String> {
        Err("no Google client id configured; run `foldertalk set google-client-id <id>`".to_string())
    }

    async fn sign_in(&self) -> Result<IdentityGrant, String> {
        Err("Google sign-in is not configured".to_string())
    }
}

/// Waits for `provider` to become ready, failing after `timeout`.
pub async fn wait_until_ready(
    provider: &dyn IdentityProvider,
    timeout: Duration,
) -> Result<(), AuthError> {
    match tokio::time::timeout(timeout, provider.ready()).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(reason)) => Err(AuthError::IdentityUnavailable(reason)),
        Err(_) => Err(AuthError::IdentityUnavailable(format!(
            "identity provider not ready after {}s",
            timeout.as_secs()
        ))),
    }
}
