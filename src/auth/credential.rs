use std::error::Error;
use std::fmt;

use keyring::Entry;
use serde::{Deserialize, Serialize};
use tracing::debug;

const KEYRING_SERVICE: &str = "foldertalk";
const KEYRING_ACCOUNT: &str = "google";

/// Who is signed in, as reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub image_url: Option<String>,
}

/// Access grant plus profile. Only the auth gate creates or drops one.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    #[serde(default)]
    pub id_token: Option<String>,
    pub profile: Profile,
    /// Session handle the backend returned when it accepted the token.
    #[serde(default)]
    pub backend_session: Option<String>,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("profile", &self.profile)
            .field("backend_session", &self.backend_session)
            .finish()
    }
}

/// Describes failures when attempting to access the system keyring.
///
/// Recoverable errors indicate that the credential backend was
/// temporarily unavailable (for example when the keychain service is
/// locked). Permanent errors surface the underlying cause directly.
#[derive(Debug)]
pub enum KeyringAccessError {
    Recoverable(keyring::Error),
    Permanent(keyring::Error),
}

impl KeyringAccessError {
    fn inner(&self) -> &keyring::Error {
        match self {
            KeyringAccessError::Recoverable(err) | KeyringAccessError::Permanent(err) => err,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(self, KeyringAccessError::Recoverable(_))
    }
}

impl From<keyring::Error> for KeyringAccessError {
    fn from(err: keyring::Error) -> Self {
        match err {
            keyring::Error::PlatformFailure(_) | keyring::Error::NoStorageAccess(_) => {
                KeyringAccessError::Recoverable(err)
            }
            other => KeyringAccessError::Permanent(other),
        }
    }
}

impl fmt::Display for KeyringAccessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner())
    }
}

impl Error for KeyringAccessError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(self.inner())
    }
}

/// Durable key-value record of the current credential.
pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Result<Option<Credential>, Box<dyn Error + Send + Sync>>;
    fn save(&self, credential: &Credential) -> Result<(), Box<dyn Error + Send + Sync>>;
    fn clear(&self) -> Result<(), Box<dyn Error + Send + Sync>>;
}

/// Stores the credential as JSON in the platform keyring.
#[derive(Debug, Clone, Copy)]
pub struct KeyringCredentialStore {
    use_keyring: bool,
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyringCredentialStore {
    pub fn new() -> Self {
        Self { use_keyring: true }
    }

    /// A disabled store never touches the keyring (useful for `--no-keyring` runs).
    pub fn new_with_keyring(use_keyring: bool) -> Self {
        Self { use_keyring }
    }

    fn entry(&self) -> Result<Entry, KeyringAccessError> {
        Entry::new(KEYRING_SERVICE, KEYRING_ACCOUNT).map_err(KeyringAccessError::from)
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn load(&self) -> Result<Option<Credential>, Box<dyn Error + Send + Sync>> {
        if !self.use_keyring {
            return Ok(None);
        }
        match self.entry()?.get_password() {
            Ok(raw) => match serde_json::from_str::<Credential>(&raw) {
                Ok(credential) => Ok(Some(credential)),
                Err(err) => {
                    debug!(error = %err, "ignoring unreadable stored credential");
                    Ok(None)
                }
            },
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(Box::new(KeyringAccessError::from(err))),
        }
    }

    fn save(&self, credential: &Credential) -> Result<(), Box<dyn Error + Send + Sync>> {
        if !self.use_keyring {
            return Ok(());
        }
        let raw = serde_json::to_string(credential)?;
        self.entry()?
            .set_password(&raw)
            .map_err(|err| Box::new(KeyringAccessError::from(err)) as Box<dyn Error + Send + Sync>)
    }

    fn clear(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        if !self.use_keyring {
            return Ok(());
        }
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(err) => Err(Box::new(KeyringAccessError::from(err))),
        }
    }
}
