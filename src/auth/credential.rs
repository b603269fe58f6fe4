use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::source::TokenSource;
use crate::error::AuthError;

/// Tokens closer than this to expiry are treated as already expired.
const EXPIRY_SKEW_SECS: i64 = 30;

/// An opaque bearer token and its expiry.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub token: String,
    /// `None` for tokens that do not expire.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn new(token: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|at| at <= Utc::now() + ChronoDuration::seconds(EXPIRY_SKEW_SECS))
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// JSON file holding the last issued credential and the issuer it belongs to.
#[derive(Debug, Clone)]
pub struct SecretStore {
    path: PathBuf,
}

#[derive(Serialize, Deserialize)]
struct StoredCredential {
    issuer: String,
    #[serde(flatten)]
    credential: Credential,
}

impl SecretStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the stored credential if `issuer` issued it. A missing or
    /// unreadable file counts as empty.
    pub async fn load(&self, issuer: &str) -> Option<Credential> {
        let contents = tokio::fs::read(&self.path).await.ok()?;
        match serde_json::from_slice::<StoredCredential>(&contents) {
            Ok(stored) if stored.issuer == issuer => Some(stored.credential),
            Ok(_) => {
                debug!(path = %self.path.display(), "stored token belongs to another endpoint or key");
                None
            }
            Err(e) => {
                warn!(path = %self.path.display(), "ignoring unreadable token file: {e}");
                None
            }
        }
    }

    pub async fn save(&self, issuer: &str, credential: &Credential) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(&StoredCredential {
            issuer: issuer.to_string(),
            credential: credential.clone(),
        })?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, json).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600)).await?;
        }
        tokio::fs::rename(&tmp, &self.path).await
    }

    pub async fn clear(&self) -> std::io::Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

/// Resolves and refreshes the bearer token used for every backend call.
///
/// Holds at most one active credential. Refreshes are serialized, so
/// concurrent callers that hit the same expired token trigger a single
/// exchange with the backend.
#[derive(Debug)]
pub struct CredentialProvider {
    source: TokenSource,
    store: Option<SecretStore>,
    current: Mutex<Option<Credential>>,
}

impl CredentialProvider {
    pub fn new(source: TokenSource) -> Self {
        Self {
            source,
            store: None,
            current: Mutex::new(None),
        }
    }

    pub fn with_store(mut self, store: SecretStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Returns a valid credential, issuing one on first use or after expiry.
    pub async fn get_token(&self) -> Result<Credential, AuthError> {
        let mut current = self.current.lock().await;
        if let Some(credential) = current.as_ref()
            && !credential.is_expired()
        {
            return Ok(credential.clone());
        }

        if current.is_none()
            && let Some(stored) = self.load_stored().await
        {
            debug!("using stored credential");
            *current = Some(stored.clone());
            return Ok(stored);
        }

        let fresh = self.issue().await?;
        *current = Some(fresh.clone());
        Ok(fresh)
    }

    /// Replaces `stale` after the backend rejected it. Makes at most one
    /// exchange; if another caller already replaced the token, that
    /// replacement is returned instead.
    pub async fn refresh(&self, stale: &Credential) -> Result<Credential, AuthError> {
        let mut current = self.current.lock().await;
        if let Some(credential) = current.as_ref()
            && credential.token != stale.token
            && !credential.is_expired()
        {
            return Ok(credential.clone());
        }

        *current = None;
        if !self.source.can_refresh() {
            return Err(AuthError::RefreshFailed(
                "static token was rejected and cannot be refreshed".into(),
            ));
        }
        let fresh = self.issue().await?;
        *current = Some(fresh.clone());
        Ok(fresh)
    }

    /// Forgets the active credential and deletes the secret store.
    pub async fn logout(&self) -> std::io::Result<()> {
        self.current.lock().await.take();
        if let Some(store) = &self.store {
            store.clear().await?;
        }
        info!("logged out");
        Ok(())
    }

    async fn load_stored(&self) -> Option<Credential> {
        let issuer = self.source.issuer()?;
        let stored = self.store.as_ref()?.load(&issuer).await?;
        (!stored.is_expired()).then_some(stored)
    }

    async fn issue(&self) -> Result<Credential, AuthError> {
        let credential = self.source.issue().await?;
        if let Some(store) = &self.store
            && let Some(issuer) = self.source.issuer()
            && let Err(e) = store.save(&issuer, &credential).await
        {
            warn!(path = %store.path().display(), "failed to persist token: {e}");
        }
        Ok(credential)
    }
}
