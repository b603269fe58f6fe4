use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::credential::Credential;
use crate::error::{AuthError, SimError};
use crate::transport::client::http_client;

/// Where bearer tokens come from.
#[derive(Clone)]
pub enum TokenSource {
    /// A pre-issued token. Used as-is and never refreshed.
    Static(String),
    /// An API key exchanged for short-lived tokens at `POST {api_url}/auth/token`.
    ApiKey {
        api_key: String,
        token_url: String,
        http: Client,
    },
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    api_key: &'a str,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct TokenResponse {
    access_token: String,
    expires_at: Option<DateTime<Utc>>,
}

impl TokenSource {
    pub fn api_key(api_url: &str, api_key: impl Into<String>) -> Result<Self, SimError> {
        Ok(Self::ApiKey {
            api_key: api_key.into(),
            token_url: format!("{}/auth/token", api_url.trim_end_matches('/')),
            http: http_client(Duration::from_secs(10), Duration::from_secs(30))?,
        })
    }

    /// Picks a source from configured values; a static token wins over an API key.
    pub fn from_settings(
        api_url: &str,
        api_key: &str,
        token: Option<&str>,
    ) -> Result<Self, SimError> {
        match token {
            Some(token) if !token.is_empty() => Ok(Self::Static(token.to_string())),
            _ if !api_key.is_empty() => Self::api_key(api_url, api_key),
            _ => Err(AuthError::MissingCredentials.into()),
        }
    }

    pub fn can_refresh(&self) -> bool {
        matches!(self, TokenSource::ApiKey { .. })
    }

    /// Identifies who issues this source's tokens: the token endpoint plus a
    /// digest of the key. `None` for static tokens.
    pub fn issuer(&self) -> Option<String> {
        match self {
            TokenSource::Static(_) => None,
            TokenSource::ApiKey {
                api_key, token_url, ..
            } => {
                let digest = format!("{:x}", Sha256::digest(api_key.as_bytes()));
                Some(format!("{token_url}#{}", &digest[..16]))
            }
        }
    }

    /// Obtains a credential. Makes exactly one attempt.
    pub async fn issue(&self) -> Result<Credential, AuthError> {
        match self {
            TokenSource::Static(token) => Ok(Credential::new(token.clone(), None)),
            TokenSource::ApiKey {
                api_key,
                token_url,
                http,
            } => {
                debug!(url = %token_url, "exchanging API key for token");
                let response = http
                    .post(token_url)
                    .json(&TokenRequest { api_key })
                    .send()
                    .await
                    .map_err(|e| AuthError::RefreshFailed(e.to_string()))?;

                let status = response.status();
                if status == reqwest::StatusCode::UNAUTHORIZED
                    || status == reqwest::StatusCode::FORBIDDEN
                {
                    return Err(AuthError::Rejected {
                        status: status.as_u16(),
                    });
                }
                if !status.is_success() {
                    let message = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "unknown error".to_string());
                    return Err(AuthError::RefreshFailed(format!(
                        "token endpoint returned {status}: {message}"
                    )));
                }

                let body = response
                    .json::<TokenResponse>()
                    .await
                    .map_err(|e| AuthError::RefreshFailed(format!("malformed token response: {e}")))?;
                Ok(Credential::new(body.access_token, body.expires_at))
            }
        }
    }
}

impl fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenSource::Static(_) => f.write_str("TokenSource::Static(<redacted>)"),
            TokenSource::ApiKey { token_url, .. } => f
                .debug_struct("TokenSource::ApiKey")
                .field("token_url", token_url)
                .finish_non_exhaustive(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_token_wins_over_api_key() {
        let source = TokenSource::from_settings("http://x", "sk", Some("tok")).unwrap();
        assert!(matches!(source, TokenSource::Static(ref t) if t == "tok"));
        assert!(!source.can_refresh());
    }

    #[test]
    fn api_key_source_builds_token_url() {
        let source = TokenSource::from_settings("http://x/v1/", "sk", None).unwrap();
        match source {
            TokenSource::ApiKey { token_url, .. } => {
                assert_eq!(token_url, "http://x/v1/auth/token")
            }
            other => panic!("expected ApiKey, got {other:?}"),
        }
    }

    #[test]
    fn no_settings_is_missing_credentials() {
        let err = TokenSource::from_settings("http://x", "", Some("")).unwrap_err();
        assert!(matches!(err, SimError::Auth(AuthError::MissingCredentials)));
    }

    #[test]
    fn debug_hides_secrets() {
        let source = TokenSource::api_key("http://x", "sk-very-secret").unwrap();
        assert!(!format!("{source:?}").contains("sk-very-secret"));
    }

    #[test]
    fn issuer_changes_with_url_and_key() {
        let issuer = |url, key| TokenSource::api_key(url, key).unwrap().issuer().unwrap();
        let base = issuer("http://x/v1", "sk-a");
        assert_eq!(base, issuer("http://x/v1/", "sk-a"));
        assert_ne!(base, issuer("http://y/v1", "sk-a"));
        assert_ne!(base, issuer("http://x/v1", "sk-b"));
        assert!(!base.contains("sk-a"));
        assert!(TokenSource::Static("tok".into()).issuer().is_none());
    }
}
