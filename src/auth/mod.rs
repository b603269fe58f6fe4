//! Credential handling.
//!
//! One [`CredentialProvider`] can be installed process-wide with [`init`] and
//! removed with [`teardown`]. Code that needs isolated credentials builds its
//! own provider and passes it to a separate client instead.

mod credential;
mod source;

use std::sync::{Arc, RwLock};

pub use credential::{Credential, CredentialProvider, SecretStore};
pub use source::TokenSource;

use crate::error::AuthError;

static GLOBAL: RwLock<Option<Arc<CredentialProvider>>> = RwLock::new(None);

/// Installs `provider` as the process-wide provider, replacing any previous one.
pub fn init(provider: CredentialProvider) -> Arc<CredentialProvider> {
    let provider = Arc::new(provider);
    let mut slot = GLOBAL.write().unwrap_or_else(|e| e.into_inner());
    *slot = Some(Arc::clone(&provider));
    provider
}

/// The process-wide provider installed by [`init`].
pub fn current() -> Result<Arc<CredentialProvider>, AuthError> {
    GLOBAL
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .clone()
        .ok_or(AuthError::NotInitialized)
}

/// Removes the process-wide provider. Clients already holding it keep working.
pub fn teardown() -> Option<Arc<CredentialProvider>> {
    GLOBAL.write().unwrap_or_else(|e| e.into_inner()).take()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_lifecycle() {
        let installed = init(CredentialProvider::new(TokenSource::Static("t".into())));
        let fetched = current().unwrap();
        assert!(Arc::ptr_eq(&installed, &fetched));

        let removed = teardown().unwrap();
        assert!(Arc::ptr_eq(&installed, &removed));
        assert!(matches!(current(), Err(AuthError::NotInitialized)));
        assert!(teardown().is_none());
    }
}
