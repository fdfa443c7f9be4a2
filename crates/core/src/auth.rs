use std::sync::{Arc, Mutex, PoisonError};

use crate::credential::{Credential, TokenStore};
use crate::error::{GatewayError, Result};
use crate::oauth::AuthFlow;

pub struct CredentialManager {
    store: TokenStore,
    flow: Arc<dyn AuthFlow>,
    interactive: bool,
    cached: Mutex<Option<Credential>>,
}

impl CredentialManager {
    pub fn new(store: TokenStore, flow: Arc<dyn AuthFlow>, interactive: bool) -> Self {
        Self {
            store,
            flow,
            interactive,
            cached: Mutex::new(None),
        }
    }

    /// Returns a non-expired credential carrying the required scopes.
    pub fn get_credential(&self) -> Result<Credential> {
        let mut cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(cred) = cached.as_ref().filter(|c| c.is_valid()) {
            return Ok(cred.clone());
        }

        // The token file wins over memory: `auth` may have rewritten it.
        let current = self.store.load().or_else(|| cached.take());
        let credential = self.resolve(current)?;
        *cached = Some(credential.clone());
        Ok(credential)
    }

    pub fn reauthorize(&self) -> Result<Credential> {
        let mut cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        let credential = self.mint()?;
        self.store.save(&credential)?;
        *cached = Some(credential.clone());
        Ok(credential)
    }

    fn resolve(&self, current: Option<Credential>) -> Result<Credential> {
        let current = match current {
            Some(cred) if cred.is_valid() => {
                tracing::debug!("using persisted credential");
                return Ok(cred);
            }
            other => other,
        };

        let credential = match current.filter(Credential::can_refresh) {
            Some(expired) => match self.refresh(&expired) {
                Ok(refreshed) => refreshed,
                Err(e) if self.interactive => {
                    tracing::warn!(error = %e, "refresh failed, falling back to consent flow");
                    self.mint()?
                }
                Err(e) => {
                    return Err(GatewayError::auth(format!(
                        "{}; interactive consent is disabled, run `gsuite-tools-mcp auth`",
                        e
                    )))
                }
            },
            None if self.interactive => self.mint()?,
            None => {
                return Err(GatewayError::auth(
                    "no usable credential and interactive consent is disabled, \
                     run `gsuite-tools-mcp auth`",
                ))
            }
        };

        self.store.save(&credential)?;
        tracing::info!(path = %self.store.path().display(), "credential saved");
        Ok(credential)
    }

    fn refresh(&self, expired: &Credential) -> Result<Credential> {
        let refreshed = self.flow.refresh(expired)?;
        if !refreshed.has_required_scopes() {
            return Err(GatewayError::auth("refreshed token lost required scopes"));
        }
        Ok(refreshed)
    }

    fn mint(&self) -> Result<Credential> {
        let credential = self.flow.consent()?;
        if !credential.has_required_scopes() {
            return Err(GatewayError::auth(format!(
                "consent granted {:?}, which lacks a required scope",
                credential.scopes
            )));
        }
        Ok(credential)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::credential::tests::credential;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Counts every call that would have reached the token endpoint.
    #[derive(Default)]
    pub(crate) struct CountingFlow {
        pub refreshes: AtomicUsize,
        pub consents: AtomicUsize,
        pub fail_refresh: bool,
    }

    impl AuthFlow for CountingFlow {
        fn refresh(&self, expired: &Credential) -> Result<Credential> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            if self.fail_refresh {
                return Err(GatewayError::auth("invalid_grant"));
            }
            let mut refreshed = credential(3600);
            refreshed.access_token = format!("refreshed-{}", self.refreshes.load(Ordering::SeqCst));
            refreshed.refresh_token = expired.refresh_token.clone();
            Ok(refreshed)
        }

        fn consent(&self) -> Result<Credential> {
            let n = self.consents.fetch_add(1, Ordering::SeqCst) + 1;
            std::thread::sleep(std::time::Duration::from_millis(20));
            Ok(Credential {
                access_token: format!("minted-{}", n),
                ..credential(3600)
            })
        }
    }

    fn manager(dir: &TempDir, flow: Arc<CountingFlow>, interactive: bool) -> CredentialManager {
        CredentialManager::new(TokenStore::new(dir.path().join("token.json")), flow, interactive)
    }

    #[test]
    fn valid_persisted_credential_needs_no_auth_calls() {
        let dir = TempDir::new().unwrap();
        let stored = credential(3600);
        TokenStore::new(dir.path().join("token.json")).save(&stored).unwrap();

        let flow = Arc::new(CountingFlow::default());
        let mgr = manager(&dir, flow.clone(), true);

        assert_eq!(mgr.get_credential().unwrap(), stored);
        assert_eq!(mgr.get_credential().unwrap(), stored);
        assert_eq!(flow.refreshes.load(Ordering::SeqCst), 0);
        assert_eq!(flow.consents.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn expired_credential_refreshes_once_and_persists() {
        let dir = TempDir::new().unwrap();
        let store = TokenStore::new(dir.path().join("token.json"));
        store.save(&credential(-120)).unwrap();

        let flow = Arc::new(CountingFlow::default());
        let mgr = manager(&dir, flow.clone(), true);

        let first = mgr.get_credential().unwrap();
        assert_eq!(first.access_token, "refreshed-1");
        assert_eq!(first.refresh_token.as_deref(), Some("1//refresh"));
        assert_eq!(store.load().unwrap(), first);

        let second = mgr.get_credential().unwrap();
        assert_eq!(second, first);
        assert_eq!(flow.refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(flow.consents.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn missing_token_runs_consent() {
        let dir = TempDir::new().unwrap();
        let flow = Arc::new(CountingFlow::default());
        let mgr = manager(&dir, flow.clone(), true);

        let cred = mgr.get_credential().unwrap();
        assert_eq!(cred.access_token, "minted-1");
        assert!(dir.path().join("token.json").exists());
        assert_eq!(flow.consents.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn revoked_refresh_falls_back_to_consent_when_interactive() {
        let dir = TempDir::new().unwrap();
        TokenStore::new(dir.path().join("token.json"))
            .save(&credential(-120))
            .unwrap();

        let flow = Arc::new(CountingFlow {
            fail_refresh: true,
            ..Default::default()
        });
        let mgr = manager(&dir, flow.clone(), true);

        assert_eq!(mgr.get_credential().unwrap().access_token, "minted-1");
        assert_eq!(flow.refreshes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn revoked_refresh_fails_fast_when_non_interactive() {
        let dir = TempDir::new().unwrap();
        TokenStore::new(dir.path().join("token.json"))
            .save(&credential(-120))
            .unwrap();

        let flow = Arc::new(CountingFlow {
            fail_refresh: true,
            ..Default::default()
        });
        let mgr = manager(&dir, flow.clone(), false);

        let err = mgr.get_credential().unwrap_err();
        assert!(matches!(err, GatewayError::Authentication(_)));
        assert!(err.to_string().contains("gsuite-tools-mcp auth"));
        assert_eq!(flow.consents.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn credential_without_scopes_is_reminted() {
        let dir = TempDir::new().unwrap();
        let mut narrow = credential(3600);
        narrow.scopes.truncate(1);
        TokenStore::new(dir.path().join("token.json"))
            .save(&narrow)
            .unwrap();

        let flow = Arc::new(CountingFlow::default());
        let mgr = manager(&dir, flow.clone(), true);

        assert_eq!(mgr.get_credential().unwrap().access_token, "minted-1");
        assert_eq!(flow.refreshes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn reauthorize_overwrites_store() {
        let dir = TempDir::new().unwrap();
        let store = TokenStore::new(dir.path().join("token.json"));
        store.save(&credential(3600)).unwrap();

        let flow = Arc::new(CountingFlow::default());
        let mgr = manager(&dir, flow.clone(), false);

        let cred = mgr.reauthorize().unwrap();
        assert_eq!(store.load().unwrap(), cred);
        assert_eq!(mgr.get_credential().unwrap().access_token, "minted-1");
    }
}
