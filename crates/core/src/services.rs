use reqwest::blocking::Client;
use std::sync::{Arc, Mutex, PoisonError};

use crate::auth::CredentialManager;
use crate::credential::Credential;
use crate::error::Result;
use crate::google::{CalendarApi, CalendarClient, GmailClient, MailApi};

#[derive(Clone)]
pub struct Services {
    pub calendar: Arc<dyn CalendarApi>,
    pub mail: Arc<dyn MailApi>,
}

pub trait ServiceProvider: Send + Sync {
    fn services(&self) -> Result<Services>;
}

pub trait ServiceFactory: Send + Sync {
    fn build(&self, credential: &Credential) -> Services;
}

pub struct GoogleServiceFactory {
    http: Client,
}

impl GoogleServiceFactory {
    pub fn new(http: Client) -> Self {
        Self { http }
    }
}

impl ServiceFactory for GoogleServiceFactory {
    fn build(&self, credential: &Credential) -> Services {
        Services {
            calendar: Arc::new(CalendarClient::new(
                self.http.clone(),
                credential.access_token.as_str(),
            )),
            mail: Arc::new(GmailClient::new(
                self.http.clone(),
                credential.access_token.as_str(),
            )),
        }
    }
}

/// Memoizes service handles per credential. Check-and-build runs under one
/// lock, so concurrent cold callers mint a single credential.
pub struct ServiceRegistry {
    credentials: CredentialManager,
    factory: Box<dyn ServiceFactory>,
    state: Mutex<Option<(Credential, Services)>>,
}

impl ServiceRegistry {
    pub fn new(credentials: CredentialManager, factory: Box<dyn ServiceFactory>) -> Self {
        Self {
            credentials,
            factory,
            state: Mutex::new(None),
        }
    }

    pub fn credentials(&self) -> &CredentialManager {
        &self.credentials
    }
}

impl ServiceProvider for ServiceRegistry {
    fn services(&self) -> Result<Services> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((cred, services)) = state.as_ref() {
            if cred.is_valid() {
                return Ok(services.clone());
            }
        }

        let credential = self.credentials.get_credential()?;
        if let Some((cred, services)) = state.as_ref() {
            if *cred == credential {
                return Ok(services.clone());
            }
        }

        tracing::info!("building calendar and gmail clients");
        let services = self.factory.build(&credential);
        *state = Some((credential, services.clone()));
        Ok(services)
    }
}
