pub mod auth;
pub mod config;
pub mod credential;
pub mod error;
pub mod google;
pub mod mime;
pub mod oauth;
pub mod services;

pub use auth::CredentialManager;
pub use config::GatewayConfig;
pub use credential::{ClientSecrets, Credential, TokenStore, REQUIRED_SCOPES};
pub use error::{GatewayError, Result};
pub use google::{
    http_client, Attendee, CalendarApi, CalendarClient, Event, EventTime, GmailClient, MailApi,
    Message, MessagePart, MessageRef, NewEvent, SentMessage,
};
pub use mime::{build_plain_text_message, decode_base64url, encode_base64url, plain_text_body};
pub use oauth::{AuthFlow, GoogleAuthFlow};
pub use services::{
    GoogleServiceFactory, ServiceFactory, ServiceProvider, ServiceRegistry, Services,
};
