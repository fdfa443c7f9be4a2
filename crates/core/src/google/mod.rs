mod calendar;
mod gmail;

use chrono::{DateTime, Utc};
use reqwest::blocking::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{GatewayError, Result};

pub use calendar::CalendarClient;
pub use gmail::GmailClient;

const USER_AGENT: &str = concat!("gsuite-tools/", env!("CARGO_PKG_VERSION"));

pub fn http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .map_err(|e| GatewayError::Config(format!("cannot build http client: {}", e)))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventTime {
    #[serde(rename = "dateTime", default, skip_serializing_if = "Option::is_none")]
    pub date_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(rename = "timeZone", default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

impl EventTime {
    pub fn utc(at: DateTime<Utc>) -> Self {
        Self {
            date_time: Some(at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)),
            date: None,
            time_zone: Some("UTC".to_string()),
        }
    }

    /// Timed events carry `dateTime`, all-day events only `date`.
    pub fn resolved(&self) -> Option<&str> {
        self.date_time.as_deref().or(self.date.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Event {
    pub id: Option<String>,
    pub summary: Option<String>,
    #[serde(default)]
    pub start: EventTime,
    #[serde(default)]
    pub end: EventTime,
    #[serde(rename = "htmlLink")]
    pub html_link: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Attendee {
    pub email: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewEvent {
    pub summary: String,
    pub description: String,
    pub start: EventTime,
    pub end: EventTime,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attendees: Vec<Attendee>,
}

pub trait CalendarApi: Send + Sync {
    /// Upcoming events on the primary calendar, recurring instances expanded,
    /// ordered by start time.
    fn list_events(&self, time_min: DateTime<Utc>, max_results: u32) -> Result<Vec<Event>>;
    fn insert_event(&self, event: &NewEvent) -> Result<Event>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageRef {
    pub id: String,
    #[serde(rename = "threadId")]
    pub thread_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageBody {
    pub data: Option<String>,
    #[serde(rename = "attachmentId")]
    pub attachment_id: Option<String>,
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessagePart {
    #[serde(rename = "mimeType", default)]
    pub mime_type: String,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default)]
    pub body: MessageBody,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

impl MessagePart {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    pub fn is_multipart(&self) -> bool {
        !self.parts.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(rename = "threadId")]
    pub thread_id: Option<String>,
    pub snippet: Option<String>,
    #[serde(default)]
    pub payload: MessagePart,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SentMessage {
    pub id: String,
    #[serde(rename = "threadId")]
    pub thread_id: Option<String>,
}

pub trait MailApi: Send + Sync {
    fn list_messages(&self, query: &str, max_results: u32) -> Result<Vec<MessageRef>>;
    /// Fetches a message with only the named headers populated.
    fn get_metadata(&self, id: &str, headers: &[&str]) -> Result<Message>;
    fn get_full(&self, id: &str) -> Result<Message>;
    /// Submits an already base64url-encoded RFC 5322 message.
    fn send_raw(&self, raw: &str) -> Result<SentMessage>;
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

pub(crate) fn execute<T: DeserializeOwned>(request: RequestBuilder) -> Result<T> {
    let response = request.send().map_err(GatewayError::from_request)?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        return Err(GatewayError::provider(format!(
            "{}: {}",
            status,
            api_error_message(&body)
        )));
    }
    response.json().map_err(GatewayError::from_request)
}

fn api_error_message(body: &str) -> String {
    match serde_json::from_str::<ApiErrorEnvelope>(body) {
        Ok(envelope) => envelope.error.message,
        Err(_) => body.trim().chars().take(200).collect(),
    }
}
