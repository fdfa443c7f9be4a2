use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use super::{execute, MailApi, Message, MessageRef, SentMessage};
use crate::error::{GatewayError, Result};

const GMAIL_API: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

pub struct GmailClient {
    http: Client,
    token: String,
}

#[derive(Debug, Deserialize)]
struct MessageList {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Debug, Serialize)]
struct RawMessage<'a> {
    raw: &'a str,
}

impl GmailClient {
    pub fn new(http: Client, token: impl Into<String>) -> Self {
        Self {
            http,
            token: token.into(),
        }
    }

}

/// The id is pushed as one percent-encoded path segment, so it cannot leave
/// `messages/` or add a query.
fn message_url(id: &str) -> Result<Url> {
    if matches!(id, "" | "." | "..") {
        return Err(GatewayError::validation(format!("invalid message id: {:?}", id)));
    }

    let mut url = Url::parse(GMAIL_API)
        .map_err(|e| GatewayError::Config(format!("bad Gmail base url: {}", e)))?;
    url.path_segments_mut()
        .map_err(|_| GatewayError::Config("Gmail base url cannot hold a path".to_string()))?
        .push("messages")
        .push(id);
    Ok(url)
}

impl MailApi for GmailClient {
    fn list_messages(&self, query: &str, max_results: u32) -> Result<Vec<MessageRef>> {
        tracing::debug!(query, max_results, "gmail messages.list");

        let mut params = vec![("maxResults", max_results.to_string())];
        if !query.is_empty() {
            params.push(("q", query.to_string()));
        }

        let request = self
            .http
            .get(format!("{}/messages", GMAIL_API))
            .bearer_auth(&self.token)
            .query(&params);

        let list: MessageList = execute(request)?;
        Ok(list.messages)
    }

    fn get_metadata(&self, id: &str, headers: &[&str]) -> Result<Message> {
        tracing::debug!(id, "gmail messages.get (metadata)");

        let params: Vec<(&str, &str)> = std::iter::once(("format", "metadata"))
            .chain(headers.iter().map(|h| ("metadataHeaders", *h)))
            .collect();

        let request = self
            .http
            .get(message_url(id)?)
            .bearer_auth(&self.token)
            .query(&params);

        execute(request)
    }

    fn get_full(&self, id: &str) -> Result<Message> {
        tracing::debug!(id, "gmail messages.get (full)");

        let request = self
            .http
            .get(message_url(id)?)
            .bearer_auth(&self.token)
            .query(&[("format", "full")]);

        execute(request)
    }

    fn send_raw(&self, raw: &str) -> Result<SentMessage> {
        tracing::debug!(bytes = raw.len(), "gmail messages.send");

        let request = self
            .http
            .post(format!("{}/messages/send", GMAIL_API))
            .bearer_auth(&self.token)
            .json(&RawMessage { raw });

        execute(request)
    }
}
