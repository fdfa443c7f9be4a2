use gsuite_tools_core::{
    build_plain_text_message, plain_text_body, GatewayError, Message, Result, ServiceProvider,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{
    default_max_results, deserialize_max_results, parse_args, ParamKind, ParamDef, ToolDescriptor,
};

const SUMMARY_HEADERS: [&str; 3] = ["From", "Subject", "Date"];

pub fn definitions() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor {
            name: "gmail_list_messages",
            description: "Search Gmail and list matching messages with sender, subject and date",
            params: vec![
                ParamDef::optional(
                    "max_results",
                    ParamKind::Number,
                    "Maximum number of messages to return",
                )
                .with_default(json!(10)),
                ParamDef::optional(
                    "query",
                    ParamKind::String,
                    "Gmail search query, e.g. `from:alice is:unread`",
                )
                .with_default(json!("")),
            ],
        },
        ToolDescriptor {
            name: "gmail_read_message",
            description: "Read one Gmail message including its plain-text body",
            params: vec![ParamDef::required(
                "message_id",
                ParamKind::String,
                "Message id as returned by gmail_list_messages",
            )],
        },
        ToolDescriptor {
            name: "gmail_send_message",
            description: "Send a plain-text email from the authenticated account",
            params: vec![
                ParamDef::required("to", ParamKind::String, "Recipient address"),
                ParamDef::required("subject", ParamKind::String, "Subject line"),
                ParamDef::required("body", ParamKind::String, "Plain-text body"),
            ],
        },
    ]
}

pub fn call(name: &str, arguments: Value, services: &dyn ServiceProvider) -> Result<Value> {
    match name {
        "gmail_list_messages" => list_messages(parse_args(arguments)?, services),
        "gmail_read_message" => read_message(parse_args(arguments)?, services),
        "gmail_send_message" => send_message(parse_args(arguments)?, services),
        _ => Err(GatewayError::UnknownTool(name.to_string())),
    }
}

#[derive(Debug, Deserialize)]
struct ListMessagesArgs {
    #[serde(default = "default_max_results", deserialize_with = "deserialize_max_results")]
    max_results: u32,
    #[serde(default)]
    query: String,
}

#[derive(Debug, Deserialize)]
struct ReadMessageArgs {
    message_id: String,
}

#[derive(Debug, Deserialize)]
struct SendMessageArgs {
    to: String,
    subject: String,
    body: String,
}

#[derive(Debug, Serialize)]
struct MailSummary {
    id: String,
    from: Option<String>,
    subject: Option<String>,
    date: Option<String>,
}

impl From<&Message> for MailSummary {
    fn from(message: &Message) -> Self {
        let header = |name: &str| message.payload.header(name).map(str::to_string);
        Self {
            id: message.id.clone(),
            from: header("From"),
            subject: header("Subject"),
            date: header("Date"),
        }
    }
}

#[derive(Debug, Serialize)]
struct MailMessage {
    #[serde(flatten)]
    summary: MailSummary,
    body: String,
}

fn list_messages(args: ListMessagesArgs, services: &dyn ServiceProvider) -> Result<Value> {
    let max_results = args.max_results;
    let services = services.services()?;

    let refs = services.mail.list_messages(&args.query, max_results)?;
    let mut summaries = Vec::with_capacity(refs.len());
    // The list endpoint carries ids only; headers need one metadata fetch each.
    for r in refs.iter().take(max_results as usize) {
        let message = services.mail.get_metadata(&r.id, &SUMMARY_HEADERS)?;
        summaries.push(MailSummary::from(&message));
    }

    tracing::debug!(count = summaries.len(), "listed gmail messages");
    Ok(serde_json::to_value(summaries)?)
}

fn read_message(args: ReadMessageArgs, services: &dyn ServiceProvider) -> Result<Value> {
    let id = args.message_id.trim();
    if id.is_empty() {
        return Err(GatewayError::validation("`message_id` must not be empty"));
    }

    let services = services.services()?;
    let message = services.mail.get_full(id)?;

    let detail = MailMessage {
        summary: MailSummary::from(&message),
        body: plain_text_body(&message.payload),
    };
    Ok(serde_json::to_value(detail)?)
}

fn send_message(args: SendMessageArgs, services: &dyn ServiceProvider) -> Result<Value> {
    let raw = build_plain_text_message(&args.to, &args.subject, &args.body)?;

    let services = services.services()?;
    let sent = services.mail.send_raw(&raw)?;

    tracing::info!(message_id = %sent.id, "message sent");
    Ok(json!({ "message_id": sent.id }))
}
