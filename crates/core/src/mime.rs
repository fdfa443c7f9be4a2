
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;

use crate::error::{GatewayError, Result};
use crate::google::MessagePart;

/// Gmail emits base64url both with and without padding.
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

pub fn encode_base64url(bytes: &[u8]) -> String {
    URL_SAFE_LENIENT.encode(bytes)
}

pub fn decode_base64url(data: &str) -> Result<String> {
    let bytes = URL_SAFE_LENIENT
        .decode(data.trim())
        .map_err(|e| GatewayError::Decoding(e.to_string()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Builds an RFC 5322 plain-text message and returns it base64url-encoded.
pub fn build_plain_text_message(to: &str, subject: &str, body: &str) -> Result<String> {
    for (field, value) in [("to", to), ("subject", subject)] {
        if value.contains(['\r', '\n']) {
            return Err(GatewayError::validation(format!(
                "`{}` must not contain line breaks",
                field
            )));
        }
    }
    if to.trim().is_empty() {
        return Err(GatewayError::validation("`to` must not be empty"));
    }

    let message = format!(
        "MIME-Version: 1.0\r\n\
         Content-Type: text/plain; charset=\"utf-8\"\r\n\
         Content-Transfer-Encoding: 8bit\r\n\
         To: {}\r\n\
         Subject: {}\r\n\
         \r\n\
         {}",
        to,
        encode_header(subject),
        normalize_newlines(body)
    );

    Ok(encode_base64url(message.as_bytes()))
}

/// RFC 2047 encoded-word for non-ASCII header values.
fn encode_header(value: &str) -> String {
    if value.is_ascii() {
        value.to_string()
    } else {
        format!("=?utf-8?B?{}?=", STANDARD.encode(value.as_bytes()))
    }
}

fn normalize_newlines(body: &str) -> String {
    body.replace("\r\n", "\n").replace('\n', "\r\n")
}

/// The first `text/plain` part, depth-first, or the payload's own body when
/// it is not multipart. Missing or undecodable data yields an empty string.
pub fn plain_text_body(payload: &MessagePart) -> String {
    let data = if payload.is_multipart() {
        find_plain_text(payload).and_then(|p| p.body.data.as_deref())
    } else {
        payload.body.data.as_deref()
    };

    match data.map(decode_base64url) {
        Some(Ok(text)) => text,
        Some(Err(e)) => {
            tracing::warn!(error = %e, "undecodable message body, returning empty");
            String::new()
        }
        None => String::new(),
    }
}

fn find_plain_text(part: &MessagePart) -> Option<&MessagePart> {
    part.parts.iter().find_map(|child| {
        if child.mime_type.eq_ignore_ascii_case("text/plain") {
            Some(child)
        } else {
            find_plain_text(child)
        }
    })
}
