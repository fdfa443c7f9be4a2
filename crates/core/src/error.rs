use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("invalid arguments: {0}")]
    Validation(String),
    #[error("provider request failed: {0}")]
    Provider(String),
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("could not decode message body: {0}")]
    Decoding(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, GatewayError>;

impl GatewayError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider(msg.into())
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Maps a transport failure, calling out timeouts explicitly.
    pub(crate) fn from_request(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Provider(format!("request timed out: {}", err))
        } else {
            Self::Provider(err.to_string())
        }
    }
}
