use thiserror::Error;

#[derive(Debug, Error)]
pub enum PollerError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unexpected payload: {0}")]
    UnexpectedPayload(String),
    #[error("platform not supported: {0}")]
    UnsupportedPlatform(String),
    #[error("upstream rejected the request: status {0}")]
    BadStatus(u16),
}

impl PollerError {
    pub fn payload(msg: impl Into<String>) -> Self {
        Self::UnexpectedPayload(msg.into())
    }
}
