use thiserror::Error;

#[derive(Debug, Error)]
pub enum KaleidoError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("authentication rejected: {0}")]
    Authentication(String),
    #[error("access denied: {0}")]
    Authorization(String),
    #[error("rate limited: {0}")]
    Throttled(String),
    #[error("upstream error: {0}")]
    Upstream(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("failed to parse json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl KaleidoError {
    /// Classifies a non-success vendor response by status code. The body is
    /// attached verbatim so the caller sees the vendor's own error detail.
    pub(crate) fn from_vendor_status(status: reqwest::StatusCode, body: String) -> Self {
        match status.as_u16() {
            401 => Self::Authentication(format!("vendor rejected credential ({status}): {body}")),
            403 => Self::Authorization(format!("vendor denied access ({status}): {body}")),
            429 => Self::Throttled(format!("vendor rate limit ({status}): {body}")),
            _ => Self::Upstream(format!("vendor call failed ({status}): {body}")),
        }
    }
}

pub type Result<T> = std::result::Result<T, KaleidoError>;
