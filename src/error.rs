use thiserror::Error;

use crate::models::DropReason;

#[derive(Error, Debug)]
pub enum CIPulseError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Authorization failed: {0}")]
    Authorization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Transient fetch failure: {0}")]
    TransientFetch(String),

    #[error("API request failed: {0}")]
    Api(String),

    #[error("Malformed record: {0}")]
    MalformedRecord(DropReason),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CIPulseError {
    /// Whether a failed request may succeed if issued again.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::TransientFetch(_) => true,
            Self::Network(e) => {
                e.is_timeout() || e.is_connect() || e.is_request() || e.is_body()
            }
            _ => false,
        }
    }

    /// Errors that must abort the whole analysis instead of degrading it.
    pub fn is_fatal(&self) -> bool {
        !self.is_transient()
            && !matches!(
                self,
                Self::MalformedRecord(_) | Self::InsufficientData(_)
            )
    }
}

pub type Result<T> = std::result::Result<T, CIPulseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors_are_not_fatal() {
        let err = CIPulseError::TransientFetch("502 Bad Gateway".to_string());
        assert!(err.is_transient());
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_client_errors_are_fatal() {
        assert!(CIPulseError::Authorization("bad credentials".to_string()).is_fatal());
        assert!(CIPulseError::NotFound("repository".to_string()).is_fatal());
        assert!(!CIPulseError::NotFound("repository".to_string()).is_transient());
    }

    #[test]
    fn test_record_level_errors_degrade() {
        assert!(!CIPulseError::MalformedRecord(DropReason::MissingId).is_fatal());
        assert!(!CIPulseError::InsufficientData("ci".to_string()).is_fatal());
    }
}
