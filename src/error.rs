#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid AT-URI: {0}")]
    InvalidUri(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl Error {
    /// Whether retrying the same request could succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Network(e) => e.is_timeout() || e.is_connect(),
            Error::Api { status, .. } => *status == 429 || *status >= 500,
            Error::Redis(e) => e.is_timeout() || e.is_connection_dropped(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_classification() {
        let throttled = Error::Api { status: 429, message: "slow down".to_string() };
        let missing = Error::Api { status: 400, message: "InvalidRequest".to_string() };
        let upstream = Error::Api { status: 502, message: "bad gateway".to_string() };

        assert!(throttled.is_transient());
        assert!(!missing.is_transient());
        assert!(upstream.is_transient());
        assert!(!Error::InvalidUri("nope".to_string()).is_transient());
    }

    #[test]
    fn test_error_display() {
        let err = Error::Api { status: 401, message: "AuthRequired".to_string() };
        assert_eq!(err.to_string(), "API error (401): AuthRequired");
    }
}
