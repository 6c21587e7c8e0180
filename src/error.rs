use thiserror::Error;

/// Failures seen by the extension side: page agent, local cache, sync client and popup.
#[derive(Debug, Error)]
pub enum HighlightError {
    #[error("ValidationError: {0}")]
    Validation(String),

    #[error("NotFoundError: {0}")]
    NotFound(String),

    #[error("NoSelectionError: Please select text to highlight")]
    NoSelection,

    #[error("StorageFailure: {0}")]
    Storage(#[from] StorageError),

    #[error("NetworkFailure: {0}")]
    Network(#[from] NetworkError),

    #[error("AgentUnavailable: {0}")]
    AgentUnavailable(String),
}

impl HighlightError {
    /// Storage failures sit on the durability boundary and must block the user.
    pub fn is_blocking(&self) -> bool {
        !matches!(self, HighlightError::Network(_))
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed value under {key}: {source}")]
    Malformed {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("encode: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("timed out after {0}ms")]
    Timeout(u128),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
}

impl NetworkError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, NetworkError::Status { status: 404, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_source() {
        let err = HighlightError::from(StorageError::Unavailable("quota exceeded".into()));
        assert_eq!(err.to_string(), "StorageFailure: unavailable: quota exceeded");
        assert!(err.is_blocking());

        let err = HighlightError::from(NetworkError::Timeout(3000));
        assert_eq!(err.to_string(), "NetworkFailure: timed out after 3000ms");
        assert!(!err.is_blocking());
    }

    #[test]
    fn test_unpack_error_walks_chain() {
        let inner = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = StorageError::Malformed {
            key: "highlights".into(),
            source: inner,
        };
        let unpacked = crate::unpack_error(&err);
        assert!(unpacked.starts_with("malformed value under highlights: "));
        assert!(unpacked.matches("EOF").count() >= 2);
    }
}
