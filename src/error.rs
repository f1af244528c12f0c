//! Error types for epoch-ledger

use sled::transaction::TransactionError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EpochError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Blockchain transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Database error while {context}: {source}")]
    Database {
        context: String,
        #[source]
        source: sled::Error,
    },

    #[error("Serialization error while {context}: {source}")]
    Serialization {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Upstream error: {0}")]
    Upstream(String),
}

/// Coarse classification used by callers to pick a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidInput,
    TransactionFailed,
    Timeout,
    Engine,
    Upstream,
}

impl EpochError {
    pub fn database(context: impl Into<String>, source: sled::Error) -> Self {
        Self::Database {
            context: context.into(),
            source,
        }
    }

    pub fn serialization(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Serialization {
            context: context.into(),
            source,
        }
    }

    /// Unwrap a sled transaction failure, keeping aborts raised inside the closure as-is
    pub fn from_transaction(context: impl Into<String>, err: TransactionError<EpochError>) -> Self {
        match err {
            TransactionError::Abort(inner) => inner,
            TransactionError::Storage(source) => Self::database(context, source),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::TransactionFailed(_) => ErrorKind::TransactionFailed,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Database { .. } | Self::Serialization { .. } => ErrorKind::Engine,
            Self::Upstream(_) => ErrorKind::Upstream,
        }
    }

    /// HTTP status equivalent for transports layered on top of this crate
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::NotFound => 404,
            ErrorKind::InvalidInput => 400,
            ErrorKind::TransactionFailed => 502,
            ErrorKind::Timeout => 408,
            ErrorKind::Engine => 500,
            ErrorKind::Upstream => 500,
        }
    }

    /// Caller mistakes, as opposed to server or infrastructure failures
    pub fn is_client_error(&self) -> bool {
        matches!(self.kind(), ErrorKind::NotFound | ErrorKind::InvalidInput)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_and_status_mapping() {
        let cases = [
            (EpochError::NotFound("x".into()), ErrorKind::NotFound, 404),
            (EpochError::InvalidInput("x".into()), ErrorKind::InvalidInput, 400),
            (EpochError::TransactionFailed("x".into()), ErrorKind::TransactionFailed, 502),
            (EpochError::Timeout("x".into()), ErrorKind::Timeout, 408),
            (EpochError::Upstream("x".into()), ErrorKind::Upstream, 500),
        ];
        for (err, kind, status) in cases {
            assert_eq!(err.kind(), kind);
            assert_eq!(err.status_code(), status);
        }
    }

    #[test]
    fn test_client_errors_and_retryable() {
        assert!(EpochError::NotFound("x".into()).is_client_error());
        assert!(EpochError::InvalidInput("x".into()).is_client_error());
        assert!(!EpochError::TransactionFailed("x".into()).is_client_error());
        assert!(EpochError::Timeout("x".into()).is_retryable());
        assert!(!EpochError::Upstream("x".into()).is_retryable());
    }

    #[test]
    fn test_transaction_abort_is_unwrapped() {
        let err = EpochError::from_transaction(
            "updating status",
            TransactionError::Abort(EpochError::NotFound("distribution d1".into())),
        );
        assert!(matches!(err, EpochError::NotFound(msg) if msg == "distribution d1"));
    }

    #[test]
    fn test_engine_errors_carry_context() {
        let source = serde_json::from_str::<u32>("nope").unwrap_err();
        let err = EpochError::serialization("decoding snapshot for vault 0xabc", source);
        assert_eq!(err.kind(), ErrorKind::Engine);
        assert!(err.to_string().contains("decoding snapshot for vault 0xabc"));
    }
}
