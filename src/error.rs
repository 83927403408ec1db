//! Error taxonomy shared by the graph engine, the offline queue, and the RPC surface.
//!
//! Every failure is classified into one of five kinds. The classification decides
//! what happens next: validation and auth failures are surfaced immediately,
//! transient failures are queued for offline replay.

use thiserror::Error;

/// Result type alias for graph and sync operations.
pub type Result<T> = std::result::Result<T, GraphError>;

/// Classified failure of a graph operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// Malformed or missing required input. Never retried.
    #[error("{0}")]
    InvalidArgument(String),

    /// No caller identity. Never retried.
    #[error("{0}")]
    Unauthenticated(String),

    /// A referenced entity does not exist. Surfaced, not queued.
    #[error("{0}")]
    NotFound(String),

    /// Unexpected storage or provider fault.
    #[error("{0}")]
    Internal(String),

    /// Connectivity-class failure (busy store, network, provider outage).
    /// Always eligible for offline replay.
    #[error("{0}")]
    Transient(String),
}

impl GraphError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Wire name of the error kind, e.g. `"invalid-argument"`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "invalid-argument",
            Self::Unauthenticated(_) => "unauthenticated",
            Self::NotFound(_) => "not-found",
            Self::Internal(_) => "internal",
            Self::Transient(_) => "unavailable",
        }
    }

    /// Whether a foreground mutation failing with this error should be queued
    /// for replay instead of surfaced.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// `"{code}: {message}"`, the form returned across the RPC boundary.
    pub fn to_wire(&self) -> String {
        format!("{}: {}", self.code(), self)
    }
}

impl From<rusqlite::Error> for GraphError {
    fn from(e: rusqlite::Error) -> Self {
        match e.sqlite_error_code() {
            Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked) => {
                Self::Transient(format!("database unavailable: {e}"))
            }
            _ => Self::Internal(format!("database error: {e}")),
        }
    }
}

impl From<serde_json::Error> for GraphError {
    fn from(e: serde_json::Error) -> Self {
        Self::Internal(format!("serialization error: {e}"))
    }
}

impl From<tokio::task::JoinError> for GraphError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Internal(format!("background task failed: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_wire_names() {
        assert_eq!(GraphError::invalid("x").code(), "invalid-argument");
        assert_eq!(GraphError::Unauthenticated("x".into()).code(), "unauthenticated");
        assert_eq!(GraphError::not_found("x").code(), "not-found");
        assert_eq!(GraphError::internal("x").code(), "internal");
    }

    #[test]
    fn only_transient_is_queueable() {
        assert!(GraphError::Transient("offline".into()).is_transient());
        assert!(!GraphError::internal("boom").is_transient());
        assert!(!GraphError::invalid("bad").is_transient());
        assert!(!GraphError::not_found("gone").is_transient());
    }

    #[test]
    fn busy_database_is_transient() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("database is locked".into()),
        );
        assert!(GraphError::from(err).is_transient());

        let err = rusqlite::Error::QueryReturnedNoRows;
        assert_eq!(GraphError::from(err).code(), "internal");
    }

    #[test]
    fn wire_format_prefixes_code() {
        let err = GraphError::invalid("point id is required");
        assert_eq!(err.to_wire(), "invalid-argument: point id is required");
    }
}
