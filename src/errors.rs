use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::{SessionId, UserId};

/// Coarse failure category surfaced to callers of the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    InvalidState,
    UnsupportedGameType,
    StorageUnavailable,
    Unauthenticated,
    Forbidden,
}

/// Top-level error type for session coordination
#[derive(Error, Debug, Clone)]
pub enum SessionError {
    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: SessionId },

    #[error("Game type not found: {name}")]
    GameTypeNotFound { name: String },

    #[error("User not found: {user_id}")]
    UserNotFound { user_id: UserId },

    #[error("Invalid session state: {details}")]
    InvalidState { details: String },

    #[error("Unsupported game type: {name}")]
    UnsupportedGameType { name: String },

    #[error("Storage unavailable: {details}")]
    StorageUnavailable { details: String },

    #[error("Authentication required: {details}")]
    Unauthenticated { details: String },

    #[error("Forbidden: {details}")]
    Forbidden { details: String },
}

/// Errors raised by session store and user directory adapters
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("Database error: {details}")]
    Database { details: String },

    #[error("Corrupt record: {details}")]
    Corrupt { details: String },

    #[error("Session {session_id} already exists")]
    DuplicateSession { session_id: SessionId },
}

/// Errors raised while building the game catalog
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Duplicate game type: {name}")]
    DuplicateGameType { name: String },

    #[error("Invalid player bounds for {name}: min={min_players}, max={max_players}")]
    InvalidBounds {
        name: String,
        min_players: u32,
        max_players: u32,
    },
}

/// Result type aliases for convenience
pub type SessionResult<T> = Result<T, SessionError>;
pub type StoreResult<T> = Result<T, StoreError>;

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SessionNotFound { .. }
            | Self::GameTypeNotFound { .. }
            | Self::UserNotFound { .. } => ErrorKind::NotFound,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::UnsupportedGameType { .. } => ErrorKind::UnsupportedGameType,
            Self::StorageUnavailable { .. } => ErrorKind::StorageUnavailable,
            Self::Unauthenticated { .. } => ErrorKind::Unauthenticated,
            Self::Forbidden { .. } => ErrorKind::Forbidden,
        }
    }

    pub fn invalid_state(details: impl Into<String>) -> Self {
        Self::InvalidState {
            details: details.into(),
        }
    }

    pub fn storage_unavailable(details: impl Into<String>) -> Self {
        Self::StorageUnavailable {
            details: details.into(),
        }
    }

    pub fn unauthenticated(details: impl Into<String>) -> Self {
        Self::Unauthenticated {
            details: details.into(),
        }
    }

    pub fn unsupported_game_type(name: impl Into<String>) -> Self {
        Self::UnsupportedGameType { name: name.into() }
    }
}

impl StoreError {
    pub fn database(details: impl Into<String>) -> Self {
        Self::Database {
            details: details.into(),
        }
    }

    pub fn corrupt(details: impl Into<String>) -> Self {
        Self::Corrupt {
            details: details.into(),
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::database(err.to_string())
    }
}

impl From<StoreError> for SessionError {
    fn from(err: StoreError) -> Self {
        SessionError::storage_unavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_variants_share_kind() {
        let session = SessionError::SessionNotFound { session_id: 7 };
        let game = SessionError::GameTypeNotFound {
            name: "Roulette".to_string(),
        };
        let user = SessionError::UserNotFound {
            user_id: uuid::Uuid::nil(),
        };

        assert_eq!(session.kind(), ErrorKind::NotFound);
        assert_eq!(game.kind(), ErrorKind::NotFound);
        assert_eq!(user.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_store_error_becomes_storage_unavailable() {
        let err: SessionError = StoreError::database("disk I/O error").into();
        assert_eq!(err.kind(), ErrorKind::StorageUnavailable);
        assert!(err.to_string().contains("disk I/O error"));
    }

    #[test]
    fn test_kind_reads_back_from_its_wire_name() {
        let wire = serde_json::to_string(&ErrorKind::UnsupportedGameType).unwrap();
        assert_eq!(wire, "\"unsupported_game_type\"");

        let kind: ErrorKind = serde_json::from_str("\"storage_unavailable\"").unwrap();
        assert_eq!(kind, ErrorKind::StorageUnavailable);
    }
}
