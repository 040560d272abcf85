//! Typed error hierarchy for Taskboard.
//!
//! `BoardError` is what the storage and service layers raise when a request
//! cannot proceed for a domain reason. Storage code returns `anyhow::Result`
//! and wraps these variants, so the API layer downcasts to pick an HTTP
//! status.

use thiserror::Error;

use crate::models::{ObjectKind, ObjectRef, Role};

#[derive(Debug, Error)]
pub enum BoardError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("{0}")]
    Forbidden(String),

    #[error("{object} {id} not found")]
    NotFound { object: ObjectKind, id: i64 },

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(#[source] anyhow::Error),

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BoardError {
    pub fn not_found(obj: ObjectRef) -> Self {
        Self::NotFound {
            object: obj.kind,
            id: obj.id,
        }
    }

    pub fn insufficient_role(required: Role) -> Self {
        Self::Forbidden(format!("{} access required", required))
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

impl From<rusqlite::Error> for BoardError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(e.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_carries_kind_and_id() {
        let err = BoardError::not_found(ObjectRef::task(42));
        match &err {
            BoardError::NotFound { object, id } => {
                assert_eq!(*object, ObjectKind::Task);
                assert_eq!(*id, 42);
            }
            _ => panic!("Expected NotFound"),
        }
        assert_eq!(err.to_string(), "task 42 not found");
    }

    #[test]
    fn test_insufficient_role_names_the_role() {
        let err = BoardError::insufficient_role(Role::Administrator);
        assert!(matches!(err, BoardError::Forbidden(_)));
        assert!(err.to_string().contains("administrator"));
    }

    #[test]
    fn test_board_error_survives_anyhow_round_trip() {
        let err: anyhow::Error = BoardError::validation("bad dates").into();
        let err = err.context("while updating sprint");
        let inner = err.downcast_ref::<BoardError>();
        assert!(matches!(inner, Some(BoardError::Validation(msg)) if msg == "bad dates"));
    }

    #[test]
    fn test_all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&BoardError::LockPoisoned);
        assert_std_error(&BoardError::Unauthorized);
    }
}
