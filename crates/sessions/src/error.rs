use thiserror::Error;

use crate::session::SessionStatus;

#[derive(Debug, Error)]
pub enum Error {
    #[error("session not found: {id}")]
    NotFound { id: String },

    #[error("invalid session transition {from} -> {to}")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },
}

impl Error {
    #[must_use]
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    #[must_use]
    pub fn invalid_transition(from: SessionStatus, to: SessionStatus) -> Self {
        Self::InvalidTransition { from, to }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
