//! # Errors
//!
//! Votes and karma are authoritative and fail loudly through `DomainError`.
//! Statistics degrade instead; their causes are `StatsFault`s (see
//! `aggregation`). Adapters report their own failures as `StoreError`.

use thiserror::Error;

use crate::models::{TargetId, TargetKind, UserId};

/// Why a voter was turned away.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnauthorizedReason {
    #[error("voter is banned")]
    Banned,
    #[error("authors may not vote on their own content")]
    SelfVote,
    #[error("votes cannot be retracted")]
    RetractionDisabled,
    #[error("voter has no profile")]
    UnknownVoter,
}

/// The primary error type for vote and karma operations.
#[derive(Error, Debug)]
pub enum DomainError {
    /// The target does not exist. Not retried.
    #[error("target not found with ID {0}")]
    InvalidTarget(TargetId),

    /// The caller named the wrong kind for an existing target.
    #[error("target {id} is a {actual}, not a {expected}")]
    TargetKindMismatch {
        id: TargetId,
        expected: TargetKind,
        actual: TargetKind,
    },

    #[error("user not found with ID {0}")]
    UserNotFound(UserId),

    /// Banned voter, self-vote, or a disallowed retraction. Not retried.
    #[error("unauthorized: {0}")]
    Unauthorized(UnauthorizedReason),

    /// Too many concurrent-update collisions on one target. Transient.
    #[error("conflict: gave up on target {target} after {attempts} attempts")]
    ConflictRetryExceeded { target: TargetId, attempts: u32 },

    /// Votes kept landing on the user's content while their karma was being
    /// rebuilt. Transient.
    #[error("conflict: gave up rebuilding karma for {user} after {attempts} attempts")]
    RebuildContended { user: UserId, attempts: u32 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DomainError {
    /// Whether the caller may reasonably retry the same request.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DomainError::ConflictRetryExceeded { .. }
                | DomainError::RebuildContended { .. }
                | DomainError::Store(StoreError::Unavailable(_))
        )
    }
}

/// Failures reported by storage adapters.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A collection is missing or not yet provisioned.
    #[error("collection `{0}` is unavailable")]
    Unavailable(String),

    /// Anything else the backend reported.
    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// A specialized Result type for vote and karma logic.
pub type Result<T> = std::result::Result<T, DomainError>;
