//! # Ports
//!
//! Any storage adapter must implement these traits to back the services.
//! Content existence, ban/verification flags, and community counters are
//! owned by collaborators; the ports only expose what this core reads or the
//! fields it is allowed to write (vote sets, score, karma, post counters).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::StoreError;
use crate::models::{
    Community, CommunityId, Karma, ScoreChange, Target, TargetId, TargetKind, UserId, UserProfile,
};

/// Result of a versioned target write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitStatus {
    Committed,
    /// The stored version moved on (or the target vanished) since it was read.
    Conflict,
}

/// Result of applying a `ScoreChange` to its author's karma.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KarmaApplied {
    /// The delta landed; carries the new totals.
    Applied(Karma),
    /// This change id was applied before; nothing changed.
    Duplicate(Karma),
    /// The author has no profile.
    UnknownUser,
}

/// Result of a conditional karma overwrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KarmaReplaced {
    Replaced,
    /// Stored karma no longer matched the expected value, or the user still
    /// has unapplied changes pending.
    Stale,
    UnknownUser,
}

/// Posts and comments with their vote sets.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn get_target(&self, id: &TargetId) -> Result<Option<Target>, StoreError>;

    /// Persists `target` (vote sets, score, version) in one write, only if the
    /// stored version still equals `expected_version`. `pending` karma
    /// changes are recorded in the same write and stay pending until
    /// `clear_pending_change`.
    async fn commit_target(
        &self,
        target: &Target,
        expected_version: u64,
        pending: &[ScoreChange],
    ) -> Result<CommitStatus, StoreError>;

    /// Committed changes for `target` whose karma has not been confirmed.
    async fn pending_changes(&self, target: &TargetId) -> Result<Vec<ScoreChange>, StoreError>;

    async fn pending_changes_by_author(
        &self,
        author: &UserId,
    ) -> Result<Vec<ScoreChange>, StoreError>;

    /// Forgets a pending change once its karma landed. Unknown ids are ignored.
    async fn clear_pending_change(&self, change_id: Uuid) -> Result<(), StoreError>;

    async fn targets_by_author(&self, author: &UserId) -> Result<Vec<Target>, StoreError>;

    async fn count_targets(&self, kind: TargetKind) -> Result<u64, StoreError>;

    async fn count_community_posts(&self, community: &CommunityId) -> Result<u64, StoreError>;
}

/// User profiles. Karma fields are written only through this port.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_profile(&self, uid: &UserId) -> Result<Option<UserProfile>, StoreError>;

    /// Applies `change.delta` to the author's karma bucket exactly once per
    /// `change.change_id`, atomically with recording the id.
    async fn apply_karma_change(&self, change: &ScoreChange) -> Result<KarmaApplied, StoreError>;

    /// Overwrites a user's karma (rebuild), only if it still equals
    /// `expected` and no change authored by the user is pending. Adapters
    /// check both in the same atomic step as the write.
    async fn replace_karma(
        &self,
        uid: &UserId,
        expected: Karma,
        karma: Karma,
    ) -> Result<KarmaReplaced, StoreError>;

    async fn list_user_ids(&self) -> Result<Vec<UserId>, StoreError>;

    async fn count_users(&self) -> Result<u64, StoreError>;

    async fn count_verified_users(&self) -> Result<u64, StoreError>;

    async fn count_active_since(&self, since: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// Communities and their maintained counters.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait CommunityStore: Send + Sync {
    async fn get_community(&self, id: &CommunityId) -> Result<Option<Community>, StoreError>;

    async fn count_communities(&self) -> Result<u64, StoreError>;

    /// Returns false if the community is missing.
    async fn set_post_count(&self, id: &CommunityId, count: u64) -> Result<bool, StoreError>;
}
