//! # MemoryStore
//!
//! In-memory implementation of every port. Each record lives in a `DashMap`
//! shard keyed by its id, so writes to different targets or users never
//! contend, and a single record is updated under its shard's write guard.
//!
//! The `insert_*`/`set_*` helpers stand in for the collaborators that own
//! content, profiles, and memberships.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use domains::{
    CommitStatus, Community, CommunityId, CommunityStore, ContentStore, Karma, KarmaApplied,
    KarmaReplaced, ScoreChange, StoreError, Target, TargetId, TargetKind, UserId, UserProfile, UserStore,
};
use tracing::debug;
use uuid::Uuid;

struct UserRecord {
    profile: UserProfile,
    /// Change ids already folded into this user's karma.
    applied: HashSet<Uuid>,
}

pub struct MemoryStore {
    targets: DashMap<TargetId, Target>,
    users: DashMap<UserId, UserRecord>,
    communities: DashMap<CommunityId, Community>,
    /// Committed score changes whose karma is not yet confirmed.
    pending: DashMap<Uuid, ScoreChange>,
    comments_provisioned: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            targets: DashMap::new(),
            users: DashMap::new(),
            communities: DashMap::new(),
            pending: DashMap::new(),
            comments_provisioned: AtomicBool::new(true),
        }
    }

    /// Stores a profile as the auth collaborator would. Replaces any existing
    /// profile and forgets its applied-change history.
    pub fn insert_user(&self, profile: UserProfile) {
        self.users.insert(
            profile.uid.clone(),
            UserRecord {
                profile,
                applied: HashSet::new(),
            },
        );
    }

    /// Stores content as the CRUD collaborator would. A new post bumps its
    /// community's post counter.
    pub fn insert_target(&self, target: Target) {
        let bumps_community = match (&target.community_id, target.kind) {
            (Some(community), TargetKind::Post) if !self.targets.contains_key(&target.id) => {
                Some(community.clone())
            }
            _ => None,
        };
        self.targets.insert(target.id.clone(), target);
        if let Some(community) = bumps_community {
            if let Some(mut entry) = self.communities.get_mut(&community) {
                entry.post_count += 1;
            }
        }
    }

    pub fn insert_community(&self, community: Community) {
        self.communities.insert(community.id.clone(), community);
    }

    /// Membership collaborator write. Returns false if the community is missing.
    pub fn set_member_count(&self, id: &CommunityId, member_count: u64) -> bool {
        match self.communities.get_mut(id) {
            Some(mut entry) => {
                entry.member_count = member_count;
                true
            }
            None => false,
        }
    }

    /// Activity collaborator write. Returns false if the user is missing.
    pub fn touch_user(&self, uid: &UserId, at: DateTime<Utc>) -> bool {
        match self.users.get_mut(uid) {
            Some(mut record) => {
                record.profile.last_active = at;
                true
            }
            None => false,
        }
    }

    /// Simulates a comments collection that is missing or not yet provisioned.
    pub fn set_comments_provisioned(&self, provisioned: bool) {
        self.comments_provisioned.store(provisioned, Ordering::SeqCst);
    }

    /// Overwrites a stored target, bypassing version checks. Repair tooling only.
    pub fn overwrite_target(&self, target: Target) {
        self.targets.insert(target.id.clone(), target);
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn get_target(&self, id: &TargetId) -> Result<Option<Target>, StoreError> {
        Ok(self.targets.get(id).map(|entry| entry.value().clone()))
    }

    async fn commit_target(
        &self,
        target: &Target,
        expected_version: u64,
        pending: &[ScoreChange],
    ) -> Result<CommitStatus, StoreError> {
        let Some(mut stored) = self.targets.get_mut(&target.id) else {
            return Ok(CommitStatus::Conflict);
        };
        if stored.version != expected_version {
            debug!(
                target_id = %target.id,
                expected_version,
                stored_version = stored.version,
                "stale target commit"
            );
            return Ok(CommitStatus::Conflict);
        }
        stored.score = target.score;
        stored.upvoters = target.upvoters.clone();
        stored.downvoters = target.downvoters.clone();
        stored.version = target.version;
        // Recorded before the target guard drops, so no reader sees the new
        // score without its pending change.
        for change in pending {
            self.pending.insert(change.change_id, change.clone());
        }
        Ok(CommitStatus::Committed)
    }

    async fn pending_changes(&self, target: &TargetId) -> Result<Vec<ScoreChange>, StoreError> {
        Ok(self
            .pending
            .iter()
            .filter(|entry| &entry.target_id == target)
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn pending_changes_by_author(
        &self,
        author: &UserId,
    ) -> Result<Vec<ScoreChange>, StoreError> {
        Ok(self
            .pending
            .iter()
            .filter(|entry| &entry.author_id == author)
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn clear_pending_change(&self, change_id: Uuid) -> Result<(), StoreError> {
        self.pending.remove(&change_id);
        Ok(())
    }

    async fn targets_by_author(&self, author: &UserId) -> Result<Vec<Target>, StoreError> {
        Ok(self
            .targets
            .iter()
            .filter(|entry| &entry.author_id == author)
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn count_targets(&self, kind: TargetKind) -> Result<u64, StoreError> {
        if kind == TargetKind::Comment && !self.comments_provisioned.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("comments".into()));
        }
        Ok(self.targets.iter().filter(|entry| entry.kind == kind).count() as u64)
    }

    async fn count_community_posts(&self, community: &CommunityId) -> Result<u64, StoreError> {
        Ok(self
            .targets
            .iter()
            .filter(|entry| {
                entry.kind == TargetKind::Post && entry.community_id.as_ref() == Some(community)
            })
            .count() as u64)
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn get_profile(&self, uid: &UserId) -> Result<Option<UserProfile>, StoreError> {
        Ok(self.users.get(uid).map(|record| record.profile.clone()))
    }

    async fn apply_karma_change(&self, change: &ScoreChange) -> Result<KarmaApplied, StoreError> {
        let Some(mut record) = self.users.get_mut(&change.author_id) else {
            return Ok(KarmaApplied::UnknownUser);
        };
        if !record.applied.insert(change.change_id) {
            return Ok(KarmaApplied::Duplicate(record.profile.karma()));
        }
        let mut karma = record.profile.karma();
        karma.apply(change.kind, change.delta);
        record.profile.set_karma(karma);
        Ok(KarmaApplied::Applied(karma))
    }

    async fn replace_karma(
        &self,
        uid: &UserId,
        expected: Karma,
        karma: Karma,
    ) -> Result<KarmaReplaced, StoreError> {
        let Some(mut record) = self.users.get_mut(uid) else {
            return Ok(KarmaReplaced::UnknownUser);
        };
        if record.profile.karma() != expected
            || self.pending.iter().any(|entry| &entry.author_id == uid)
        {
            return Ok(KarmaReplaced::Stale);
        }
        record.profile.set_karma(karma);
        Ok(KarmaReplaced::Replaced)
    }

    async fn list_user_ids(&self) -> Result<Vec<UserId>, StoreError> {
        Ok(self.users.iter().map(|entry| entry.key().clone()).collect())
    }

    async fn count_users(&self) -> Result<u64, StoreError> {
        Ok(self.users.len() as u64)
    }

    async fn count_verified_users(&self) -> Result<u64, StoreError> {
        Ok(self
            .users
            .iter()
            .filter(|entry| entry.profile.is_verified)
            .count() as u64)
    }

    async fn count_active_since(&self, since: DateTime<Utc>) -> Result<u64, StoreError> {
        Ok(self
            .users
            .iter()
            .filter(|entry| entry.profile.last_active >= since)
            .count() as u64)
    }
}

#[async_trait]
impl CommunityStore for MemoryStore {
    async fn get_community(&self, id: &CommunityId) -> Result<Option<Community>, StoreError> {
        Ok(self.communities.get(id).map(|entry| entry.value().clone()))
    }

    async fn count_communities(&self) -> Result<u64, StoreError> {
        Ok(self.communities.len() as u64)
    }

    async fn set_post_count(&self, id: &CommunityId, count: u64) -> Result<bool, StoreError> {
        match self.communities.get_mut(id) {
            Some(mut entry) => {
                entry.post_count = count;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
