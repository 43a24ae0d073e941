//! Shared fixtures for the cross-crate tests: a `KarmaBoard` wired over one
//! `MemoryStore`, plus seeding helpers for users, content, and communities.

use std::sync::Arc;

use domains::{
    Community, CommunityId, ContentStore, Target, TargetId, TargetKind, UserId, UserProfile,
    UserStore,
};
use services::{BoardSettings, KarmaBoard};
use storage_adapters::MemoryStore;

pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub board: Arc<KarmaBoard>,
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_settings(BoardSettings::default())
    }

    pub fn with_settings(settings: BoardSettings) -> Self {
        let store = Arc::new(MemoryStore::new());
        let board = KarmaBoard::new(store.clone(), store.clone(), store.clone(), settings);
        Self {
            store,
            board: Arc::new(board),
        }
    }

    pub fn user(&self, id: &str) -> UserId {
        self.store.insert_user(UserProfile::new(id.into()));
        id.into()
    }

    pub fn banned_user(&self, id: &str) -> UserId {
        let mut profile = UserProfile::new(id.into());
        profile.is_banned = true;
        self.store.insert_user(profile);
        id.into()
    }

    pub fn verified_user(&self, id: &str) -> UserId {
        let mut profile = UserProfile::new(id.into());
        profile.is_verified = true;
        self.store.insert_user(profile);
        id.into()
    }

    pub fn post(&self, id: &str, author: &UserId) -> TargetId {
        self.store
            .insert_target(Target::new(id.into(), TargetKind::Post, author.clone()));
        id.into()
    }

    pub fn post_in(&self, id: &str, author: &UserId, community: &CommunityId) -> TargetId {
        self.store.insert_target(
            Target::new(id.into(), TargetKind::Post, author.clone()).in_community(community.clone()),
        );
        id.into()
    }

    pub fn comment(&self, id: &str, author: &UserId) -> TargetId {
        self.store
            .insert_target(Target::new(id.into(), TargetKind::Comment, author.clone()));
        id.into()
    }

    pub fn community(&self, id: &str, member_count: u64) -> CommunityId {
        let mut community = Community::new(id.into(), id);
        community.member_count = member_count;
        self.store.insert_community(community);
        id.into()
    }

    /// Current stored state of a target. Panics if it is missing.
    pub async fn target(&self, id: &TargetId) -> Target {
        ContentStore::get_target(self.store.as_ref(), id)
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| panic!("target {id} missing"))
    }

    /// Current stored profile. Panics if it is missing.
    pub async fn profile(&self, id: &UserId) -> UserProfile {
        UserStore::get_profile(self.store.as_ref(), id)
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| panic!("user {id} missing"))
    }
}
