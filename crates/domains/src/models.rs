//! # Domain Models
//!
//! Targets (posts and comments) carry their vote sets and a derived score.
//! User profiles carry the karma materialized from everything they authored.
//! Identifiers are opaque strings handed to us by the content collaborator.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(raw: &str) -> Self {
                Self(raw.to_string())
            }
        }

        impl From<String> for $name {
            fn from(raw: String) -> Self {
                Self(raw)
            }
        }
    };
}

string_id!(
    /// Identity of a user profile (the auth collaborator's uid).
    UserId
);
string_id!(
    /// Identity of a post or comment.
    TargetId
);
string_id!(CommunityId);

/// Namespace for deterministic score-change identifiers.
const SCORE_CHANGE_NAMESPACE: Uuid = Uuid::from_u128(0x6b61_726d_615f_7363_6f72_655f_6368_6e67);

/// Which kind of content a target is. Decides which karma bucket it feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Post,
    Comment,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Post => "post",
            TargetKind::Comment => "comment",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TargetKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "post" => Ok(TargetKind::Post),
            "comment" => Ok(TargetKind::Comment),
            other => Err(format!("unknown target kind `{other}`")),
        }
    }
}

/// A voter's stance on a single target. `None` means no vote (or a retraction).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteDirection {
    Up,
    Down,
    #[default]
    None,
}

impl VoteDirection {
    /// What this stance adds to a target's score.
    pub fn contribution(&self) -> i64 {
        match self {
            VoteDirection::Up => 1,
            VoteDirection::Down => -1,
            VoteDirection::None => 0,
        }
    }
}

/// A post or comment: the unit that accumulates votes and a score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub id: TargetId,
    pub kind: TargetKind,
    pub author_id: UserId,
    pub community_id: Option<CommunityId>,
    /// Always `|upvoters| - |downvoters|` once committed.
    pub score: i64,
    pub upvoters: HashSet<UserId>,
    pub downvoters: HashSet<UserId>,
    /// Bumped on every committed vote; used for optimistic concurrency.
    pub version: u64,
    pub created_at: DateTime<Utc>,
}

impl Target {
    /// A fresh target with no votes.
    pub fn new(id: TargetId, kind: TargetKind, author_id: UserId) -> Self {
        Self {
            id,
            kind,
            author_id,
            community_id: None,
            score: 0,
            upvoters: HashSet::new(),
            downvoters: HashSet::new(),
            version: 0,
            created_at: Utc::now(),
        }
    }

    pub fn in_community(mut self, community_id: CommunityId) -> Self {
        self.community_id = Some(community_id);
        self
    }

    /// The score implied by the vote sets, regardless of the stored `score`.
    pub fn derived_score(&self) -> i64 {
        self.upvoters.len() as i64 - self.downvoters.len() as i64
    }

    /// Disjoint vote sets and a score that matches them.
    pub fn is_consistent(&self) -> bool {
        self.upvoters.is_disjoint(&self.downvoters) && self.score == self.derived_score()
    }

    pub fn vote_of(&self, voter: &UserId) -> VoteDirection {
        if self.upvoters.contains(voter) {
            VoteDirection::Up
        } else if self.downvoters.contains(voter) {
            VoteDirection::Down
        } else {
            VoteDirection::None
        }
    }
}

/// Karma totals for one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Karma {
    pub post_karma: i64,
    pub comment_karma: i64,
    pub total_karma: i64,
}

impl Karma {
    pub fn new(post_karma: i64, comment_karma: i64) -> Self {
        Self {
            post_karma,
            comment_karma,
            total_karma: post_karma + comment_karma,
        }
    }

    /// Adds `delta` to the bucket for `kind` and refreshes the total.
    pub fn apply(&mut self, kind: TargetKind, delta: i64) {
        match kind {
            TargetKind::Post => self.post_karma += delta,
            TargetKind::Comment => self.comment_karma += delta,
        }
        self.total_karma = self.post_karma + self.comment_karma;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub uid: UserId,
    pub post_karma: i64,
    pub comment_karma: i64,
    pub total_karma: i64,
    pub is_admin: bool,
    pub is_banned: bool,
    pub is_verified: bool,
    pub is_premium: bool,
    pub last_active: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn new(uid: UserId) -> Self {
        let now = Utc::now();
        Self {
            uid,
            post_karma: 0,
            comment_karma: 0,
            total_karma: 0,
            is_admin: false,
            is_banned: false,
            is_verified: false,
            is_premium: false,
            last_active: now,
            created_at: now,
        }
    }

    pub fn karma(&self) -> Karma {
        Karma {
            post_karma: self.post_karma,
            comment_karma: self.comment_karma,
            total_karma: self.total_karma,
        }
    }

    pub fn set_karma(&mut self, karma: Karma) {
        self.post_karma = karma.post_karma;
        self.comment_karma = karma.comment_karma;
        self.total_karma = karma.total_karma;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Community {
    pub id: CommunityId,
    pub name: String,
    /// Maintained by the membership collaborator.
    pub member_count: u64,
    pub post_count: u64,
    pub created_at: DateTime<Utc>,
}

impl Community {
    pub fn new(id: CommunityId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            member_count: 0,
            post_count: 0,
            created_at: Utc::now(),
        }
    }
}

/// A committed score change: the unit of idempotent karma application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreChange {
    /// Derived from the target id and the version the change committed at,
    /// so replaying the same commit yields the same id.
    pub change_id: Uuid,
    pub target_id: TargetId,
    pub kind: TargetKind,
    pub author_id: UserId,
    pub delta: i64,
}

impl ScoreChange {
    /// The change produced by committing `target` at its current version.
    pub fn committed(target: &Target, delta: i64) -> Self {
        Self {
            change_id: Self::id_for(&target.id, target.version),
            target_id: target.id.clone(),
            kind: target.kind,
            author_id: target.author_id.clone(),
            delta,
        }
    }

    pub fn id_for(target_id: &TargetId, version: u64) -> Uuid {
        Uuid::new_v5(
            &SCORE_CHANGE_NAMESPACE,
            format!("{target_id}@{version}").as_bytes(),
        )
    }
}

/// What a caller sees after a vote lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteOutcome {
    pub new_score: i64,
    pub new_upvote_count: u64,
    pub new_downvote_count: u64,
}

impl From<&Target> for VoteOutcome {
    fn from(target: &Target) -> Self {
        Self {
            new_score: target.score,
            new_upvote_count: target.upvoters.len() as u64,
            new_downvote_count: target.downvoters.len() as u64,
        }
    }
}

/// Corpus-wide counts. A read-model snapshot, safe to discard at any time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteStats {
    pub total_users: u64,
    pub total_posts: u64,
    pub total_communities: u64,
    pub total_comments: u64,
    /// Heuristic estimate, never a measured presence count.
    pub users_online: u64,
    pub verified_users: u64,
    pub active_users: u64,
    pub computed_at: DateTime<Utc>,
}

impl SiteStats {
    /// Share of active users assumed to be online right now (one in ten).
    pub const ONLINE_DIVISOR: u64 = 10;

    /// `max(1, floor(active * 0.1))`.
    pub fn estimate_online(active_users: u64) -> u64 {
        (active_users / Self::ONLINE_DIVISOR).max(1)
    }

    /// True when every count matches `other`, ignoring `computed_at`.
    pub fn same_counts(&self, other: &SiteStats) -> bool {
        self.total_users == other.total_users
            && self.total_posts == other.total_posts
            && self.total_communities == other.total_communities
            && self.total_comments == other.total_comments
            && self.users_online == other.users_online
            && self.verified_users == other.verified_users
            && self.active_users == other.active_users
    }
}

impl Default for SiteStats {
    /// The documented fallback: all zero, one user online.
    fn default() -> Self {
        Self {
            total_users: 0,
            total_posts: 0,
            total_communities: 0,
            total_comments: 0,
            users_online: 1,
            verified_users: 0,
            active_users: 0,
            computed_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CommunityStats {
    pub member_count: u64,
    pub post_count: u64,
}

impl From<&Community> for CommunityStats {
    fn from(community: &Community) -> Self {
        Self {
            member_count: community.member_count,
            post_count: community.post_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn online_estimate_has_floor_of_one() {
        assert_eq!(SiteStats::estimate_online(0), 1);
        assert_eq!(SiteStats::estimate_online(9), 1);
        assert_eq!(SiteStats::estimate_online(10), 1);
        assert_eq!(SiteStats::estimate_online(25), 2);
        assert_eq!(SiteStats::estimate_online(1_000), 100);
    }

    #[test]
    fn default_site_stats_reports_one_online() {
        let stats = SiteStats::default();
        assert_eq!(stats.users_online, 1);
        assert_eq!(stats.total_users + stats.total_posts + stats.total_comments, 0);
    }

    #[test]
    fn karma_apply_keeps_total_in_sync() {
        let mut karma = Karma::default();
        karma.apply(TargetKind::Post, 3);
        karma.apply(TargetKind::Comment, -1);
        assert_eq!(karma, Karma::new(3, -1));
        assert_eq!(karma.total_karma, 2);
    }

    #[test]
    fn change_id_is_stable_per_commit() {
        let id = TargetId::from("p1");
        assert_eq!(ScoreChange::id_for(&id, 4), ScoreChange::id_for(&id, 4));
        assert_ne!(ScoreChange::id_for(&id, 4), ScoreChange::id_for(&id, 5));
    }

    #[test]
    fn fresh_target_is_consistent() {
        let mut target = Target::new("p1".into(), TargetKind::Post, "author".into());
        assert!(target.is_consistent());
        target.upvoters.insert("u1".into());
        assert!(!target.is_consistent());
        target.score = 1;
        assert!(target.is_consistent());
        assert_eq!(target.vote_of(&"u1".into()), VoteDirection::Up);
    }

    #[test]
    fn vote_direction_serializes_lowercase() {
        let json = serde_json::to_string(&VoteDirection::Down).unwrap();
        assert_eq!(json, "\"down\"");
        let kind: TargetKind = serde_json::from_str("\"comment\"").unwrap();
        assert_eq!(kind, TargetKind::Comment);
    }
}
