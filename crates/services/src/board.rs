//! # KarmaBoard
//!
//! The read/write surface collaborators call: vote, score, karma, and
//! statistics. Identity is always an explicit parameter.

use std::sync::Arc;
use std::time::Duration;

use domains::{
    CommunityId, CommunityStats, CommunityStore, ContentStore, Karma, Result, SiteStats, TargetId,
    TargetKind, UserId, UserStore, VoteDirection, VoteOutcome,
};
use tokio::task::JoinHandle;

use crate::cache::AggregationCache;
use crate::karma::{KarmaAggregator, RebuildReport};
use crate::ledger::{VoteLedger, VotePolicy};
use crate::score::ScoreEngine;
use crate::stats::{StatsService, StatsSettings};
use crate::votes::VoteService;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardSettings {
    pub policy: VotePolicy,
    /// Commit attempts per vote before `ConflictRetryExceeded`.
    pub max_conflict_retries: u32,
    pub stats: StatsSettings,
    pub stats_cache_ttl: Duration,
}

impl Default for BoardSettings {
    fn default() -> Self {
        Self {
            policy: VotePolicy::default(),
            max_conflict_retries: 5,
            stats: StatsSettings::default(),
            stats_cache_ttl: Duration::from_secs(30),
        }
    }
}

pub struct KarmaBoard {
    votes: VoteService,
    scores: ScoreEngine,
    karma: KarmaAggregator,
    cache: Arc<AggregationCache>,
}

impl KarmaBoard {
    pub fn new(
        content: Arc<dyn ContentStore>,
        users: Arc<dyn UserStore>,
        communities: Arc<dyn CommunityStore>,
        settings: BoardSettings,
    ) -> Self {
        let karma = KarmaAggregator::new(users.clone(), content.clone());
        let votes = VoteService::new(
            VoteLedger::new(settings.policy),
            karma.clone(),
            content.clone(),
            users.clone(),
            settings.max_conflict_retries,
        );
        let stats = StatsService::new(users, content.clone(), communities, settings.stats);
        Self {
            votes,
            scores: ScoreEngine::new(content),
            karma,
            cache: Arc::new(AggregationCache::new(stats, settings.stats_cache_ttl)),
        }
    }

    pub async fn apply_vote(
        &self,
        voter: &UserId,
        target_id: &TargetId,
        kind: TargetKind,
        direction: VoteDirection,
    ) -> Result<VoteOutcome> {
        self.votes.apply_vote(voter, target_id, kind, direction).await
    }

    pub async fn vote_of(&self, voter: &UserId, target_id: &TargetId) -> Result<VoteDirection> {
        self.votes.vote_of(voter, target_id).await
    }

    pub async fn get_score(&self, target_id: &TargetId) -> Result<i64> {
        self.scores.score_of(target_id).await
    }

    /// Repairs a drifted score and settles the resulting karma change.
    pub async fn reconcile_score(&self, target_id: &TargetId) -> Result<i64> {
        let score = self.scores.reconcile(target_id).await?;
        self.karma.settle_target(target_id).await?;
        Ok(score)
    }

    pub async fn get_karma(&self, user: &UserId) -> Result<Karma> {
        self.karma.karma_of(user).await
    }

    pub async fn rebuild_karma(&self, user: &UserId) -> Result<Karma> {
        self.karma.rebuild(user).await
    }

    pub async fn rebuild_all_karma(&self) -> Result<RebuildReport> {
        self.karma.rebuild_all().await
    }

    /// Never fails; serves defaults when the store is unreachable.
    pub async fn get_site_stats(&self) -> SiteStats {
        self.cache.site_stats().await
    }

    /// Never fails; unknown communities report zero.
    pub async fn get_community_stats(&self, id: &CommunityId) -> CommunityStats {
        self.cache.community_stats(id).await
    }

    pub async fn recount_community_posts(&self, id: &CommunityId) -> Result<u64> {
        self.cache.recount_community_posts(id).await
    }

    pub fn spawn_stats_refresher(&self, every: Duration) -> JoinHandle<()> {
        self.cache.clone().spawn_refresher(every)
    }
}
