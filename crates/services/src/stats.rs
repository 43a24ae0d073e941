//! # StatsService
//!
//! Corpus-wide and per-community counts. Read-only and idempotent, so a
//! computation may be abandoned at any point. Results are `Aggregation`s:
//! comments are best-effort, every other site field is exact or the whole
//! computation is fatal.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use domains::{
    Aggregation, CommunityId, CommunityStats, CommunityStore, ContentStore, DomainError, Result,
    SiteStats, StatsFault, StoreError, TargetKind, UserStore,
};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSettings {
    /// Trailing window for `active_users`.
    pub active_window: chrono::Duration,
    /// Upper bound on one site-wide computation.
    pub compute_timeout: Duration,
}

impl Default for StatsSettings {
    fn default() -> Self {
        Self {
            active_window: chrono::Duration::hours(24),
            compute_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Clone)]
pub struct StatsService {
    users: Arc<dyn UserStore>,
    content: Arc<dyn ContentStore>,
    communities: Arc<dyn CommunityStore>,
    settings: StatsSettings,
}

impl StatsService {
    pub fn new(
        users: Arc<dyn UserStore>,
        content: Arc<dyn ContentStore>,
        communities: Arc<dyn CommunityStore>,
        settings: StatsSettings,
    ) -> Self {
        Self {
            users,
            content,
            communities,
            settings,
        }
    }

    pub async fn compute_site_stats(&self) -> Aggregation<SiteStats> {
        match tokio::time::timeout(self.settings.compute_timeout, self.gather_site_stats()).await {
            Ok(outcome) => outcome,
            Err(_) => Aggregation::Fatal(StatsFault::TotalAggregationFailure(format!(
                "timed out after {:?}",
                self.settings.compute_timeout
            ))),
        }
    }

    async fn gather_site_stats(&self) -> Aggregation<SiteStats> {
        let active_since = Utc::now() - self.settings.active_window;
        let (users, verified, active, posts, communities, comments) = tokio::join!(
            self.users.count_users(),
            self.users.count_verified_users(),
            self.users.count_active_since(active_since),
            self.content.count_targets(TargetKind::Post),
            self.communities.count_communities(),
            self.content.count_targets(TargetKind::Comment),
        );

        let exact = (|| -> std::result::Result<_, StoreError> {
            Ok((users?, verified?, active?, posts?, communities?))
        })();
        let (total_users, verified_users, active_users, total_posts, total_communities) =
            match exact {
                Ok(counts) => counts,
                Err(err) => {
                    return Aggregation::Fatal(StatsFault::TotalAggregationFailure(err.to_string()))
                }
            };

        let mut causes = Vec::new();
        let total_comments = comments.unwrap_or_else(|err| {
            causes.push(StatsFault::PartialAggregationFailure {
                field: "total_comments",
                reason: err.to_string(),
            });
            0
        });

        let stats = SiteStats {
            total_users,
            total_posts,
            total_communities,
            total_comments,
            users_online: SiteStats::estimate_online(active_users),
            verified_users,
            active_users,
            computed_at: Utc::now(),
        };
        if causes.is_empty() {
            Aggregation::Ok(stats)
        } else {
            Aggregation::Degraded(stats, causes)
        }
    }

    /// The community's maintained counters. Never a scan.
    pub async fn compute_community_stats(&self, id: &CommunityId) -> Aggregation<CommunityStats> {
        match self.communities.get_community(id).await {
            Ok(Some(community)) => Aggregation::Ok(CommunityStats::from(&community)),
            Ok(None) => Aggregation::Ok(CommunityStats::default()),
            Err(err) => Aggregation::Fatal(StatsFault::TotalAggregationFailure(err.to_string())),
        }
    }

    /// Repairs a community's post counter from the content store.
    pub async fn recount_community_posts(&self, id: &CommunityId) -> Result<u64> {
        let count = self.content.count_community_posts(id).await?;
        if !self.communities.set_post_count(id, count).await? {
            return Err(DomainError::Store(StoreError::Backend(format!(
                "community {id} vanished during recount"
            ))));
        }
        info!(community = %id, post_count = count, "community post count recounted");
        Ok(count)
    }
}
