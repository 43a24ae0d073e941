//! # AggregationCache
//!
//! Short-TTL cache in front of `StatsService`. Bounds how often a busy site
//! scans the corpus. Degraded results are cached like clean ones; fatal
//! results are served as defaults but never cached, so recovery shows up on
//! the next request.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use domains::{Aggregation, CommunityId, CommunityStats, Result, SiteStats};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::stats::StatsService;

#[derive(Debug, Clone)]
struct Cached<T> {
    value: T,
    stored_at: Instant,
}

impl<T: Clone> Cached<T> {
    fn fresh(&self, ttl: Duration) -> Option<T> {
        (self.stored_at.elapsed() < ttl).then(|| self.value.clone())
    }
}

pub struct AggregationCache {
    stats: StatsService,
    ttl: Duration,
    site: RwLock<Option<Cached<SiteStats>>>,
    /// Single-flight guard for site recomputation.
    site_refresh: Mutex<()>,
    communities: DashMap<CommunityId, Cached<CommunityStats>>,
}

impl AggregationCache {
    pub fn new(stats: StatsService, ttl: Duration) -> Self {
        Self {
            stats,
            ttl,
            site: RwLock::new(None),
            site_refresh: Mutex::new(()),
            communities: DashMap::new(),
        }
    }

    /// Site stats, from cache when fresh. Never fails.
    pub async fn site_stats(&self) -> SiteStats {
        if let Some(hit) = self.cached_site().await {
            return hit;
        }
        let _flight = self.site_refresh.lock().await;
        // Another task may have refreshed while we waited.
        if let Some(hit) = self.cached_site().await {
            return hit;
        }
        self.refresh_site().await
    }

    /// Recomputes site stats, storing the result unless it was fatal.
    pub async fn refresh_site(&self) -> SiteStats {
        let outcome = self.stats.compute_site_stats().await;
        let cacheable = !outcome.is_fatal();
        let value = settle("site", outcome);
        if cacheable {
            *self.site.write().await = Some(Cached {
                value: value.clone(),
                stored_at: Instant::now(),
            });
        }
        value
    }

    /// Community stats, from cache when fresh. Never fails.
    pub async fn community_stats(&self, id: &CommunityId) -> CommunityStats {
        if let Some(hit) = self
            .communities
            .get(id)
            .and_then(|entry| entry.fresh(self.ttl))
        {
            return hit;
        }
        let outcome = self.stats.compute_community_stats(id).await;
        let cacheable = !outcome.is_fatal();
        let value = settle("community", outcome);
        if cacheable {
            // Unknown ids are cached too; keep the map bounded to live entries.
            let ttl = self.ttl;
            self.communities
                .retain(|_, cached| cached.stored_at.elapsed() < ttl);
            self.communities.insert(
                id.clone(),
                Cached {
                    value,
                    stored_at: Instant::now(),
                },
            );
        }
        value
    }

    /// Repairs a community's post counter and drops its cached stats.
    pub async fn recount_community_posts(&self, id: &CommunityId) -> Result<u64> {
        let count = self.stats.recount_community_posts(id).await?;
        self.communities.remove(id);
        Ok(count)
    }

    pub async fn invalidate(&self) {
        *self.site.write().await = None;
        self.communities.clear();
    }

    /// Keeps the site entry warm every `every`. Abort the handle to stop;
    /// an interrupted refresh leaves nothing half-written.
    pub fn spawn_refresher(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let stats = self.refresh_site().await;
                debug!(total_users = stats.total_users, "site stats refreshed");
            }
        })
    }

    async fn cached_site(&self) -> Option<SiteStats> {
        self.site
            .read()
            .await
            .as_ref()
            .and_then(|cached| cached.fresh(self.ttl))
    }
}

/// Collapses an aggregation into a caller-facing value, logging degraded and
/// fatal outcomes distinctly.
fn settle<T: Default>(scope: &'static str, outcome: Aggregation<T>) -> T {
    match &outcome {
        Aggregation::Ok(_) => {}
        Aggregation::Degraded(_, causes) => {
            for cause in causes {
                warn!(scope, %cause, "statistics degraded");
            }
        }
        Aggregation::Fatal(cause) => {
            error!(scope, %cause, "statistics unavailable, serving defaults");
        }
    }
    outcome.value_or_default()
}
