//! # KarmaAggregator
//!
//! Karma is a materialized view over the scores of everything a user
//! authored. It is kept current incrementally, one `ScoreChange` at a time,
//! and can be rebuilt from scratch when it drifts. Both paths must agree for
//! the same final vote state.
//!
//! Every change is committed as pending together with its target write and
//! cleared only after it lands, so a failed karma write is picked up by the
//! next vote on that target or the next rebuild of its author.

use std::sync::Arc;

use domains::{
    ContentStore, DomainError, Karma, KarmaApplied, KarmaReplaced, Result, ScoreChange, Target,
    TargetId, UserId, UserStore,
};
use tracing::{debug, info, warn};

/// Rebuild attempts before giving up on a user whose content keeps moving.
const REBUILD_ATTEMPTS: u32 = 5;

/// Outcome of a full karma rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RebuildReport {
    pub users_scanned: u64,
    /// Users whose stored karma differed from the rebuilt value.
    pub users_corrected: u64,
}

#[derive(Clone)]
pub struct KarmaAggregator {
    users: Arc<dyn UserStore>,
    content: Arc<dyn ContentStore>,
}

impl KarmaAggregator {
    pub fn new(users: Arc<dyn UserStore>, content: Arc<dyn ContentStore>) -> Self {
        Self { users, content }
    }

    /// Sums target scores into post and comment buckets.
    pub fn karma_from<'a>(targets: impl IntoIterator<Item = &'a Target>) -> Karma {
        let mut karma = Karma::default();
        for target in targets {
            karma.apply(target.kind, target.score);
        }
        karma
    }

    /// Applies one committed change to its author. Replaying a change that
    /// already landed is a no-op.
    pub async fn apply(&self, change: &ScoreChange) -> Result<Karma> {
        match self.users.apply_karma_change(change).await? {
            KarmaApplied::Applied(karma) => {
                debug!(
                    author = %change.author_id,
                    change_id = %change.change_id,
                    delta = change.delta,
                    total_karma = karma.total_karma,
                    "karma delta applied"
                );
                Ok(karma)
            }
            KarmaApplied::Duplicate(karma) => {
                debug!(change_id = %change.change_id, "karma delta already applied, skipping");
                Ok(karma)
            }
            KarmaApplied::UnknownUser => Err(DomainError::UserNotFound(change.author_id.clone())),
        }
    }

    /// Applies and clears every pending change on `target`.
    pub async fn settle_target(&self, target: &TargetId) -> Result<usize> {
        let pending = self.content.pending_changes(target).await?;
        self.settle(pending).await
    }

    /// Applies and clears every pending change authored by `uid`.
    pub async fn settle_author(&self, uid: &UserId) -> Result<usize> {
        let pending = self.content.pending_changes_by_author(uid).await?;
        self.settle(pending).await
    }

    async fn settle(&self, pending: Vec<ScoreChange>) -> Result<usize> {
        let settled = pending.len();
        for change in pending {
            self.apply(&change).await?;
            self.content.clear_pending_change(change.change_id).await?;
        }
        Ok(settled)
    }

    pub async fn karma_of(&self, uid: &UserId) -> Result<Karma> {
        self.users
            .get_profile(uid)
            .await?
            .map(|profile| profile.karma())
            .ok_or_else(|| DomainError::UserNotFound(uid.clone()))
    }

    /// Recomputes a user's karma from the current scores of their content
    /// and stores it.
    pub async fn rebuild(&self, uid: &UserId) -> Result<Karma> {
        self.rebuild_one(uid).await.map(|(karma, _)| karma)
    }

    /// Rebuilds every user. Drifted users are logged and counted.
    pub async fn rebuild_all(&self) -> Result<RebuildReport> {
        let mut report = RebuildReport::default();
        for uid in self.users.list_user_ids().await? {
            let (_, corrected) = self.rebuild_one(&uid).await?;
            report.users_scanned += 1;
            if corrected {
                report.users_corrected += 1;
            }
        }
        info!(
            scanned = report.users_scanned,
            corrected = report.users_corrected,
            "karma rebuild finished"
        );
        Ok(report)
    }

    /// Recompute-and-swap: the write only lands if karma did not move and no
    /// new change was committed since the read.
    async fn rebuild_one(&self, uid: &UserId) -> Result<(Karma, bool)> {
        for attempt in 1..=REBUILD_ATTEMPTS {
            self.settle_author(uid).await?;
            let before = self.karma_of(uid).await?;
            let authored = self.content.targets_by_author(uid).await?;
            let rebuilt = Self::karma_from(&authored);

            match self.users.replace_karma(uid, before, rebuilt).await? {
                KarmaReplaced::Replaced => {
                    let corrected = before != rebuilt;
                    if corrected {
                        warn!(
                            user = %uid,
                            stored_total = before.total_karma,
                            rebuilt_total = rebuilt.total_karma,
                            "karma drift corrected"
                        );
                    }
                    return Ok((rebuilt, corrected));
                }
                KarmaReplaced::Stale => {
                    debug!(user = %uid, attempt, "karma moved during rebuild, retrying");
                }
                KarmaReplaced::UnknownUser => return Err(DomainError::UserNotFound(uid.clone())),
            }
        }
        Err(DomainError::RebuildContended {
            user: uid.clone(),
            attempts: REBUILD_ATTEMPTS,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domains::{MockContentStore, MockUserStore, TargetKind, UserProfile};

    fn scored(id: &str, kind: TargetKind, score: i64) -> Target {
        let mut target = Target::new(id.into(), kind, "author".into());
        target.score = score;
        target
    }

    #[test]
    fn karma_from_splits_buckets() {
        let targets = vec![
            scored("p1", TargetKind::Post, 4),
            scored("p2", TargetKind::Post, -1),
            scored("c1", TargetKind::Comment, 2),
        ];
        assert_eq!(KarmaAggregator::karma_from(&targets), Karma::new(3, 2));
    }

    #[tokio::test]
    async fn apply_for_unknown_author_fails_loudly() {
        let mut users = MockUserStore::new();
        users
            .expect_apply_karma_change()
            .returning(|_| Ok(KarmaApplied::UnknownUser));
        let aggregator = KarmaAggregator::new(Arc::new(users), Arc::new(MockContentStore::new()));

        let change = ScoreChange::committed(&scored("p1", TargetKind::Post, 1), 1);
        let err = aggregator.apply(&change).await.unwrap_err();
        assert!(matches!(err, DomainError::UserNotFound(_)));
    }

    #[tokio::test]
    async fn rebuild_reports_drift() {
        let mut users = MockUserStore::new();
        users.expect_get_profile().returning(|uid| {
            let mut profile = UserProfile::new(uid.clone());
            profile.set_karma(Karma::new(10, 0));
            Ok(Some(profile))
        });
        users
            .expect_list_user_ids()
            .returning(|| Ok(vec!["author".into()]));
        users
            .expect_replace_karma()
            .withf(|_, expected, karma| *expected == Karma::new(10, 0) && *karma == Karma::new(2, 0))
            .times(1)
            .returning(|_, _, _| Ok(KarmaReplaced::Replaced));

        let mut content = MockContentStore::new();
        content
            .expect_pending_changes_by_author()
            .returning(|_| Ok(vec![]));
        content
            .expect_targets_by_author()
            .returning(|_| Ok(vec![scored("p1", TargetKind::Post, 2)]));

        let aggregator = KarmaAggregator::new(Arc::new(users), Arc::new(content));
        let report = aggregator.rebuild_all().await.unwrap();
        assert_eq!(
            report,
            RebuildReport {
                users_scanned: 1,
                users_corrected: 1
            }
        );
    }

    #[tokio::test]
    async fn karma_of_missing_user() {
        let mut users = MockUserStore::new();
        users.expect_get_profile().returning(|_| Ok(None));
        let aggregator = KarmaAggregator::new(Arc::new(users), Arc::new(MockContentStore::new()));

        assert!(matches!(
            aggregator.karma_of(&"ghost".into()).await,
            Err(DomainError::UserNotFound(_))
        ));
    }

    #[tokio::test]
    async fn rebuild_retries_when_karma_moves() {
        let mut users = MockUserStore::new();
        users
            .expect_get_profile()
            .returning(|uid| Ok(Some(UserProfile::new(uid.clone()))));
        let mut seq = mockall::Sequence::new();
        users
            .expect_replace_karma()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(KarmaReplaced::Stale));
        users
            .expect_replace_karma()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(KarmaReplaced::Replaced));

        let mut content = MockContentStore::new();
        content
            .expect_pending_changes_by_author()
            .times(2)
            .returning(|_| Ok(vec![]));
        content
            .expect_targets_by_author()
            .times(2)
            .returning(|_| Ok(vec![scored("p1", TargetKind::Post, 1)]));

        let aggregator = KarmaAggregator::new(Arc::new(users), Arc::new(content));
        assert_eq!(
            aggregator.rebuild(&"author".into()).await.unwrap(),
            Karma::new(1, 0)
        );
    }

    #[tokio::test]
    async fn rebuild_gives_up_under_constant_contention() {
        let mut users = MockUserStore::new();
        users
            .expect_get_profile()
            .returning(|uid| Ok(Some(UserProfile::new(uid.clone()))));
        users
            .expect_replace_karma()
            .times(REBUILD_ATTEMPTS as usize)
            .returning(|_, _, _| Ok(KarmaReplaced::Stale));

        let mut content = MockContentStore::new();
        content
            .expect_pending_changes_by_author()
            .returning(|_| Ok(vec![]));
        content.expect_targets_by_author().returning(|_| Ok(vec![]));

        let aggregator = KarmaAggregator::new(Arc::new(users), Arc::new(content));
        let err = aggregator.rebuild(&"author".into()).await.unwrap_err();
        assert!(matches!(err, DomainError::RebuildContended { attempts: REBUILD_ATTEMPTS, .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn settling_applies_then_clears() {
        let change = ScoreChange::committed(&scored("p1", TargetKind::Comment, 1), 1);
        let id = change.change_id;
        let pending = change.clone();

        let mut content = MockContentStore::new();
        content
            .expect_pending_changes()
            .returning(move |_| Ok(vec![pending.clone()]));
        content
            .expect_clear_pending_change()
            .withf(move |cleared| *cleared == id)
            .times(1)
            .returning(|_| Ok(()));
        let mut users = MockUserStore::new();
        users
            .expect_apply_karma_change()
            .times(1)
            .returning(|_| Ok(KarmaApplied::Applied(Karma::new(0, 1))));

        let aggregator = KarmaAggregator::new(Arc::new(users), Arc::new(content));
        assert_eq!(aggregator.settle_target(&"p1".into()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn failed_apply_keeps_change_pending() {
        let change = ScoreChange::committed(&scored("p1", TargetKind::Post, 1), 1);

        let mut content = MockContentStore::new();
        content
            .expect_pending_changes()
            .returning(move |_| Ok(vec![change.clone()]));
        content.expect_clear_pending_change().never();
        let mut users = MockUserStore::new();
        users
            .expect_apply_karma_change()
            .returning(|_| Err(domains::StoreError::Unavailable("users".into())));

        let aggregator = KarmaAggregator::new(Arc::new(users), Arc::new(content));
        let err = aggregator.settle_target(&"p1".into()).await.unwrap_err();
        assert!(err.is_transient());
    }
}
