//! # Vote application
//!
//! Orchestrates ledger → score engine → karma for one vote. A vote's set
//! mutation, score, and version land in a single `commit_target` call, so a
//! half-applied vote is never stored.
//!
//! Same-target votes are serialized in-process by a keyed async lock, and the
//! commit is additionally guarded by the target version for writers outside
//! this process. Votes on different targets take different locks and never
//! contend.
//!
//! The karma delta is committed as pending alongside the target. Pending
//! changes on a target are settled after each commit and again at the start
//! of the next vote on it, so a retried vote repairs a karma write that
//! failed the first time.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use domains::{
    CommitStatus, ContentStore, DomainError, Result, TargetId, TargetKind, UserId, UserStore,
    VoteDirection, VoteOutcome,
};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::karma::KarmaAggregator;
use crate::ledger::VoteLedger;
use crate::score::ScoreEngine;

/// Pause before re-reading a target after a version conflict.
const CONFLICT_BACKOFF: Duration = Duration::from_millis(5);

pub struct VoteService {
    ledger: VoteLedger,
    karma: KarmaAggregator,
    content: Arc<dyn ContentStore>,
    users: Arc<dyn UserStore>,
    max_attempts: u32,
    locks: DashMap<TargetId, Arc<Mutex<()>>>,
}

impl VoteService {
    pub fn new(
        ledger: VoteLedger,
        karma: KarmaAggregator,
        content: Arc<dyn ContentStore>,
        users: Arc<dyn UserStore>,
        max_attempts: u32,
    ) -> Self {
        Self {
            ledger,
            karma,
            content,
            users,
            max_attempts: max_attempts.max(1),
            locks: DashMap::new(),
        }
    }

    /// Applies `direction` from `voter` to `target_id`.
    ///
    /// # Errors
    /// - `InvalidTarget` if the target does not exist.
    /// - `TargetKindMismatch` if it exists as the other kind.
    /// - `Unauthorized` for banned or unknown voters, self-votes, and
    ///   disallowed retractions.
    /// - `ConflictRetryExceeded` if the target kept moving under us.
    pub async fn apply_vote(
        &self,
        voter: &UserId,
        target_id: &TargetId,
        kind: TargetKind,
        direction: VoteDirection,
    ) -> Result<VoteOutcome> {
        let _release = LockRelease {
            locks: &self.locks,
            target_id,
        };
        let lock = self.lock_for(target_id);
        let _guard = lock.lock().await;
        self.apply_serialized(voter, target_id, kind, direction).await
    }

    /// The voter's current direction on a target.
    pub async fn vote_of(&self, voter: &UserId, target_id: &TargetId) -> Result<VoteDirection> {
        let target = self
            .content
            .get_target(target_id)
            .await?
            .ok_or_else(|| DomainError::InvalidTarget(target_id.clone()))?;
        Ok(target.vote_of(voter))
    }

    async fn apply_serialized(
        &self,
        voter: &UserId,
        target_id: &TargetId,
        kind: TargetKind,
        direction: VoteDirection,
    ) -> Result<VoteOutcome> {
        self.karma.settle_target(target_id).await?;
        let profile = self.users.get_profile(voter).await?;

        for attempt in 1..=self.max_attempts {
            let current = self
                .content
                .get_target(target_id)
                .await?
                .ok_or_else(|| DomainError::InvalidTarget(target_id.clone()))?;
            if current.kind != kind {
                return Err(DomainError::TargetKindMismatch {
                    id: target_id.clone(),
                    expected: kind,
                    actual: current.kind,
                });
            }
            self.ledger.authorize(profile.as_ref(), &current, direction)?;

            let mut next = current.clone();
            let transition = self.ledger.apply(&mut next, voter, direction);
            if transition.is_noop() {
                return Ok(VoteOutcome::from(&current));
            }
            let pending: Vec<_> = ScoreEngine::prepare(&mut next).into_iter().collect();

            match self
                .content
                .commit_target(&next, current.version, &pending)
                .await?
            {
                CommitStatus::Committed => {
                    debug!(
                        target_id = %target_id,
                        voter = %voter,
                        from = ?transition.from,
                        to = ?transition.to,
                        score = next.score,
                        version = next.version,
                        "vote committed"
                    );
                    self.karma.settle_target(target_id).await?;
                    return Ok(VoteOutcome::from(&next));
                }
                CommitStatus::Conflict => {
                    warn!(target_id = %target_id, attempt, "vote commit conflicted, retrying");
                    tokio::time::sleep(CONFLICT_BACKOFF * attempt).await;
                }
            }
        }

        Err(DomainError::ConflictRetryExceeded {
            target: target_id.clone(),
            attempts: self.max_attempts,
        })
    }

    fn lock_for(&self, target_id: &TargetId) -> Arc<Mutex<()>> {
        self.locks.entry(target_id.clone()).or_default().clone()
    }
}

/// Drops a target's lock entry once no other task holds or waits on it.
/// Runs on drop, so a vote future cancelled mid-await still cleans up.
struct LockRelease<'a> {
    locks: &'a DashMap<TargetId, Arc<Mutex<()>>>,
    target_id: &'a TargetId,
}

impl Drop for LockRelease<'_> {
    fn drop(&mut self) {
        self.locks
            .remove_if(self.target_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}
