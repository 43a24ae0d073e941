//! # ScoreEngine
//!
//! Derives a target's score from its vote sets. The arithmetic is pure; the
//! engine only touches the store for `reconcile`, which repairs a stored
//! score that drifted from its sets.

use std::sync::Arc;

use domains::{
    CommitStatus, ContentStore, DomainError, Result, ScoreChange, Target, TargetId,
};
use tracing::{debug, warn};

#[derive(Clone)]
pub struct ScoreEngine {
    content: Arc<dyn ContentStore>,
}

impl ScoreEngine {
    pub fn new(content: Arc<dyn ContentStore>) -> Self {
        Self { content }
    }

    /// Sets `score = |upvoters| - |downvoters|` and returns how far it moved.
    pub fn recompute(target: &mut Target) -> i64 {
        let next = target.derived_score();
        let delta = next - target.score;
        target.score = next;
        delta
    }

    /// Readies a working copy the ledger just mutated for commit: recomputes
    /// the score and bumps the version. Returns the change to hand to karma,
    /// or `None` if the score did not move.
    pub fn prepare(target: &mut Target) -> Option<ScoreChange> {
        let delta = Self::recompute(target);
        target.version += 1;
        (delta != 0).then(|| ScoreChange::committed(target, delta))
    }

    pub async fn score_of(&self, id: &TargetId) -> Result<i64> {
        self.content
            .get_target(id)
            .await?
            .map(|target| target.score)
            .ok_or_else(|| DomainError::InvalidTarget(id.clone()))
    }

    /// Rewrites the stored score from the stored sets if they disagree.
    ///
    /// The drift is committed as a pending karma change for the author, so
    /// karma keeps summing the stored scores once it is settled.
    pub async fn reconcile(&self, id: &TargetId) -> Result<i64> {
        let stored = self
            .content
            .get_target(id)
            .await?
            .ok_or_else(|| DomainError::InvalidTarget(id.clone()))?;
        if stored.is_consistent() {
            return Ok(stored.score);
        }

        let mut repaired = stored.clone();
        repaired.downvoters.retain(|voter| !stored.upvoters.contains(voter));
        let drift = Self::recompute(&mut repaired);
        repaired.version += 1;
        warn!(target_id = %id, drift, "score drifted from vote sets, reconciling");
        let pending: Vec<_> = (drift != 0)
            .then(|| ScoreChange::committed(&repaired, drift))
            .into_iter()
            .collect();

        match self
            .content
            .commit_target(&repaired, stored.version, &pending)
            .await?
        {
            CommitStatus::Committed => {
                debug!(target_id = %id, score = repaired.score, "score reconciled");
                Ok(repaired.score)
            }
            CommitStatus::Conflict => Err(DomainError::ConflictRetryExceeded {
                target: id.clone(),
                attempts: 1,
            }),
        }
    }
}
