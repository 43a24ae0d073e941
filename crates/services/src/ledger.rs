//! # VoteLedger
//!
//! Per-(voter, target) vote membership. Votes are set memberships, never
//! counters: applying the same direction twice changes nothing, and a
//! switch moves the voter from one set to the other in a single step.
//! The ledger never touches `score`; it hands a `VoteTransition` to the
//! score engine instead.

use domains::{
    DomainError, Result, Target, TargetId, UnauthorizedReason, UserId, UserProfile, VoteDirection,
};

/// Who may vote, and how.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VotePolicy {
    pub allow_self_vote: bool,
    pub allow_retraction: bool,
}

impl Default for VotePolicy {
    fn default() -> Self {
        Self {
            allow_self_vote: false,
            allow_retraction: true,
        }
    }
}

/// The score-delta event emitted by a vote: where the voter stood before
/// and where they stand now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteTransition {
    pub target_id: TargetId,
    pub voter: UserId,
    pub from: VoteDirection,
    pub to: VoteDirection,
}

impl VoteTransition {
    pub fn is_noop(&self) -> bool {
        self.from == self.to
    }

    /// Net effect on the target's score: -2..=2.
    pub fn delta(&self) -> i64 {
        self.to.contribution() - self.from.contribution()
    }
}

#[derive(Debug, Clone, Default)]
pub struct VoteLedger {
    policy: VotePolicy,
}

impl VoteLedger {
    pub fn new(policy: VotePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> VotePolicy {
        self.policy
    }

    /// Checks that `voter` may cast `direction` on `target`.
    pub fn authorize(
        &self,
        voter: Option<&UserProfile>,
        target: &Target,
        direction: VoteDirection,
    ) -> Result<()> {
        let voter = voter.ok_or(DomainError::Unauthorized(UnauthorizedReason::UnknownVoter))?;
        if voter.is_banned {
            return Err(DomainError::Unauthorized(UnauthorizedReason::Banned));
        }
        if !self.policy.allow_self_vote && voter.uid == target.author_id {
            return Err(DomainError::Unauthorized(UnauthorizedReason::SelfVote));
        }
        if !self.policy.allow_retraction
            && direction == VoteDirection::None
            && target.vote_of(&voter.uid) != VoteDirection::None
        {
            return Err(DomainError::Unauthorized(UnauthorizedReason::RetractionDisabled));
        }
        Ok(())
    }

    /// Moves `voter` into the set for `direction`, out of the other one.
    pub fn apply(
        &self,
        target: &mut Target,
        voter: &UserId,
        direction: VoteDirection,
    ) -> VoteTransition {
        let from = target.vote_of(voter);
        if from != direction {
            match direction {
                VoteDirection::Up => {
                    target.downvoters.remove(voter);
                    target.upvoters.insert(voter.clone());
                }
                VoteDirection::Down => {
                    target.upvoters.remove(voter);
                    target.downvoters.insert(voter.clone());
                }
                VoteDirection::None => {
                    target.upvoters.remove(voter);
                    target.downvoters.remove(voter);
                }
            }
        }
        VoteTransition {
            target_id: target.id.clone(),
            voter: voter.clone(),
            from,
            to: direction,
        }
    }
}
