//! # services
//!
//! Vote application, score derivation, karma accounting, and statistics
//! aggregation over the `domains` ports.
//!
//! Flow: `VoteLedger` mutates vote sets → `ScoreEngine` recomputes the score
//! and both land in one versioned commit → `KarmaAggregator` applies the
//! committed delta to the author. `StatsService` (behind `AggregationCache`)
//! picks up new totals on its next pass and never blocks a vote.

pub mod board;
pub mod cache;
pub mod karma;
pub mod ledger;
pub mod score;
pub mod stats;
pub mod votes;

pub use board::{BoardSettings, KarmaBoard};
pub use cache::AggregationCache;
pub use karma::{KarmaAggregator, RebuildReport};
pub use ledger::{VoteLedger, VotePolicy, VoteTransition};
pub use score::ScoreEngine;
pub use stats::{StatsService, StatsSettings};
pub use votes::VoteService;
