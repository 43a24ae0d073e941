use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domains::{
    ContentStore, DomainError, Karma, KarmaApplied, KarmaReplaced, ScoreChange, StoreError,
    TargetKind, UnauthorizedReason, UserId, UserProfile, UserStore, VoteDirection,
};
use integration_tests::Fixture;
use services::{BoardSettings, KarmaBoard, VotePolicy};
use storage_adapters::MemoryStore;

/// Users port over a `MemoryStore` whose next `failures` karma writes fail.
struct FlakyUsers {
    inner: Arc<MemoryStore>,
    failures: AtomicU32,
}

#[async_trait]
impl UserStore for FlakyUsers {
    async fn get_profile(&self, uid: &UserId) -> Result<Option<UserProfile>, StoreError> {
        self.inner.get_profile(uid).await
    }

    async fn apply_karma_change(&self, change: &ScoreChange) -> Result<KarmaApplied, StoreError> {
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("users".into()));
        }
        self.inner.apply_karma_change(change).await
    }

    async fn replace_karma(
        &self,
        uid: &UserId,
        expected: Karma,
        karma: Karma,
    ) -> Result<KarmaReplaced, StoreError> {
        self.inner.replace_karma(uid, expected, karma).await
    }

    async fn list_user_ids(&self) -> Result<Vec<UserId>, StoreError> {
        self.inner.list_user_ids().await
    }

    async fn count_users(&self) -> Result<u64, StoreError> {
        self.inner.count_users().await
    }

    async fn count_verified_users(&self) -> Result<u64, StoreError> {
        self.inner.count_verified_users().await
    }

    async fn count_active_since(&self, since: DateTime<Utc>) -> Result<u64, StoreError> {
        self.inner.count_active_since(since).await
    }
}

#[tokio::test]
async fn repeated_vote_is_idempotent() {
    let fx = Fixture::new();
    let author = fx.user("author");
    let voter = fx.user("voter");
    let post = fx.post("p1", &author);

    for _ in 0..3 {
        let outcome = fx
            .board
            .apply_vote(&voter, &post, TargetKind::Post, VoteDirection::Up)
            .await
            .unwrap();
        assert_eq!(outcome.new_score, 1);
        assert_eq!(outcome.new_upvote_count, 1);
    }

    let target = fx.target(&post).await;
    assert!(target.is_consistent());
    assert_eq!(target.version, 1);
    assert_eq!(fx.board.get_karma(&author).await.unwrap().post_karma, 1);
}

#[tokio::test]
async fn switching_up_to_down_moves_score_by_two() {
    let fx = Fixture::new();
    let author = fx.user("author");
    let voter = fx.user("voter");
    let post = fx.post("p1", &author);

    let up = fx
        .board
        .apply_vote(&voter, &post, TargetKind::Post, VoteDirection::Up)
        .await
        .unwrap();
    let down = fx
        .board
        .apply_vote(&voter, &post, TargetKind::Post, VoteDirection::Down)
        .await
        .unwrap();

    assert_eq!(down.new_score - up.new_score, -2);
    assert_eq!(down.new_upvote_count, 0);
    assert_eq!(down.new_downvote_count, 1);

    let target = fx.target(&post).await;
    assert!(target.upvoters.is_disjoint(&target.downvoters));
    assert_eq!(target.vote_of(&voter), VoteDirection::Down);
    assert_eq!(fx.board.get_karma(&author).await.unwrap().post_karma, -1);
}

#[tokio::test]
async fn retraction_clears_the_vote() {
    let fx = Fixture::new();
    let author = fx.user("author");
    let voter = fx.user("voter");
    let comment = fx.comment("c1", &author);

    fx.board
        .apply_vote(&voter, &comment, TargetKind::Comment, VoteDirection::Down)
        .await
        .unwrap();
    let outcome = fx
        .board
        .apply_vote(&voter, &comment, TargetKind::Comment, VoteDirection::None)
        .await
        .unwrap();

    assert_eq!(outcome.new_score, 0);
    assert_eq!(
        fx.board.vote_of(&voter, &comment).await.unwrap(),
        VoteDirection::None
    );
    assert_eq!(fx.board.get_karma(&author).await.unwrap().comment_karma, 0);
}

#[tokio::test]
async fn retraction_can_be_disabled() {
    let fx = Fixture::with_settings(BoardSettings {
        policy: VotePolicy {
            allow_self_vote: false,
            allow_retraction: false,
        },
        ..BoardSettings::default()
    });
    let author = fx.user("author");
    let voter = fx.user("voter");
    let post = fx.post("p1", &author);

    fx.board
        .apply_vote(&voter, &post, TargetKind::Post, VoteDirection::Up)
        .await
        .unwrap();
    let err = fx
        .board
        .apply_vote(&voter, &post, TargetKind::Post, VoteDirection::None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DomainError::Unauthorized(UnauthorizedReason::RetractionDisabled)
    ));
    assert_eq!(fx.board.get_score(&post).await.unwrap(), 1);
}

#[tokio::test]
async fn self_vote_is_rejected_by_default() {
    let fx = Fixture::new();
    let author = fx.user("author");
    let post = fx.post("p1", &author);

    let err = fx
        .board
        .apply_vote(&author, &post, TargetKind::Post, VoteDirection::Up)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DomainError::Unauthorized(UnauthorizedReason::SelfVote)
    ));
    assert_eq!(fx.board.get_score(&post).await.unwrap(), 0);
}

#[tokio::test]
async fn banned_voter_changes_nothing() {
    let fx = Fixture::new();
    let author = fx.user("author");
    let troll = fx.banned_user("troll");
    let post = fx.post("p1", &author);

    let err = fx
        .board
        .apply_vote(&troll, &post, TargetKind::Post, VoteDirection::Down)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DomainError::Unauthorized(UnauthorizedReason::Banned)
    ));
    let target = fx.target(&post).await;
    assert!(target.downvoters.is_empty());
    assert_eq!(target.version, 0);
}

#[tokio::test]
async fn missing_target_is_invalid() {
    let fx = Fixture::new();
    let voter = fx.user("voter");

    let err = fx
        .board
        .apply_vote(&voter, &"ghost".into(), TargetKind::Post, VoteDirection::Up)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::InvalidTarget(_)));
    assert!(matches!(
        fx.board.get_score(&"ghost".into()).await,
        Err(DomainError::InvalidTarget(_))
    ));
}

#[tokio::test]
async fn wrong_kind_is_rejected() {
    let fx = Fixture::new();
    let author = fx.user("author");
    let voter = fx.user("voter");
    let post = fx.post("p1", &author);

    let err = fx
        .board
        .apply_vote(&voter, &post, TargetKind::Comment, VoteDirection::Up)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::TargetKindMismatch { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_distinct_upvoters_all_land() {
    const VOTERS: usize = 64;

    let fx = Fixture::new();
    let author = fx.user("author");
    let post = fx.post("p1", &author);
    let voters: Vec<_> = (0..VOTERS).map(|i| fx.user(&format!("v{i}"))).collect();

    let mut handles = Vec::with_capacity(VOTERS);
    for voter in voters {
        let board = Arc::clone(&fx.board);
        let post = post.clone();
        handles.push(tokio::spawn(async move {
            board
                .apply_vote(&voter, &post, TargetKind::Post, VoteDirection::Up)
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let target = fx.target(&post).await;
    assert_eq!(target.score, VOTERS as i64);
    assert_eq!(target.upvoters.len(), VOTERS);
    assert!(target.is_consistent());
    assert_eq!(
        fx.board.get_karma(&author).await.unwrap().post_karma,
        VOTERS as i64
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_votes_on_different_targets() {
    let fx = Fixture::new();
    let author = fx.user("author");
    let voter = fx.user("voter");
    let posts: Vec<_> = (0..16).map(|i| fx.post(&format!("p{i}"), &author)).collect();

    let mut handles = Vec::new();
    for post in posts.clone() {
        let board = Arc::clone(&fx.board);
        let voter = voter.clone();
        handles.push(tokio::spawn(async move {
            board
                .apply_vote(&voter, &post, TargetKind::Post, VoteDirection::Down)
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    for post in &posts {
        assert_eq!(fx.board.get_score(post).await.unwrap(), -1);
    }
    assert_eq!(fx.board.get_karma(&author).await.unwrap().total_karma, -16);
}

#[tokio::test]
async fn reconcile_repairs_overlapping_sets() {
    let fx = Fixture::new();
    let author = fx.user("author");
    let post = fx.post("p1", &author);

    let mut broken = fx.target(&post).await;
    broken.upvoters.insert("a".into());
    broken.upvoters.insert("b".into());
    broken.downvoters.insert("b".into());
    broken.score = 7;
    fx.store.overwrite_target(broken);

    let score = fx.board.reconcile_score(&post).await.unwrap();
    assert_eq!(score, 2);
    let repaired = fx.target(&post).await;
    assert!(repaired.is_consistent());
    assert!(repaired.downvoters.is_empty());
}

#[tokio::test]
async fn karma_lands_on_retry_after_a_failed_write() {
    let fx = Fixture::new();
    let author = fx.user("author");
    let voter = fx.user("voter");
    let post = fx.post("p1", &author);

    let users = Arc::new(FlakyUsers {
        inner: fx.store.clone(),
        failures: AtomicU32::new(1),
    });
    let board = KarmaBoard::new(
        fx.store.clone(),
        users,
        fx.store.clone(),
        BoardSettings::default(),
    );

    let err = board
        .apply_vote(&voter, &post, TargetKind::Post, VoteDirection::Up)
        .await
        .unwrap_err();
    assert!(err.is_transient(), "{err}");
    // The vote itself committed; its karma is owed, not lost.
    assert_eq!(board.get_score(&post).await.unwrap(), 1);
    assert_eq!(fx.store.pending_changes(&post).await.unwrap().len(), 1);

    let outcome = board
        .apply_vote(&voter, &post, TargetKind::Post, VoteDirection::Up)
        .await
        .unwrap();
    assert_eq!(outcome.new_score, 1);
    assert_eq!(board.get_karma(&author).await.unwrap().post_karma, 1);
    assert!(fx.store.pending_changes(&post).await.unwrap().is_empty());
}
