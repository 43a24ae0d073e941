use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use domains::{CommunityStats, CommunityStore, MockUserStore, StoreError};
use integration_tests::Fixture;
use services::{BoardSettings, KarmaBoard};
use storage_adapters::MemoryStore;

#[tokio::test]
async fn empty_store_reports_documented_defaults() {
    let fx = Fixture::new();
    let stats = fx.board.get_site_stats().await;

    assert_eq!(stats.total_users, 0);
    assert_eq!(stats.total_posts, 0);
    assert_eq!(stats.total_communities, 0);
    assert_eq!(stats.total_comments, 0);
    assert_eq!(stats.verified_users, 0);
    assert_eq!(stats.active_users, 0);
    assert_eq!(stats.users_online, 1);
}

#[tokio::test]
async fn counts_reflect_the_corpus() {
    let fx = Fixture::new();
    let author = fx.verified_user("author");
    for i in 0..24 {
        fx.user(&format!("u{i}"));
    }
    let rust = fx.community("rust", 3);
    fx.post_in("p1", &author, &rust);
    fx.post("p2", &author);
    fx.comment("c1", &author);

    // Dormant users count toward totals but not activity.
    fx.store
        .touch_user(&"u0".into(), Utc::now() - chrono::Duration::days(30));

    let stats = fx.board.get_site_stats().await;
    assert_eq!(stats.total_users, 25);
    assert_eq!(stats.verified_users, 1);
    assert_eq!(stats.active_users, 24);
    assert_eq!(stats.users_online, 2);
    assert_eq!(stats.total_posts, 2);
    assert_eq!(stats.total_comments, 1);
    assert_eq!(stats.total_communities, 1);
}

#[tokio::test]
async fn comments_outage_degrades_only_that_field() {
    let fx = Fixture::new();
    let author = fx.user("author");
    fx.post("p1", &author);
    fx.comment("c1", &author);
    fx.store.set_comments_provisioned(false);

    let stats = fx.board.get_site_stats().await;
    assert_eq!(stats.total_comments, 0);
    assert_eq!(stats.total_users, 1);
    assert_eq!(stats.total_posts, 1);
}

#[tokio::test]
async fn users_outage_falls_back_to_defaults() {
    let store = Arc::new(MemoryStore::new());
    store.insert_target(domains::Target::new(
        "p1".into(),
        domains::TargetKind::Post,
        "author".into(),
    ));

    let mut users = MockUserStore::new();
    users
        .expect_count_users()
        .returning(|| Err(StoreError::Unavailable("users".into())));
    users
        .expect_count_verified_users()
        .returning(|| Err(StoreError::Unavailable("users".into())));
    users
        .expect_count_active_since()
        .returning(|_| Err(StoreError::Unavailable("users".into())));

    let board = KarmaBoard::new(
        store.clone(),
        Arc::new(users),
        store.clone(),
        BoardSettings::default(),
    );
    let stats = board.get_site_stats().await;
    assert_eq!(stats.total_posts, 0);
    assert_eq!(stats.total_users, 0);
    assert_eq!(stats.users_online, 1);
}

#[tokio::test]
async fn nonexistent_community_is_zero() {
    let fx = Fixture::new();
    let stats = fx.board.get_community_stats(&"nonexistent".into()).await;
    assert_eq!(stats, CommunityStats::default());
    assert_eq!(stats.member_count, 0);
    assert_eq!(stats.post_count, 0);
}

#[tokio::test]
async fn member_count_is_reported_exactly() {
    let fx = Fixture::new();
    let community = fx.community("rust", 42);
    let stats = fx.board.get_community_stats(&community).await;
    assert_eq!(stats.member_count, 42);
}

#[tokio::test]
async fn recount_repairs_post_counter() {
    let fx = Fixture::new();
    let author = fx.user("author");
    let rust = fx.community("rust", 1);
    fx.post_in("p1", &author, &rust);
    fx.post_in("p2", &author, &rust);
    fx.store.set_post_count(&rust, 9).await.unwrap();

    assert_eq!(fx.board.recount_community_posts(&rust).await.unwrap(), 2);
    let community = fx.store.get_community(&rust).await.unwrap().unwrap();
    assert_eq!(community.post_count, 2);
}

#[tokio::test]
async fn recount_refreshes_cached_community_stats() {
    let fx = Fixture::new();
    let author = fx.user("author");
    let rust = fx.community("rust", 1);
    fx.post_in("p1", &author, &rust);
    assert_eq!(fx.board.get_community_stats(&rust).await.post_count, 1);

    // Lands without touching the counter.
    fx.store.overwrite_target(
        domains::Target::new("p2".into(), domains::TargetKind::Post, author.clone())
            .in_community(rust.clone()),
    );
    assert_eq!(fx.board.get_community_stats(&rust).await.post_count, 1);

    assert_eq!(fx.board.recount_community_posts(&rust).await.unwrap(), 2);
    assert_eq!(fx.board.get_community_stats(&rust).await.post_count, 2);
}

#[tokio::test(start_paused = true)]
async fn site_stats_are_cached_for_the_ttl() {
    let fx = Fixture::with_settings(BoardSettings {
        stats_cache_ttl: Duration::from_secs(30),
        ..BoardSettings::default()
    });
    fx.user("first");
    assert_eq!(fx.board.get_site_stats().await.total_users, 1);

    fx.user("second");
    assert_eq!(fx.board.get_site_stats().await.total_users, 1);

    tokio::time::advance(Duration::from_secs(31)).await;
    assert_eq!(fx.board.get_site_stats().await.total_users, 2);
}

#[tokio::test(start_paused = true)]
async fn refresher_keeps_stats_warm() {
    let fx = Fixture::with_settings(BoardSettings {
        stats_cache_ttl: Duration::from_secs(300),
        ..BoardSettings::default()
    });
    assert_eq!(fx.board.get_site_stats().await.total_users, 0);

    let handle = fx.board.spawn_stats_refresher(Duration::from_secs(10));
    fx.user("late");
    // First tick fires immediately, the next after ten seconds.
    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(fx.board.get_site_stats().await.total_users, 1);
    handle.abort();
}
