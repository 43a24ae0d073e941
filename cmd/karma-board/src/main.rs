//! # karma-board
//!
//! Server binary: loads layered settings, picks a store, and serves the
//! vote/karma/stats API over HTTP.

use std::sync::Arc;

use anyhow::Context;
use api_adapters::{build_router, AppState};
use configs::Settings;
use domains::{CommunityStore, ContentStore, UserStore};
use services::{BoardSettings, KarmaBoard, StatsSettings, VotePolicy};
use storage_adapters::MemoryStore;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("loading settings")?;
    init_tracing(&settings);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        allow_self_vote = settings.votes.allow_self_vote,
        allow_retraction = settings.votes.allow_retraction,
        "starting karma-board"
    );

    let board = Arc::new(build_board(&settings).await?);

    if let Some(every) = settings.stats.refresh_interval() {
        info!(every_secs = every.as_secs(), "site stats refresher enabled");
        board.spawn_stats_refresher(every);
    }

    let app = build_router(AppState { board });
    let addr = settings.server.addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server")?;

    info!("shut down cleanly");
    Ok(())
}

/// `RUST_LOG` wins over `log.filter`.
fn init_tracing(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log.filter));

    if settings.log.json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn board_settings(settings: &Settings) -> BoardSettings {
    BoardSettings {
        policy: VotePolicy {
            allow_self_vote: settings.votes.allow_self_vote,
            allow_retraction: settings.votes.allow_retraction,
        },
        max_conflict_retries: settings.votes.max_conflict_retries,
        stats: StatsSettings {
            active_window: chrono::Duration::hours(settings.stats.active_window_hours),
            compute_timeout: settings.stats.compute_timeout(),
        },
        stats_cache_ttl: settings.stats.cache_ttl(),
    }
}

fn board_over<S>(store: Arc<S>, settings: &Settings) -> KarmaBoard
where
    S: ContentStore + UserStore + CommunityStore + 'static,
{
    KarmaBoard::new(
        store.clone(),
        store.clone(),
        store,
        board_settings(settings),
    )
}

#[cfg(feature = "db-postgres")]
async fn build_board(settings: &Settings) -> anyhow::Result<KarmaBoard> {
    use secrecy::ExposeSecret;
    use storage_adapters::PgStore;

    let Some(url) = settings.database.url.as_ref() else {
        warn!("no database.url configured; using the in-memory store");
        return Ok(board_over(Arc::new(MemoryStore::new()), settings));
    };

    let store = PgStore::connect(url.expose_secret(), settings.database.max_connections)
        .await
        .context("connecting to postgres")?;
    if settings.database.run_migrations {
        store.migrate().await.context("running migrations")?;
    }
    Ok(board_over(Arc::new(store), settings))
}

#[cfg(not(feature = "db-postgres"))]
async fn build_board(settings: &Settings) -> anyhow::Result<KarmaBoard> {
    if settings.database.url.is_some() {
        warn!("database.url is set but this build lacks db-postgres; using the in-memory store");
    }
    Ok(board_over(Arc::new(MemoryStore::new()), settings))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("received ctrl-c, draining connections");
}
