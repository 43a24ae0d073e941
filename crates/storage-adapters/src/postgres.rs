//! # PgStore
//!
//! PostgreSQL implementation of the ports.
//!
//! A vote's vote sets, score, and version land in one conditional `UPDATE`
//! keyed on the previous version, in the same transaction as its pending
//! karma change. Karma deltas are recorded in
//! `karma_changes` inside the same transaction that bumps the user's
//! counters, so a replayed change id hits the primary key and is skipped.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domains::{
    CommitStatus, Community, CommunityId, CommunityStore, ContentStore, Karma, KarmaApplied,
    KarmaReplaced, ScoreChange, StoreError, Target, TargetId, TargetKind, UserId, UserProfile, UserStore,
};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info};
use uuid::Uuid;

/// Postgres code for `undefined_table`.
const UNDEFINED_TABLE: &str = "42P01";

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        info!(max_connections, "connected to postgres");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }

    async fn count(&self, sql: &str) -> Result<u64, StoreError> {
        let n: i64 = sqlx::query_scalar(sql)
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(n.max(0) as u64)
    }
}

/// Maps sqlx failures onto the port error. Missing tables and unreachable
/// servers are `Unavailable`; everything else is a backend failure.
fn store_err(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.code().as_deref() == Some(UNDEFINED_TABLE) => {
            StoreError::Unavailable(db.message().to_string())
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable("postgres".into())
        }
        _ => StoreError::Backend(err.to_string()),
    }
}

fn to_u64(n: i64) -> u64 {
    n.max(0) as u64
}

fn target_from_row(row: &PgRow) -> Result<Target, sqlx::Error> {
    let kind: String = row.try_get("kind")?;
    let kind = kind
        .parse::<TargetKind>()
        .map_err(|e| sqlx::Error::Decode(e.into()))?;
    let upvoters: Vec<String> = row.try_get("upvoters")?;
    let downvoters: Vec<String> = row.try_get("downvoters")?;
    let community_id: Option<String> = row.try_get("community_id")?;
    let version: i64 = row.try_get("version")?;

    Ok(Target {
        id: TargetId(row.try_get("id")?),
        kind,
        author_id: UserId(row.try_get("author_id")?),
        community_id: community_id.map(CommunityId),
        score: row.try_get("score")?,
        upvoters: upvoters.into_iter().map(UserId).collect::<HashSet<_>>(),
        downvoters: downvoters.into_iter().map(UserId).collect::<HashSet<_>>(),
        version: to_u64(version),
        created_at: row.try_get("created_at")?,
    })
}

fn profile_from_row(row: &PgRow) -> Result<UserProfile, sqlx::Error> {
    Ok(UserProfile {
        uid: UserId(row.try_get("uid")?),
        post_karma: row.try_get("post_karma")?,
        comment_karma: row.try_get("comment_karma")?,
        total_karma: row.try_get("total_karma")?,
        is_admin: row.try_get("is_admin")?,
        is_banned: row.try_get("is_banned")?,
        is_verified: row.try_get("is_verified")?,
        is_premium: row.try_get("is_premium")?,
        last_active: row.try_get("last_active")?,
        created_at: row.try_get("created_at")?,
    })
}

fn karma_from_row(row: &PgRow) -> Result<Karma, sqlx::Error> {
    Ok(Karma {
        post_karma: row.try_get("post_karma")?,
        comment_karma: row.try_get("comment_karma")?,
        total_karma: row.try_get("total_karma")?,
    })
}

fn change_from_row(row: &PgRow) -> Result<ScoreChange, sqlx::Error> {
    let kind: String = row.try_get("kind")?;
    Ok(ScoreChange {
        change_id: row.try_get("change_id")?,
        target_id: TargetId(row.try_get("target_id")?),
        kind: kind
            .parse::<TargetKind>()
            .map_err(|e| sqlx::Error::Decode(e.into()))?,
        author_id: UserId(row.try_get("author_id")?),
        delta: row.try_get("delta")?,
    })
}

const PENDING_COLUMNS: &str = "change_id, target_id, author_id, kind, delta";

fn voter_ids(voters: &HashSet<UserId>) -> Vec<String> {
    let mut ids: Vec<String> = voters.iter().map(|voter| voter.0.clone()).collect();
    ids.sort();
    ids
}

fn karma_column(kind: TargetKind) -> &'static str {
    match kind {
        TargetKind::Post => "post_karma",
        TargetKind::Comment => "comment_karma",
    }
}

const TARGET_COLUMNS: &str =
    "id, kind, author_id, community_id, score, upvoters, downvoters, version, created_at";

#[async_trait]
impl ContentStore for PgStore {
    async fn get_target(&self, id: &TargetId) -> Result<Option<Target>, StoreError> {
        let row = sqlx::query(&format!("SELECT {TARGET_COLUMNS} FROM targets WHERE id = $1"))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;

        row.as_ref()
            .map(target_from_row)
            .transpose()
            .map_err(store_err)
    }

    async fn commit_target(
        &self,
        target: &Target,
        expected_version: u64,
        pending: &[ScoreChange],
    ) -> Result<CommitStatus, StoreError> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        let result = sqlx::query(
            "UPDATE targets SET score = $1, upvoters = $2, downvoters = $3, version = $4 \
             WHERE id = $5 AND version = $6",
        )
        .bind(target.score)
        .bind(voter_ids(&target.upvoters))
        .bind(voter_ids(&target.downvoters))
        .bind(target.version as i64)
        .bind(target.id.as_str())
        .bind(expected_version as i64)
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;

        if result.rows_affected() != 1 {
            tx.rollback().await.map_err(store_err)?;
            debug!(target_id = %target.id, expected_version, "stale target commit");
            return Ok(CommitStatus::Conflict);
        }

        for change in pending {
            sqlx::query(
                "INSERT INTO pending_karma_changes (change_id, target_id, author_id, kind, delta) \
                 VALUES ($1, $2, $3, $4, $5) ON CONFLICT (change_id) DO NOTHING",
            )
            .bind(change.change_id)
            .bind(change.target_id.as_str())
            .bind(change.author_id.as_str())
            .bind(change.kind.as_str())
            .bind(change.delta)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        }

        tx.commit().await.map_err(store_err)?;
        Ok(CommitStatus::Committed)
    }

    async fn pending_changes(&self, target: &TargetId) -> Result<Vec<ScoreChange>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {PENDING_COLUMNS} FROM pending_karma_changes WHERE target_id = $1 \
             ORDER BY created_at"
        ))
        .bind(target.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.iter()
            .map(change_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(store_err)
    }

    async fn pending_changes_by_author(
        &self,
        author: &UserId,
    ) -> Result<Vec<ScoreChange>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {PENDING_COLUMNS} FROM pending_karma_changes WHERE author_id = $1 \
             ORDER BY created_at"
        ))
        .bind(author.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.iter()
            .map(change_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(store_err)
    }

    async fn clear_pending_change(&self, change_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM pending_karma_changes WHERE change_id = $1")
            .bind(change_id)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn targets_by_author(&self, author: &UserId) -> Result<Vec<Target>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {TARGET_COLUMNS} FROM targets WHERE author_id = $1"
        ))
        .bind(author.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.iter()
            .map(target_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(store_err)
    }

    async fn count_targets(&self, kind: TargetKind) -> Result<u64, StoreError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM targets WHERE kind = $1")
            .bind(kind.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(to_u64(n))
    }

    async fn count_community_posts(&self, community: &CommunityId) -> Result<u64, StoreError> {
        let n: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM targets WHERE kind = 'post' AND community_id = $1",
        )
        .bind(community.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(to_u64(n))
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn get_profile(&self, uid: &UserId) -> Result<Option<UserProfile>, StoreError> {
        let row = sqlx::query("SELECT * FROM users WHERE uid = $1")
            .bind(uid.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;

        row.as_ref()
            .map(profile_from_row)
            .transpose()
            .map_err(store_err)
    }

    /// # Developer Note
    /// The ledger insert comes first: if the change id already exists nothing
    /// else in the transaction runs, so a retried commit can never bump the
    /// counters twice.
    async fn apply_karma_change(&self, change: &ScoreChange) -> Result<KarmaApplied, StoreError> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        let recorded = sqlx::query(
            "INSERT INTO karma_changes (change_id, user_id, target_id, delta) \
             VALUES ($1, $2, $3, $4) ON CONFLICT (change_id) DO NOTHING",
        )
        .bind(change.change_id)
        .bind(change.author_id.as_str())
        .bind(change.target_id.as_str())
        .bind(change.delta)
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;

        if recorded.rows_affected() == 0 {
            tx.rollback().await.map_err(store_err)?;
            let karma = sqlx::query(
                "SELECT post_karma, comment_karma, total_karma FROM users WHERE uid = $1",
            )
            .bind(change.author_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;
            return match karma {
                Some(row) => Ok(KarmaApplied::Duplicate(
                    karma_from_row(&row).map_err(store_err)?,
                )),
                None => Ok(KarmaApplied::UnknownUser),
            };
        }

        let column = karma_column(change.kind);
        let updated = sqlx::query(&format!(
            "UPDATE users SET {column} = {column} + $1, total_karma = total_karma + $1 \
             WHERE uid = $2 RETURNING post_karma, comment_karma, total_karma"
        ))
        .bind(change.delta)
        .bind(change.author_id.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(store_err)?;

        match updated {
            Some(row) => {
                let karma = karma_from_row(&row).map_err(store_err)?;
                tx.commit().await.map_err(store_err)?;
                Ok(KarmaApplied::Applied(karma))
            }
            None => {
                tx.rollback().await.map_err(store_err)?;
                Ok(KarmaApplied::UnknownUser)
            }
        }
    }

    /// # Developer Note
    /// Expected-value check and pending check run inside the `UPDATE` itself,
    /// so a delta or a vote committed after the caller's read makes it a
    /// no-op instead of being overwritten.
    async fn replace_karma(
        &self,
        uid: &UserId,
        expected: Karma,
        karma: Karma,
    ) -> Result<KarmaReplaced, StoreError> {
        let result = sqlx::query(
            "UPDATE users SET post_karma = $1, comment_karma = $2, total_karma = $3 \
             WHERE uid = $4 AND post_karma = $5 AND comment_karma = $6 \
             AND NOT EXISTS (SELECT 1 FROM pending_karma_changes WHERE author_id = $4)",
        )
        .bind(karma.post_karma)
        .bind(karma.comment_karma)
        .bind(karma.total_karma)
        .bind(uid.as_str())
        .bind(expected.post_karma)
        .bind(expected.comment_karma)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        if result.rows_affected() == 1 {
            return Ok(KarmaReplaced::Replaced);
        }

        let exists: Option<String> = sqlx::query_scalar("SELECT uid FROM users WHERE uid = $1")
            .bind(uid.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(match exists {
            Some(_) => KarmaReplaced::Stale,
            None => KarmaReplaced::UnknownUser,
        })
    }

    async fn list_user_ids(&self) -> Result<Vec<UserId>, StoreError> {
        let ids: Vec<String> = sqlx::query_scalar("SELECT uid FROM users ORDER BY uid")
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(ids.into_iter().map(UserId).collect())
    }

    async fn count_users(&self) -> Result<u64, StoreError> {
        self.count("SELECT COUNT(*) FROM users").await
    }

    async fn count_verified_users(&self) -> Result<u64, StoreError> {
        self.count("SELECT COUNT(*) FROM users WHERE is_verified").await
    }

    async fn count_active_since(&self, since: DateTime<Utc>) -> Result<u64, StoreError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE last_active >= $1")
            .bind(since)
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(to_u64(n))
    }
}

#[async_trait]
impl CommunityStore for PgStore {
    async fn get_community(&self, id: &CommunityId) -> Result<Option<Community>, StoreError> {
        let row = sqlx::query(
            "SELECT id, name, member_count, post_count, created_at FROM communities WHERE id = $1",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let decode = || -> Result<Community, sqlx::Error> {
            Ok(Community {
                id: CommunityId(row.try_get("id")?),
                name: row.try_get("name")?,
                member_count: to_u64(row.try_get("member_count")?),
                post_count: to_u64(row.try_get("post_count")?),
                created_at: row.try_get("created_at")?,
            })
        };
        decode().map(Some).map_err(store_err)
    }

    async fn count_communities(&self) -> Result<u64, StoreError> {
        self.count("SELECT COUNT(*) FROM communities").await
    }

    async fn set_post_count(&self, id: &CommunityId, count: u64) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE communities SET post_count = $1 WHERE id = $2")
            .bind(count as i64)
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(result.rows_affected() == 1)
    }
}
