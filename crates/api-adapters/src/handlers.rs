//! # Handlers
//!
//! Thin translation between JSON and `KarmaBoard` calls. Statistics
//! endpoints always answer 200; everything else maps `DomainError` through
//! `ApiError`.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use domains::{
    CommunityId, CommunityStats, Karma, SiteStats, TargetId, TargetKind, UserId, VoteDirection,
    VoteOutcome,
};
use serde::{Deserialize, Serialize};
use services::KarmaBoard;
use tracing::debug;

use crate::error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub board: Arc<KarmaBoard>,
}

#[derive(Debug, Deserialize)]
pub struct VoteRequest {
    pub voter_id: UserId,
    pub target_id: TargetId,
    pub target_kind: TargetKind,
    /// Omitted means "none", i.e. retract.
    #[serde(default)]
    pub direction: VoteDirection,
}

#[derive(Debug, Serialize)]
pub struct ScoreResponse {
    pub target_id: TargetId,
    pub score: i64,
}

#[derive(Debug, Serialize)]
pub struct VoteStateResponse {
    pub target_id: TargetId,
    pub voter_id: UserId,
    pub direction: VoteDirection,
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn apply_vote(
    State(state): State<AppState>,
    Json(req): Json<VoteRequest>,
) -> Result<Json<VoteOutcome>, ApiError> {
    debug!(
        voter_id = %req.voter_id,
        target_id = %req.target_id,
        direction = ?req.direction,
        "vote request"
    );
    let outcome = state
        .board
        .apply_vote(&req.voter_id, &req.target_id, req.target_kind, req.direction)
        .await?;
    Ok(Json(outcome))
}

pub async fn get_score(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ScoreResponse>, ApiError> {
    let target_id = TargetId::from(id);
    let score = state.board.get_score(&target_id).await?;
    Ok(Json(ScoreResponse { target_id, score }))
}

pub async fn get_vote(
    State(state): State<AppState>,
    Path((id, voter_id)): Path<(String, String)>,
) -> Result<Json<VoteStateResponse>, ApiError> {
    let target_id = TargetId::from(id);
    let voter_id = UserId::from(voter_id);
    let direction = state.board.vote_of(&voter_id, &target_id).await?;
    Ok(Json(VoteStateResponse {
        target_id,
        voter_id,
        direction,
    }))
}

pub async fn get_karma(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Karma>, ApiError> {
    let karma = state.board.get_karma(&UserId::from(id)).await?;
    Ok(Json(karma))
}

pub async fn rebuild_karma(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Karma>, ApiError> {
    let karma = state.board.rebuild_karma(&UserId::from(id)).await?;
    Ok(Json(karma))
}

pub async fn site_stats(State(state): State<AppState>) -> Json<SiteStats> {
    Json(state.board.get_site_stats().await)
}

pub async fn community_stats(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<CommunityStats> {
    Json(state.board.get_community_stats(&CommunityId::from(id)).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build_router;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use domains::{Target, UserProfile};
    use serde_json::Value;
    use services::BoardSettings;
    use storage_adapters::MemoryStore;
    use tower::ServiceExt;

    fn app() -> (Arc<MemoryStore>, axum::Router) {
        let store = Arc::new(MemoryStore::new());
        store.insert_user(UserProfile::new("author".into()));
        store.insert_user(UserProfile::new("voter".into()));
        store.insert_target(Target::new("p1".into(), TargetKind::Post, "author".into()));
        let board = KarmaBoard::new(
            store.clone(),
            store.clone(),
            store.clone(),
            BoardSettings::default(),
        );
        let router = build_router(AppState {
            board: Arc::new(board),
        });
        (store, router)
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_is_ok() {
        let (_, router) = app();
        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn vote_then_read_score() {
        let (_, router) = app();
        let body = serde_json::json!({
            "voter_id": "voter",
            "target_id": "p1",
            "target_kind": "post",
            "direction": "up"
        });
        let response = router
            .clone()
            .oneshot(
                Request::post("/api/v1/votes")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let outcome = json_body(response).await;
        assert_eq!(outcome["new_score"], 1);
        assert_eq!(outcome["new_upvote_count"], 1);

        let response = router
            .oneshot(
                Request::get("/api/v1/targets/p1/score")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(json_body(response).await["score"], 1);
    }

    #[tokio::test]
    async fn unknown_target_is_404() {
        let (_, router) = app();
        let response = router
            .oneshot(
                Request::get("/api/v1/targets/nope/score")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_community_stats_are_zero() {
        let (_, router) = app();
        let response = router
            .oneshot(
                Request::get("/api/v1/communities/ghost/stats")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let stats = json_body(response).await;
        assert_eq!(stats["member_count"], 0);
        assert_eq!(stats["post_count"], 0);
    }
}
