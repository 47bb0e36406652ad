//! Sync control routes: manual trigger, status, interval.

use axum::extract::{Query, State};
use axum::Json;
use badgesync_core::{ScheduleStatus, SyncResult};
use serde::Deserialize;

use crate::{error::AppError, state::AppState};

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

#[derive(Deserialize, Default)]
pub struct TriggerQuery {
    pub debug: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct TriggerBody {
    #[serde(default)]
    pub debug: bool,
}

#[derive(Deserialize)]
pub struct IntervalBody {
    pub minutes: u64,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /api/sync — run the orchestration now, out of band. `?debug=1` (or
/// `{"debug": true}`) adds a per-step trace to the result. The response is
/// always a structured `SyncResult`, success or not.
pub async fn trigger_sync(
    State(app): State<AppState>,
    Query(query): Query<TriggerQuery>,
    body: Option<Json<TriggerBody>>,
) -> Json<SyncResult> {
    let debug =
        query.debug.as_deref() == Some("1") || body.map(|Json(b)| b.debug).unwrap_or(false);
    Json(app.scheduler.trigger_now(debug).await)
}

/// GET /api/sync/status — current interval plus the most recent attempt.
pub async fn sync_status(State(app): State<AppState>) -> Json<ScheduleStatus> {
    Json(app.scheduler.status().await)
}

/// PUT /api/sync/interval — change the recurring cadence; rejects values
/// outside [5, 120] minutes with a 400.
pub async fn set_interval(
    State(app): State<AppState>,
    Json(body): Json<IntervalBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    app.scheduler.set_interval(body.minutes).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "intervalMinutes": body.minutes,
    })))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use crate::{build_router, state::AppState};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use badgesync_core::{Config, Scheduler, SyncContext};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_router() -> axum::Router {
        router_with(Config::default())
    }

    fn router_with(config: Config) -> axum::Router {
        let ctx = SyncContext::new(config).unwrap();
        build_router(AppState::new(Scheduler::new(ctx)))
    }

    #[tokio::test]
    async fn status_returns_interval_and_empty_history() {
        let resp = test_router()
            .oneshot(
                Request::builder()
                    .uri("/api/sync/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["intervalMinutes"], 15);
        assert!(json["lastSync"].is_null());
        assert!(json["lastResult"].is_null());
    }

    #[tokio::test]
    async fn set_interval_within_range_succeeds() {
        let resp = test_router()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/api/sync/interval")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"minutes":30}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["intervalMinutes"], 30);
    }

    #[tokio::test]
    async fn set_interval_too_small_is_rejected() {
        let resp = test_router()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/api/sync/interval")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"minutes":3}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn set_interval_too_large_is_rejected() {
        let resp = test_router()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/api/sync/interval")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"minutes":200}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn trigger_returns_structured_result_on_failure() {
        // Unreachable portal: the run fails but the endpoint still answers
        // 200 with a structured SyncResult body.
        let mut config = Config::default();
        config.portal_url = "http://127.0.0.1:9".to_string();
        let resp = router_with(config)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/sync")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["success"], false);
        assert!(json["error"].is_string());
    }
}
