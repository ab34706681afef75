//! HTTP/JSON read views: aircraft snapshot, counters, health.
//!
//! Strictly read-only — every handler goes through the tracker handle or
//! a published stats view, so the HTTP surface can never mutate pipeline
//! state or block the ingest path.

use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::watch;
use tower_http::cors::{AllowOrigin, CorsLayer};

use skymesh_alert::DispatchView;
use skymesh_core::types::Icao;

use crate::pipeline::{DecodeStats, TrackerHandle};
use crate::sources::{unix_now, SourceStatus};

/// Shared state behind the router.
pub struct AppState {
    pub tracker: TrackerHandle,
    pub sources: Vec<Arc<SourceStatus>>,
    pub decode_stats: Arc<Mutex<DecodeStats>>,
    pub dispatch_view: Option<watch::Receiver<DispatchView>>,
    pub started_at: f64,
}

/// Build the read-view router. `cors_origin` of `None` means same-origin
/// only.
pub fn build_router(state: Arc<AppState>, cors_origin: Option<String>) -> Router {
    let mut router = Router::new()
        .route("/api/v1/aircraft", get(api_aircraft))
        .route("/api/v1/aircraft/:icao", get(api_aircraft_one))
        .route("/api/v1/stats", get(api_stats))
        .route("/api/v1/health", get(api_health))
        .with_state(state);

    if let Some(origin) = cors_origin {
        let cors = match origin.parse() {
            Ok(value) => CorsLayer::new().allow_origin(AllowOrigin::exact(value)),
            Err(_) => CorsLayer::new(),
        };
        router = router.layer(cors);
    }

    router
}

fn sources_all_down(state: &AppState) -> bool {
    !state.sources.is_empty() && state.sources.iter().all(|s| !s.connected())
}

/// GET /api/v1/aircraft — full snapshot.
async fn api_aircraft(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let aircraft = state.tracker.snapshot().await;
    Json(json!({
        "now": unix_now(),
        "sources_all_down": sources_all_down(&state),
        "count": aircraft.len(),
        "aircraft": aircraft,
    }))
}

/// GET /api/v1/aircraft/{icao} — one record.
async fn api_aircraft_one(
    State(state): State<Arc<AppState>>,
    Path(icao): Path<String>,
) -> (StatusCode, Json<Value>) {
    let Some(icao) = Icao::parse_hex(&icao) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "icao must be 6 hex chars"})),
        );
    };

    match state.tracker.get(icao).await {
        Some(ac) => (StatusCode::OK, Json(json!(ac))),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("aircraft {icao} not tracked")})),
        ),
    }
}

/// GET /api/v1/stats — counters from every stage.
async fn api_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let tracker_stats = state.tracker.stats().await;
    let decode = state.decode_stats.lock().unwrap().clone();

    let sources: Vec<Value> = state
        .sources
        .iter()
        .map(|s| {
            json!({
                "name": s.name,
                "kind": s.kind,
                "connected": s.connected(),
                "messages": s.messages(),
                "errors": s.errors(),
                "dropped_frames": s.dropped(),
                "last_message": s.last_message_unix(),
            })
        })
        .collect();

    let dispatch = state
        .dispatch_view
        .as_ref()
        .map(|rx| json!(rx.borrow().clone()));

    Json(json!({
        "uptime_sec": unix_now() - state.started_at,
        "sources": sources,
        "decode": decode,
        "tracker": tracker_stats,
        "dispatch": dispatch,
    }))
}

/// GET /api/v1/health — boolean plus per-check detail.
async fn api_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let sources_ok = !sources_all_down(&state);
    let tracker_ok = tokio::time::timeout(
        std::time::Duration::from_secs(2),
        state.tracker.aircraft_count(),
    )
    .await
    .is_ok();
    let dispatch_ok = state
        .dispatch_view
        .as_ref()
        .map(|rx| !rx.borrow().all_interfaces_degraded)
        .unwrap_or(true);

    let ok = sources_ok && tracker_ok && dispatch_ok;
    Json(json!({
        "ok": ok,
        "checks": {
            "sources": sources_ok,
            "tracker": tracker_ok,
            "dispatch": dispatch_ok,
        },
    }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    use skymesh_core::frame::RawFrame;
    use skymesh_core::types::{hex_decode, SourceKind};
    use skymesh_core::{TrackerConfig, Watchlist};

    use crate::pipeline::spawn_pipeline;
    use crate::sources::SourceItem;

    async fn test_state() -> (Arc<AppState>, mpsc::Sender<SourceItem>) {
        let (tx, rx) = mpsc::channel(16);
        let p = spawn_pipeline(rx, TrackerConfig::default(), Watchlist::empty());
        let state = Arc::new(AppState {
            tracker: p.tracker.clone(),
            sources: Vec::new(),
            decode_stats: p.decode_stats.clone(),
            dispatch_view: None,
            started_at: unix_now(),
        });
        (state, tx)
    }

    async fn ingest_and_settle(
        tx: &mpsc::Sender<SourceItem>,
        state: &Arc<AppState>,
        hex: &str,
    ) {
        tx.send(SourceItem::Frame(RawFrame {
            bytes: hex_decode(hex).unwrap(),
            timestamp: 1.0,
            source: 0,
            source_kind: SourceKind::RawFile,
            signal_level: None,
        }))
        .await
        .unwrap();

        for _ in 0..50 {
            if !state.tracker.snapshot().await.is_empty() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("frame never reached the tracker");
    }

    #[tokio::test]
    async fn test_aircraft_snapshot_route() {
        let (state, tx) = test_state().await;
        ingest_and_settle(&tx, &state, "8D4840D6202CC371C32CE0576098").await;

        let app = build_router(state, None);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/aircraft")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["count"], 1);
        assert_eq!(json["aircraft"][0]["callsign"], "KLM1023");
        assert_eq!(json["sources_all_down"], false);
    }

    #[tokio::test]
    async fn test_single_aircraft_route() {
        let (state, tx) = test_state().await;
        ingest_and_settle(&tx, &state, "8D4840D6202CC371C32CE0576098").await;

        let app = build_router(state, None);
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/v1/aircraft/4840d6")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/v1/aircraft/AAAAAA")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/aircraft/nothex")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_stats_route() {
        let (state, tx) = test_state().await;
        ingest_and_settle(&tx, &state, "8D4840D6202CC371C32CE0576098").await;

        let app = build_router(state, None);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/stats")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["decode"]["crc_pass"], 1);
        assert_eq!(json["tracker"]["messages"], 1);
    }

    #[tokio::test]
    async fn test_health_route() {
        let (state, _tx) = test_state().await;
        let app = build_router(state, None);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["ok"], true);
    }
}
