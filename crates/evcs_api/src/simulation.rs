use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use evcs_core::ScenarioConfig;
use evcs_engine::{ProtocolEvent, RunSummary};
use serde::{Deserialize, Serialize};

use crate::{SharedEngine, engine_error_to_response, lock};

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvanceRequest {
    pub seconds: f64,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvanceResponse {
    pub time_s: f64,
    pub protocol_events: usize,
}

#[derive(Deserialize)]
pub struct EventsQuery {
    #[serde(default)]
    pub since: usize,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsResponse {
    /// Index to pass as `since` to fetch only newer events.
    pub next: usize,
    pub events: Vec<ProtocolEvent>,
}

/// Get the scenario the simulation was built from
pub async fn get_scenario(State(engine): State<SharedEngine>) -> Json<ScenarioConfig> {
    let engine = lock(&engine);
    Json(engine.config().clone())
}

/// Advance the simulated clock
pub async fn advance(
    State(engine): State<SharedEngine>,
    Json(payload): Json<AdvanceRequest>,
) -> impl IntoResponse {
    let mut engine = lock(&engine);
    tracing::info!(seconds = payload.seconds, from = %engine.now(), "Advancing simulation");
    match engine.advance(payload.seconds) {
        Ok(time) => (
            StatusCode::OK,
            Json(AdvanceResponse {
                time_s: time.as_secs_f64(),
                protocol_events: engine.history(0).len(),
            }),
        )
            .into_response(),
        Err(error) => engine_error_to_response(error).into_response(),
    }
}

/// Get protocol events recorded since the given index
pub async fn get_events(
    State(engine): State<SharedEngine>,
    Query(query): Query<EventsQuery>,
) -> Json<EventsResponse> {
    let engine = lock(&engine);
    let events = engine.history(query.since).to_vec();
    Json(EventsResponse {
        next: engine.history(0).len(),
        events,
    })
}

/// Get run statistics for every agent
pub async fn get_summary(State(engine): State<SharedEngine>) -> Json<RunSummary> {
    let engine = lock(&engine);
    Json(engine.summary())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ErrorResponse, test_engine};
    use axum::{
        Router,
        body::Body,
        http::{Request, StatusCode},
        routing::{get, post},
    };
    use evcs_engine::{Engine, ProtocolDetail};
    use std::sync::{Arc, Mutex};
    use tower::util::ServiceExt;

    /// Create the application router with simulation endpoints
    pub fn create_app(engine: Engine) -> Router {
        let shared_state = Arc::new(Mutex::new(engine));
        Router::new()
            .route("/scenario", get(get_scenario))
            .route("/simulation/advance", post(advance))
            .route("/simulation/events", get(get_events))
            .route("/simulation/summary", get(get_summary))
            .with_state(shared_state)
    }

    fn advance_request(seconds: f64) -> Request<Body> {
        Request::builder()
            .uri("/simulation/advance")
            .method("POST")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::to_string(&AdvanceRequest { seconds }).unwrap(),
            ))
            .unwrap()
    }

    #[tokio::test]
    async fn test_scenario_endpoint() {
        let app = create_app(test_engine(2, 1));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/scenario")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let scenario: ScenarioConfig = serde_json::from_slice(&body).unwrap();
        assert_eq!(scenario.station.max_slots, 2);
        assert_eq!(scenario.vehicles.len(), 1);
        assert_eq!(scenario.seed, 3);
    }

    #[tokio::test]
    async fn test_advance_accumulates() {
        let app = create_app(test_engine(1, 1));

        for expected in [1.5, 3.0] {
            let response = app.clone().oneshot(advance_request(1.5)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);

            let body = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            let advanced: AdvanceResponse = serde_json::from_slice(&body).unwrap();
            assert_eq!(advanced.time_s, expected);
            assert!(advanced.protocol_events > 0);
        }
    }

    #[tokio::test]
    async fn test_advance_rejects_negative_duration() {
        let app = create_app(test_engine(1, 1));

        let response = app.oneshot(advance_request(-2.0)).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let error_response: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert!(error_response.error.contains("-2"));
    }

    #[tokio::test]
    async fn test_events_since_index() {
        let mut engine = test_engine(1, 2);
        engine.advance(2.0).unwrap();
        let total = engine.history(0).len();
        let app = create_app(engine);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/simulation/events")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let all: EventsResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(all.events.len(), total);
        assert_eq!(all.next, total);
        assert!(all.events.iter().any(|event| {
            event.agent == "cs[0]" && matches!(event.detail, ProtocolDetail::Station(_))
        }));

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/simulation/events?since={}", total - 1))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let tail: EventsResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(tail.events.len(), 1);
        assert_eq!(tail.events[0], all.events[total - 1]);
    }

    #[tokio::test]
    async fn test_summary_endpoint() {
        let mut engine = test_engine(1, 2);
        engine.advance(1.0).unwrap();
        let app = create_app(engine);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/simulation/summary")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let summary: RunSummary = serde_json::from_slice(&body).unwrap();
        assert_eq!(summary.time_s, 1.0);
        assert_eq!(summary.vehicles.len(), 2);
        assert_eq!(summary.station.requests_received, 2);
        assert_eq!(summary.transport.emitted, 4);
    }
}
