use crate::handlers::{candidate, vote, ws};
use crate::state::AppState;
use axum::{
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route(
            "/candidatos",
            post(candidate::create_candidate).get(candidate::list_candidates),
        )
        .route("/candidatos/{id}", get(candidate::get_candidate))
        .route("/votos", post(vote::submit_vote))
        .route("/votos/totais", get(vote::get_totals))
        .route("/votos/ws", get(ws::ws_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn ping() -> Json<Value> {
    Json(json!({ "message": "pong" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CandidateResponse, VoteResponse};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use persistence::log::JournaledLog;
    use persistence::stream::EventLog;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use tally::publisher::PublisherConfig;
    use tally::{AggregateCounters, BroadcastHub, CandidateRegistry, VotePublisher};
    use tower::ServiceExt;
    use vote_types::clock::{Clock, ManualClock};
    use vote_types::ids::CandidateId;

    fn test_state(log: Arc<dyn EventLog>, clock: Arc<dyn Clock>) -> AppState {
        let registry = Arc::new(CandidateRegistry::new());
        let hub = BroadcastHub::default();
        let publisher = Arc::new(VotePublisher::new(
            log,
            Arc::new(AggregateCounters::new()),
            registry.clone(),
            hub.clone(),
            clock,
            PublisherConfig::default(),
        ));
        AppState::new(publisher, registry, hub)
    }

    fn app() -> (Router, AppState) {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(1_766_061_296_000));
        let state = test_state(Arc::new(JournaledLog::in_memory(clock.clone())), clock);
        (create_router(state.clone()), state)
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_ping() {
        let (app, _) = app();
        let (status, body) = send(&app, "GET", "/ping", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "message": "pong" }));
    }

    #[tokio::test]
    async fn test_candidate_lifecycle() {
        let (app, _) = app();
        let (status, body) = send(&app, "POST", "/candidatos", Some(r#"{"nome":"Alice"}"#)).await;
        assert_eq!(status, StatusCode::CREATED);
        let created: CandidateResponse = serde_json::from_value(body).unwrap();
        assert_eq!(created.nome, "Alice");

        let (status, body) = send(&app, "GET", &format!("/candidatos/{}", created.id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(serde_json::from_value::<CandidateResponse>(body).unwrap(), created);

        let (status, body) = send(&app, "GET", "/candidatos", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn test_unknown_candidate_is_404_with_error_body() {
        let (app, _) = app();
        let (status, body) = send(&app, "GET", &format!("/candidatos/{}", CandidateId::new()), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], 404);
        assert_eq!(body["error"], "NOT_FOUND");
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_blank_candidate_name_is_rejected() {
        let (app, _) = app();
        let (status, body) = send(&app, "POST", "/candidatos", Some(r#"{"nome":"  "}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn test_vote_is_accepted_and_counted() {
        let (app, state) = app();
        let alice = state.registry.create("Alice").unwrap();

        let (status, body) = send(
            &app,
            "POST",
            "/votos",
            Some(&format!(r#"{{"candidato_id":"{}"}}"#, alice.id)),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let vote: VoteResponse = serde_json::from_value(body).unwrap();
        assert_eq!(vote.candidato_id, alice.id);
        assert_eq!(vote.hora, "2025-12-18-12");

        let (status, body) = send(&app, "GET", "/votos/totais", None).await;
        assert_eq!(status, StatusCode::OK);
        let totals: BTreeMap<String, u64> = serde_json::from_value(body).unwrap();
        assert_eq!(totals, BTreeMap::from([("Alice".to_string(), 1)]));
    }

    #[tokio::test]
    async fn test_malformed_vote_requests_are_400() {
        let (app, _) = app();
        for body in [r#"{"candidato_id":"not-a-uuid"}"#, r#"{"nope":1}"#, "garbage"] {
            let (status, value) = send(&app, "POST", "/votos", Some(body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "body {body}");
            assert_eq!(value["code"], 400);
        }
    }

    #[tokio::test]
    async fn test_vote_for_unregistered_candidate_is_404() {
        let (app, state) = app();
        let body = format!(r#"{{"candidato_id":"{}"}}"#, CandidateId::new());
        let (status, _) = send(&app, "POST", "/votos", Some(&body)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(state.publisher.current_totals().is_empty());
    }
}
