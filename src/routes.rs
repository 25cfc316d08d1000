use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::{
    engine::PhishingEngine,
    error::{validation_error, AppError},
    features::normalize_scheme,
    layout::LayoutInfo,
    storage::{BlocklistStore, FeedbackStore},
    types::{
        BlockRequest, BlockedUrlsResponse, FeedbackRequest, PredictRequest, PredictResponse,
        StatusResponse, Vote,
    },
};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<PhishingEngine>,
    pub blocklist: Arc<dyn BlocklistStore>,
    pub feedback: Arc<dyn FeedbackStore>,
    pub prometheus: Option<PrometheusHandle>,
}

pub fn router(state: AppState, max_concurrent_requests: usize) -> Router {
    Router::new()
        .route("/predict", post(predict))
        .route("/block-url", post(block_url))
        .route("/get-blocked-urls", get(get_blocked_urls))
        .route("/submit-feedback", post(submit_feedback))
        .route("/feedback/*url", get(get_feedback))
        .route("/proceed/*url", get(proceed))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .layer(ConcurrencyLimitLayer::new(max_concurrent_requests))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn predict(
    State(state): State<AppState>,
    Form(request): Form<PredictRequest>,
) -> Result<Json<PredictResponse>, AppError> {
    let result = state.engine.classify(&request.url).await?;
    Ok(Json(PredictResponse::from(result)))
}

pub async fn block_url(
    State(state): State<AppState>,
    Json(request): Json<BlockRequest>,
) -> Result<Response, AppError> {
    let Some(url) = request.url.filter(|url| !url.trim().is_empty()) else {
        return Ok((StatusCode::BAD_REQUEST, Json(StatusResponse::error("No URL provided"))).into_response());
    };

    if !state.blocklist.add(&url).await? {
        info!("Block request for already blocked URL {}", url);
    }

    Ok(Json(StatusResponse::success("URL blocked")).into_response())
}

pub async fn get_blocked_urls(
    State(state): State<AppState>,
) -> Result<Json<BlockedUrlsResponse>, AppError> {
    let blocked_urls = state.blocklist.list().await?;
    Ok(Json(BlockedUrlsResponse { blocked_urls }))
}

pub async fn submit_feedback(
    State(state): State<AppState>,
    Json(request): Json<FeedbackRequest>,
) -> Result<Json<StatusResponse>, AppError> {
    if request.url.is_empty() {
        return Err(validation_error("Feedback requires a URL"));
    }

    let vote = Vote::parse(&request.feedback);
    if let Err(e) = state.feedback.record(&request.url, vote, &request.reason).await {
        warn!("Failed to store feedback for {}: {}", request.url, e);
        return Err(e);
    }

    Ok(Json(StatusResponse::success("Feedback submitted successfully.")))
}

pub async fn get_feedback(
    State(state): State<AppState>,
    Path(url): Path<String>,
) -> Result<Json<Value>, AppError> {
    let body = match state.feedback.get(&url).await? {
        Some(tally) => json!({
            "safe_votes": tally.safe_votes,
            "suspicious_votes": tally.suspicious_votes,
            "reason": tally.reason,
        }),
        None => json!({ "message": "No feedback found for this URL." }),
    };
    Ok(Json(body))
}

/// Sends the user on to a URL they chose to visit despite the verdict.
pub async fn proceed(Path(url): Path<String>) -> Response {
    let target = if url.starts_with("http") {
        url
    } else {
        normalize_scheme(&url)
    };
    (StatusCode::FOUND, [(header::LOCATION, target)]).into_response()
}

pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "model_version": state.engine.model_version(),
        "feature_layout": LayoutInfo::current(),
    }))
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    match &state.prometheus {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        engine::{
            tests::{engine_with, IpRule},
            LEGITIMATE_REASON,
        },
        storage::{FileBlocklist, MemoryFeedbackStore},
    };
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn app(dir: &tempfile::TempDir) -> Router {
        let state = AppState {
            engine: Arc::new(engine_with(Arc::new(IpRule))),
            blocklist: Arc::new(FileBlocklist::new(dir.path().join("blocked.txt"))),
            feedback: Arc::new(MemoryFeedbackStore::new()),
            prometheus: None,
        };
        router(state, 16)
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn form(uri: &str, body: &str) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn json_post(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_predict_phishing() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir);

        let (status, body) = send(&app, form("/predict", "url=http%3A%2F%2F192.168.1.1%2Flogin")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"], "Phishing");
        assert_eq!(body["label"], "phishing");
        assert_eq!(body["url"], "http://192.168.1.1/login");
        assert_eq!(body["block_option"], true);
        assert!(body["reasons"]
            .as_array()
            .unwrap()
            .iter()
            .any(|r| r == "URL contains an IP address."));
    }

    #[tokio::test]
    async fn test_predict_legitimate() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir);

        let (status, body) = send(&app, form("/predict", "url=example.com")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"], "Not phishing");
        assert_eq!(body["block_option"], false);
        assert_eq!(body["reasons"], json!([LEGITIMATE_REASON]));
    }

    #[tokio::test]
    async fn test_block_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir);

        let (status, body) = send(&app, json_post("/block-url", json!({"url": "bad.example"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "success", "message": "URL blocked"}));

        send(&app, json_post("/block-url", json!({"url": "bad.example"}))).await;

        let (_, body) = send(&app, get_req("/get-blocked-urls")).await;
        assert_eq!(body, json!({"blocked_urls": ["bad.example"]}));
    }

    #[tokio::test]
    async fn test_block_without_url_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir);

        let (status, body) = send(&app, json_post("/block-url", json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"status": "error", "message": "No URL provided"}));

        let (status, _) = send(&app, json_post("/block-url", json!({"url": ""}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_feedback_round() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir);

        let (_, body) = send(&app, get_req("/feedback/example.com")).await;
        assert_eq!(body, json!({"message": "No feedback found for this URL."}));

        let vote = json!({"url": "example.com", "feedback": "safe", "reason": "my bank"});
        let (status, body) = send(&app, json_post("/submit-feedback", vote)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Feedback submitted successfully.");

        let vote = json!({"url": "example.com", "feedback": "suspicious", "reason": "changed"});
        send(&app, json_post("/submit-feedback", vote)).await;

        let (_, body) = send(&app, get_req("/feedback/example.com")).await;
        assert_eq!(body, json!({"safe_votes": 1, "suspicious_votes": 1, "reason": "my bank"}));
    }

    #[tokio::test]
    async fn test_feedback_without_url_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir);

        let vote = json!({"url": "", "feedback": "safe", "reason": ""});
        let (status, body) = send(&app, json_post("/submit-feedback", vote)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], 400);
    }

    #[tokio::test]
    async fn test_proceed_redirects() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir);

        let response = app.clone().oneshot(get_req("/proceed/example.com/path")).await.unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[header::LOCATION], "https://example.com/path");

        let response = app.oneshot(get_req("/proceed/http://example.com")).await.unwrap();
        assert_eq!(response.headers()[header::LOCATION], "http://example.com");
    }

    #[tokio::test]
    async fn test_health_and_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir);

        let (status, body) = send(&app, get_req("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["model_version"], "ip-rule");
        assert_eq!(body["feature_layout"]["feature_count"], 30);

        let (status, _) = send(&app, get_req("/metrics")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
