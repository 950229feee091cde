use crate::farm_logic::model::{ErrorResponse, HealthResponse, PumpCommandRequest};
use crate::farm_logic::state::AppState;
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use lib_smartfarm::core::{DispatchError, DispatchReceipt, TelemetrySnapshot};
use std::net::SocketAddr;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};

/// Maps dispatcher failures onto HTTP statuses: validation is the caller's
/// fault (400), a broker problem is ours (500).
pub struct AppError(DispatchError);

impl From<DispatchError> for AppError {
    fn from(e: DispatchError) -> Self {
        AppError(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self.0 {
            DispatchError::Invalid(_) => (StatusCode::BAD_REQUEST, "InvalidCommand"),
            DispatchError::Transport(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CommandTransportError"),
        };
        if status.is_server_error() {
            log::error!("Pump command failed: {}", self.0);
        } else {
            log::warn!("Pump command rejected: {}", self.0);
        }
        let body = ErrorResponse {
            error_type: error_type.to_string(),
            detail: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub fn router(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/latest", get(latest_handler))
        .route("/api/pump-on", post(pump_on_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .with_state(app_state)
}

pub async fn run(port: u16, app_state: AppState, mut shutdown: broadcast::Receiver<()>) -> anyhow::Result<()> {
    let app = router(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!("HTTP API listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.recv().await.ok();
            log::info!("HTTP API shutting down.");
        })
        .await?;
    Ok(())
}

async fn latest_handler(State(state): State<AppState>) -> Json<TelemetrySnapshot> {
    Json(TelemetrySnapshot::clone(&state.snapshots.get_latest()))
}

async fn pump_on_handler(
    State(state): State<AppState>,
    Json(request): Json<PumpCommandRequest>,
) -> Result<Json<DispatchReceipt>, AppError> {
    let receipt = state.dispatcher.dispatch(&request.command, request.duration).await?;
    Ok(Json(receipt))
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let ingestion = if state.ingestion.is_running() { "running" } else { "stopped" };
    Json(HealthResponse {
        status: "ok".to_string(),
        ingestion: ingestion.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, header};
    use lib_smartfarm::core::{
        CommandDispatcher, IngestionLifecycle, MockCommandPublisher, PublishError, SnapshotAccessor, TelemetryCache,
    };
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app_with(cache: Arc<TelemetryCache>, mock: MockCommandPublisher) -> Router {
        let dispatcher = CommandDispatcher::new(Arc::new(mock), "farm/pump");
        let status = IngestionLifecycle::new().status();
        router(AppState::new(SnapshotAccessor::new(cache), dispatcher, status))
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn pump_request(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/pump-on")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_latest_is_empty_object_before_any_message() {
        let app = app_with(Arc::new(TelemetryCache::new()), MockCommandPublisher::new());

        let response = app
            .oneshot(Request::builder().uri("/api/latest").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({}));
    }

    #[tokio::test]
    async fn test_latest_returns_cached_snapshot_verbatim() {
        let cache = Arc::new(TelemetryCache::new());
        let reading = json!({"device": "node-7", "soil": {"moisture": 38, "temp": 24.5}});
        cache.set(TelemetrySnapshot::try_from(reading.clone()).unwrap());

        let response = app_with(cache, MockCommandPublisher::new())
            .oneshot(Request::builder().uri("/api/latest").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(body_json(response).await, reading);
    }

    #[tokio::test]
    async fn test_pump_on_returns_receipt() {
        let mut mock = MockCommandPublisher::new();
        mock.expect_publish().times(1).returning(|_, _| Ok(()));

        let response = app_with(Arc::new(TelemetryCache::new()), mock)
            .oneshot(pump_request(r#"{"command": "activate", "duration": 5000}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "success");
        assert_eq!(body["sent_command"], json!({"command": "activate", "duration": 5000}));

        let start = chrono::DateTime::parse_from_rfc3339(body["start"].as_str().unwrap()).unwrap();
        let end = chrono::DateTime::parse_from_rfc3339(body["end"].as_str().unwrap()).unwrap();
        assert_eq!((end - start).num_milliseconds(), 5000);
    }

    #[tokio::test]
    async fn test_pump_on_uses_request_defaults() {
        let mut mock = MockCommandPublisher::new();
        mock.expect_publish().times(1).returning(|_, _| Ok(()));

        let response = app_with(Arc::new(TelemetryCache::new()), mock)
            .oneshot(pump_request("{}"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["sent_command"]["duration"], 5000);
    }

    #[tokio::test]
    async fn test_pump_on_invalid_command_is_400_without_publish() {
        let mut mock = MockCommandPublisher::new();
        mock.expect_publish().times(0);

        let response = app_with(Arc::new(TelemetryCache::new()), mock)
            .oneshot(pump_request(r#"{"command": "PUMP_OFF", "duration": 5000}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error_type"], "InvalidCommand");
    }

    #[tokio::test]
    async fn test_pump_on_broker_failure_is_500() {
        let mut mock = MockCommandPublisher::new();
        mock.expect_publish()
            .times(1)
            .returning(|_, _| Err(PublishError::Rejected("NotAuthorized".to_string())));

        let response = app_with(Arc::new(TelemetryCache::new()), mock)
            .oneshot(pump_request(r#"{"duration": 1000}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error_type"], "CommandTransportError");
        assert!(body["detail"].as_str().unwrap().starts_with("MQTT publish failed"));
    }

    #[tokio::test]
    async fn test_health_reports_stopped_ingestion() {
        let response = app_with(Arc::new(TelemetryCache::new()), MockCommandPublisher::new())
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"status": "ok", "ingestion": "stopped"}));
    }
}
