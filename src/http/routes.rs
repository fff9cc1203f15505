//! HTTP route definitions

use axum::{
    extract::State,
    http::{header, HeaderName, Method, StatusCode},
    middleware,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer,
};
use tracing::info;

use crate::app::AppState;
use crate::config::{SimulationConfig, TuningOverrides};
use crate::game::registry::{GamePhase, ParticipantCounts};
use crate::http::middleware::{require_admin, ADMIN_TOKEN_HEADER};
use crate::util::time::{started_at, uptime_secs};
use crate::ws::handler::ws_handler;

/// Upper bound on HTTP handler time (the WebSocket upgrade answers at once)
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.client_origin);

    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/ws/:player_id", get(ws_handler))
        .route("/players/count", get(player_count_handler));

    // Admin routes (token required when configured)
    let admin_routes = Router::new()
        .route(
            "/admin/bots",
            post(populate_bots_handler).delete(clear_bots_handler),
        )
        .route(
            "/admin/bots/config",
            get(current_config_handler).post(bot_config_handler),
        )
        .route("/admin/game/start", post(start_game_handler))
        .route("/admin/game/end", post(end_game_handler))
        .layer(middleware::from_fn_with_state(state.clone(), require_admin));

    Router::new()
        .merge(public_routes)
        .merge(admin_routes)
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// "*" allows any origin (without credentials); otherwise a comma-separated list
fn cors_layer(client_origin: &str) -> CorsLayer {
    if client_origin.trim() == "*" {
        return CorsLayer::permissive();
    }

    let allowed_origins: Vec<header::HeaderValue> = client_origin
        .split(',')
        .filter_map(|s| s.trim().parse::<header::HeaderValue>().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            HeaderName::from_static(ADMIN_TOKEN_HEADER),
        ])
        .allow_credentials(true)
}

// ============================================================================
// Public endpoints
// ============================================================================

#[derive(Serialize)]
struct RootResponse {
    message: &'static str,
}

async fn root_handler() -> Json<RootResponse> {
    Json(RootResponse {
        message: "Arena session server is running",
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    started_at: Option<String>,
    phase: GamePhase,
    current_round: u32,
    participants: ParticipantCounts,
    connections: usize,
    simulation_running: bool,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let (phase, current_round) = state.session.phase();

    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        started_at: started_at().map(|t| t.to_rfc3339()),
        phase,
        current_round,
        participants: state.session.counts(),
        connections: state.session.connection_count(),
        simulation_running: state.session.simulation_running(),
    })
}

async fn player_count_handler(State(state): State<AppState>) -> Json<ParticipantCounts> {
    Json(state.session.counts())
}

// ============================================================================
// Simulated population endpoints
// ============================================================================

#[derive(Deserialize)]
struct PopulateRequest {
    count: usize,
    #[serde(default = "default_enable_trails")]
    enable_trails: bool,
}

fn default_enable_trails() -> bool {
    true
}

#[derive(Serialize)]
struct PopulateResponse {
    message: String,
    count: usize,
    enable_trails: bool,
}

async fn populate_bots_handler(
    State(state): State<AppState>,
    Json(req): Json<PopulateRequest>,
) -> Json<PopulateResponse> {
    let count = state.session.populate_bots(req.count, req.enable_trails);

    Json(PopulateResponse {
        message: format!("Spawned {} simulated participants", count),
        count,
        enable_trails: req.enable_trails,
    })
}

#[derive(Serialize)]
struct ClearResponse {
    removed: usize,
}

async fn clear_bots_handler(State(state): State<AppState>) -> Json<ClearResponse> {
    Json(ClearResponse {
        removed: state.session.clear_bots(),
    })
}

async fn current_config_handler(State(state): State<AppState>) -> Json<SimulationConfig> {
    Json(state.session.simulation_config())
}

#[derive(Deserialize)]
struct TuningRequest {
    bot_count: Option<usize>,
    enable_trails: Option<bool>,
    #[serde(default)]
    config_updates: TuningOverrides,
}

async fn bot_config_handler(
    State(state): State<AppState>,
    Json(req): Json<TuningRequest>,
) -> Result<Json<SimulationConfig>, AppError> {
    let config = state
        .session
        .update_tuning(req.bot_count, req.enable_trails, &req.config_updates)
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    Ok(Json(config))
}

// ============================================================================
// Phase endpoints
// ============================================================================

#[derive(Serialize)]
struct StartResponse {
    started: bool,
    phase: GamePhase,
    current_round: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

async fn start_game_handler(State(state): State<AppState>) -> Json<StartResponse> {
    let reason = match state.session.start_game() {
        Ok(()) => None,
        Err(e) => {
            info!(error = %e, "Start request refused");
            Some(e.to_string())
        }
    };
    let (phase, current_round) = state.session.phase();

    Json(StartResponse {
        started: reason.is_none(),
        phase,
        current_round,
        reason,
    })
}

#[derive(Serialize)]
struct EndResponse {
    phase: GamePhase,
}

async fn end_game_handler(State(state): State<AppState>) -> Json<EndResponse> {
    state.session.end_game();
    let (phase, _) = state.session.phase();
    Json(EndResponse { phase })
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::{
        body::{to_bytes, Body},
        http::Request,
    };
    use serde_json::Value;
    use tower::ServiceExt;

    fn app(admin_token: Option<&str>) -> (AppState, Router) {
        let config = Config {
            admin_token: admin_token.map(str::to_string),
            ..Default::default()
        };
        let state = AppState::new(config);
        let router = build_router(state.clone());
        (state, router)
    }

    async fn call(
        router: &Router,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();

        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_root_and_health() {
        let (_, router) = app(None);

        let (status, body) = call(&router, Method::GET, "/", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["message"].is_string());

        let (status, body) = call(&router, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["phase"], "waiting");
        assert_eq!(body["participants"]["total"], 0);
    }

    #[tokio::test]
    async fn test_populate_and_clear() {
        let (state, router) = app(None);

        let (status, body) = call(
            &router,
            Method::POST,
            "/admin/bots",
            Some(serde_json::json!({ "count": 3, "enable_trails": false })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 3);
        assert!(state.session.simulation_running());

        // Freshly spawned participants are still waiting to activate
        let (_, body) = call(&router, Method::GET, "/players/count", None).await;
        assert_eq!(body["bots"], 0);

        let (status, body) = call(&router, Method::DELETE, "/admin/bots", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["removed"], 3);
        assert!(!state.session.simulation_running());
    }

    #[tokio::test]
    async fn test_tuning_update() {
        let (_, router) = app(None);

        let (status, body) = call(
            &router,
            Method::POST,
            "/admin/bots/config",
            Some(serde_json::json!({
                "config_updates": { "speed_multiplier": 1.5 }
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["speed_multiplier"], 1.5);

        let (status, body) = call(
            &router,
            Method::POST,
            "/admin/bots/config",
            Some(serde_json::json!({
                "config_updates": { "speed_multiplier": -1.0 }
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        // The rejected update left the accepted one in place
        let (status, body) = call(&router, Method::GET, "/admin/bots/config", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["speed_multiplier"], 1.5);
        assert_eq!(body["spawn_interval_secs"], 5.0);
    }

    #[tokio::test]
    async fn test_start_refused_then_end() {
        let (_, router) = app(None);

        let (status, body) = call(&router, Method::POST, "/admin/game/start", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["started"], false);
        assert_eq!(body["phase"], "waiting");
        assert_eq!(body["current_round"], 0);

        let (_, body) = call(&router, Method::POST, "/admin/game/end", None).await;
        assert_eq!(body["phase"], "finished");
    }

    #[tokio::test]
    async fn test_admin_token_required() {
        let (_, router) = app(Some("hunter2"));

        let (status, _) = call(&router, Method::DELETE, "/admin/bots", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let request = Request::builder()
            .method(Method::DELETE)
            .uri("/admin/bots")
            .header(ADMIN_TOKEN_HEADER, "hunter2")
            .body(Body::empty())
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // Public routes stay open
        let (status, _) = call(&router, Method::GET, "/players/count", None).await;
        assert_eq!(status, StatusCode::OK);
    }
}
