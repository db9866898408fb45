// HTTP transport: one frame in, one detection set (or error payload) out

use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error, info, warn};

use crate::core::types::FrameResponse;
use crate::pipeline::FramePipeline;
use crate::utils::Metrics;

/// Multipart field carrying the frame
const FRAME_FIELD: &str = "file";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<FramePipeline>,
    pub metrics: Metrics,
}

impl AppState {
    /// Share one metrics collector between the pipeline and the endpoints
    pub fn new(pipeline: FramePipeline) -> Self {
        let metrics = pipeline.metrics().clone();
        Self {
            pipeline: Arc::new(pipeline),
            metrics,
        }
    }
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    // The mobile client posts from arbitrary LAN/tunnel origins
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/stats", get(stats_endpoint))
        .route("/detect", post(detect_frame))
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(cors)
}

async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "Live-Learn Assist Server Running" }))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Prometheus metrics endpoint
async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        state.metrics.to_prometheus(),
    )
}

/// Detailed statistics endpoint (JSON)
async fn stats_endpoint(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    serde_json::to_value(state.metrics.snapshot())
        .map(Json)
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to serialize metrics: {}", e),
            )
        })
}

fn respond(response: FrameResponse) -> Response {
    let status = match &response {
        FrameResponse::Detections(_) => StatusCode::OK,
        FrameResponse::Failed { kind, .. } if *kind == "decode" || *kind == "bad_request" => {
            StatusCode::BAD_REQUEST
        }
        FrameResponse::Failed { kind, .. } if *kind == "too_large" => StatusCode::PAYLOAD_TOO_LARGE,
        FrameResponse::Failed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(response)).into_response()
}

fn bad_request(state: &AppState, message: String) -> Response {
    warn!("Rejected frame upload: {}", message);
    state.metrics.record_failure("bad_request");
    respond(FrameResponse::Failed {
        error: message,
        kind: "bad_request",
    })
}

/// Upload failures: body over the size limit gets 413, anything else 400
fn upload_rejected(state: &AppState, context: &str, e: MultipartError) -> Response {
    if e.status() != StatusCode::PAYLOAD_TOO_LARGE {
        return bad_request(state, format!("{}: {}", context, e));
    }

    warn!("Rejected oversized frame upload: {}", e);
    state.metrics.record_failure("too_large");
    respond(FrameResponse::Failed {
        error: format!("Frame exceeds upload limit: {}", e.body_text()),
        kind: "too_large",
    })
}

/// Run detection + recognition on one uploaded frame
///
/// # Request Format:
/// - multipart/form-data
/// - Field "file": the encoded frame (PNG/JPEG/...)
///
/// # Response:
/// - `{"detections": [...]}` on success
/// - `{"error": "...", "kind": "..."}` on failure
async fn detect_frame(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let start_time = std::time::Instant::now();
    debug!("Received detect request");

    let mut frame = None;
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return upload_rejected(&state, "Multipart error", e),
        };

        if field.name() != Some(FRAME_FIELD) {
            continue;
        }

        match field.bytes().await {
            Ok(data) => {
                frame = Some(data);
                break;
            }
            Err(e) => return upload_rejected(&state, "Read error", e),
        }
    }

    let Some(frame) = frame else {
        return bad_request(&state, format!("Missing multipart field '{}'", FRAME_FIELD));
    };

    let pipeline = Arc::clone(&state.pipeline);
    let response = tokio::task::spawn_blocking(move || pipeline.process_contained(&frame))
        .await
        .unwrap_or_else(|e| {
            error!("Frame task failed: {}", e);
            state.metrics.record_failure("internal");
            FrameResponse::Failed {
                error: format!("Frame task failed: {}", e),
                kind: "internal",
            }
        });

    if let FrameResponse::Detections(set) = &response {
        info!(
            "Processed frame in {:.1}ms: {} detections",
            start_time.elapsed().as_secs_f64() * 1000.0,
            set.len()
        );
    }

    respond(response)
}
