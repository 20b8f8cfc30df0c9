//! HTTP boundary.
//!
//! Endpoints:
//! - POST /api/convert - multipart upload (`file`, `direction`, `vision`, `mapReduce`)
//! - POST /api/image   - JSON or multipart (`imageDataUrl`, `direction`, `chartType`)
//! - GET  /healthz     - liveness plus cache counters
//!
//! Errors are `{ error, detail?, timestamp }`: 400 for validation errors,
//! 500 for everything else. Each conversion is bounded by
//! `request_timeout_secs`.

use crate::config::{ChartType, ConvertOptions, Direction, MapReduceMode, VisionMode};
use crate::convert::{with_timeout, ConversionOrchestrator};
use crate::error::ConvertError;
use crate::output::{ConversionOutput, ImageConversionOutput};
use crate::pipeline::encode;
use axum::{
    extract::{DefaultBodyLimit, FromRequest, Multipart, Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<ConversionOrchestrator>,
}

// ============================================================================
// Error Response
// ============================================================================

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
    timestamp: String,
}

/// Error returned by every handler.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    error: String,
    detail: Option<String>,
}

impl ApiError {
    fn bad_request(error: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: error.into(),
            detail: Some(detail.into()),
        }
    }

    fn unreadable_form(e: axum::extract::multipart::MultipartError) -> Self {
        Self::bad_request("Failed to read form data", e.body_text())
    }
}

impl From<ConvertError> for ApiError {
    fn from(e: ConvertError) -> Self {
        if e.is_validation() {
            Self {
                status: StatusCode::BAD_REQUEST,
                error: e.to_string(),
                detail: None,
            }
        } else {
            error!("Conversion failed: {}", e);
            Self {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                error: "Conversion failed".to_string(),
                detail: Some(e.to_string()),
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.error,
            detail: self.detail,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        (self.status, Json(body)).into_response()
    }
}

// ============================================================================
// Router
// ============================================================================

/// Build the application router.
pub fn router(orchestrator: Arc<ConversionOrchestrator>) -> Router {
    // Room for multipart framing and base64 inflation; the orchestrator
    // enforces the real size cap with a proper error message.
    let body_limit = orchestrator.config().max_file_size_bytes().saturating_mul(2);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/convert", post(convert_pdf))
        .route("/api/image", post(convert_image))
        .route("/healthz", get(healthz))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(AppState { orchestrator })
}

/// Bind `addr` and serve until Ctrl-C.
pub async fn serve(orchestrator: Arc<ConversionOrchestrator>, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, router(orchestrator))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/convert
async fn convert_pdf(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ConversionOutput>, ApiError> {
    let mut file: Option<Vec<u8>> = None;
    let mut options = ConvertOptions::default();

    while let Some(field) = multipart.next_field().await.map_err(ApiError::unreadable_form)? {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                let data = field.bytes().await.map_err(ApiError::unreadable_form)?;
                debug!("Received file: {} bytes", data.len());
                file = Some(data.to_vec());
            }
            "direction" => {
                let v = field.text().await.map_err(ApiError::unreadable_form)?;
                options.direction = Direction::parse_lenient(&v);
            }
            "vision" => {
                let v = field.text().await.map_err(ApiError::unreadable_form)?;
                options.vision = VisionMode::parse_lenient(&v);
            }
            "mapReduce" => {
                let v = field.text().await.map_err(ApiError::unreadable_form)?;
                options.map_reduce = MapReduceMode::parse_lenient(&v);
            }
            other => debug!("Ignoring form field '{}'", other),
        }
    }

    let file = file.ok_or(ConvertError::MissingFile)?;
    let orchestrator = &state.orchestrator;
    let secs = orchestrator.config().request_timeout_secs;
    let output = with_timeout(secs, orchestrator.convert(&file, options)).await?;
    Ok(Json(output))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageRequest {
    #[serde(default)]
    image_data_url: String,
    #[serde(default)]
    direction: Option<String>,
    #[serde(default)]
    chart_type: Option<String>,
}

/// POST /api/image
async fn convert_image(
    State(state): State<AppState>,
    request: Request,
) -> Result<Json<ImageConversionOutput>, ApiError> {
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let body = if content_type.starts_with("application/json") {
        let Json(body) = Json::<ImageRequest>::from_request(request, &state)
            .await
            .map_err(|e| ApiError::bad_request("Invalid JSON body", e.body_text()))?;
        body
    } else if content_type.starts_with("multipart/form-data") {
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|e| ApiError::bad_request("Invalid multipart body", e.body_text()))?;
        read_image_form(multipart).await?
    } else {
        return Err(ConvertError::UnsupportedContentType { content_type }.into());
    };

    let direction = Direction::parse_lenient(body.direction.as_deref().unwrap_or(""));
    let chart_type = ChartType::parse_lenient(body.chart_type.as_deref().unwrap_or(""));
    let orchestrator = &state.orchestrator;
    let secs = orchestrator.config().request_timeout_secs;
    let output = with_timeout(
        secs,
        orchestrator.convert_image(&body.image_data_url, direction, chart_type),
    )
    .await?;
    Ok(Json(output))
}

/// Multipart variant of the image request. A raw `image` (or `file`) part
/// is accepted in place of `imageDataUrl`.
async fn read_image_form(mut multipart: Multipart) -> Result<ImageRequest, ApiError> {
    let mut body = ImageRequest::default();
    while let Some(field) = multipart.next_field().await.map_err(ApiError::unreadable_form)? {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "imageDataUrl" => {
                body.image_data_url = field.text().await.map_err(ApiError::unreadable_form)?;
            }
            "image" | "file" => {
                let data = field.bytes().await.map_err(ApiError::unreadable_form)?;
                body.image_data_url = encode::image_bytes_to_data_url(&data)?;
            }
            "direction" => {
                body.direction = Some(field.text().await.map_err(ApiError::unreadable_form)?);
            }
            "chartType" => {
                body.chart_type = Some(field.text().await.map_err(ApiError::unreadable_form)?);
            }
            other => debug!("Ignoring form field '{}'", other),
        }
    }
    Ok(body)
}

/// GET /healthz
async fn healthz(State(state): State<AppState>) -> Json<serde_json::Value> {
    let orchestrator = &state.orchestrator;
    Json(serde_json::json!({
        "status": "ok",
        "backend": orchestrator.has_backend(),
        "cache": orchestrator.cache().stats(),
    }))
}
