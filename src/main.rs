//! snapcode - turn a photo of code into runnable code.
//!
//! Upload an image, OCR it, let an LLM correct the recognised text, then run
//! the result in a sandboxed interpreter.

mod config;
mod correction;
mod error;
mod intake;
mod ocr;
mod openrouter;
mod sandbox;
mod session;
#[cfg(test)]
mod test_support;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use config::AppConfig;
use correction::{Corrector, LlmCorrector};
use error::ApiError;
use intake::UploadedImage;
use ocr::{ocr_space::OcrSpaceProvider, OcrProvider};
use openrouter::OpenRouterClient;
use sandbox::Sandbox;
use session::{SessionStore, SessionView};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    sessions: SessionStore,
    ocr: Arc<dyn OcrProvider>,
    corrector: Arc<dyn Corrector>,
    sandbox: Arc<Sandbox>,
}

impl AppState {
    fn view(&self, session: &session::Session) -> SessionView {
        session.view(self.sandbox.language())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "snapcode=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::load()?;
    if config.ocr_api_key().is_empty() {
        warn!("OCR API key is empty; OCR requests will be rejected upstream");
    }
    if config.llm_api_key().is_empty() {
        warn!("LLM API key is empty; correction requests will be rejected upstream");
    }

    let http = reqwest::Client::new();
    let ocr = OcrSpaceProvider::new(http.clone(), config.ocr.clone(), config.ocr_api_key());
    let llm = OpenRouterClient::new(http, config.llm.clone(), config.llm_api_key());
    info!("OCR provider: {}, LLM model: {}", ocr.name(), llm.model());

    let state = AppState {
        sessions: SessionStore::new(Duration::from_secs(config.session.idle_timeout_secs)),
        ocr: Arc::new(ocr),
        corrector: Arc::new(LlmCorrector::new(llm)),
        sandbox: Arc::new(Sandbox::new(config.sandbox.clone())),
    };

    let app = build_router(state, config.server.max_upload_bytes);

    // Run server
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!("Server listening on http://{}", config.server.bind);
    axum::serve(listener, app).await?;

    Ok(())
}

fn build_router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/sessions", post(create_session))
        .route("/sessions/:id", get(get_session).delete(end_session))
        .route("/sessions/:id/image", post(upload_image).get(get_image))
        .route("/sessions/:id/enhance", post(enhance_code))
        .route("/sessions/:id/execute", post(execute_code))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

/// Start a session.
async fn create_session(State(state): State<AppState>) -> (StatusCode, Json<SessionView>) {
    let session = state.sessions.create();
    info!("Session started: {} ({} active)", session.id, state.sessions.len());
    (StatusCode::CREATED, Json(state.view(&session)))
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, ApiError> {
    let view = state
        .sessions
        .with(&id, |s| state.view(s))
        .ok_or(ApiError::SessionNotFound(id))?;
    Ok(Json(view))
}

/// End a session and drop its state.
async fn end_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if state.sessions.remove(&id) {
        info!("Session ended: {}", id);
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::SessionNotFound(id))
    }
}

/// Upload an image and run OCR on it.
async fn upload_image(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<Json<SessionView>, ApiError> {
    state
        .sessions
        .with(&id, |_| ())
        .ok_or(ApiError::SessionNotFound(id))?;

    let mut upload = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some("file") {
            let filename = field.file_name().map(str::to_string);
            let declared = field.content_type().map(str::to_string);
            let data = field.bytes().await?.to_vec();
            upload = Some((filename, declared, data));
            break;
        }
    }

    let (filename, declared, data) =
        upload.ok_or_else(|| ApiError::BadRequest("No file uploaded".to_string()))?;
    let image = UploadedImage::from_upload(filename.as_deref(), declared.as_deref(), data)?;

    info!(
        "Received image: {} ({} bytes, {}) for session {}",
        image.filename,
        image.size(),
        image.mime,
        id
    );

    let extracted = state.ocr.extract_text(&image).await;
    match &extracted {
        Ok(text) => info!("OCR extracted {} chars", text.len()),
        Err(e) => warn!("OCR failed ({:?}): {}", e.kind(), e),
    }

    let view = state
        .sessions
        .update(&id, |s| {
            s.set_upload(image, extracted);
            state.view(s)
        })
        .ok_or(ApiError::SessionNotFound(id))?;
    Ok(Json(view))
}

/// Return the uploaded image bytes for preview.
async fn get_image(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let (mime, data) = state
        .sessions
        .with(&id, |s| s.image.as_ref().map(|img| (img.mime, img.data.clone())))
        .ok_or(ApiError::SessionNotFound(id))?
        .ok_or(ApiError::NoImage(id))?;
    Ok(([(header::CONTENT_TYPE, mime)], data))
}

/// "Enhance Code": ask the corrector to fix the extracted text.
async fn enhance_code(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, ApiError> {
    let text = state
        .sessions
        .with(&id, |s| s.correctable_text().map(str::to_string))
        .ok_or(ApiError::SessionNotFound(id))?
        .ok_or_else(|| ApiError::Conflict("No extracted text to correct".to_string()))?;

    let corrected = state.corrector.correct(&text).await;
    match &corrected {
        Ok(code) => info!("{} corrector returned {} chars", state.corrector.name(), code.len()),
        Err(e) => warn!("Correction failed ({:?}): {}", e.kind(), e),
    }

    let view = state
        .sessions
        .update(&id, |s| {
            s.set_correction(corrected);
            state.view(s)
        })
        .ok_or(ApiError::SessionNotFound(id))?;
    Ok(Json(view))
}

/// "Execute Code": run the corrected code in the sandbox.
async fn execute_code(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, ApiError> {
    let code = state
        .sessions
        .with(&id, |s| s.executable_code().map(str::to_string))
        .ok_or(ApiError::SessionNotFound(id))?
        .ok_or_else(|| ApiError::Conflict("No corrected code to execute".to_string()))?;

    let output = state.sandbox.run(&code).await;
    if let Err(e) = &output {
        warn!("Execution failed: {}", e);
    }

    let view = state
        .sessions
        .update(&id, |s| {
            s.set_execution(output);
            state.view(s)
        })
        .ok_or(ApiError::SessionNotFound(id))?;
    Ok(Json(view))
}
