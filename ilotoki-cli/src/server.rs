//! HTTP API over a shared [`Translator`]

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use ilotoki_app::{Form, Translator, TranslatorError};
use ilotoki_engine::Language;
use ilotoki_engine::model::{AcquisitionState, ModelLoader, Phase};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

/// Largest accepted request body.
pub const BODY_LIMIT: usize = 64 * 1024;

struct AppState<L: ModelLoader> {
    translator: Arc<Translator<L>>,
}

impl<L: ModelLoader> Clone for AppState<L> {
    fn clone(&self) -> Self {
        Self {
            translator: Arc::clone(&self.translator),
        }
    }
}

#[derive(Debug, Serialize)]
struct StateResponse {
    phase: Phase,
    status: String,
    model: String,
    /// Whole percent while downloading with a known size
    #[serde(skip_serializing_if = "Option::is_none")]
    progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    size_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl StateResponse {
    fn of<L: ModelLoader>(translator: &Translator<L>) -> Self {
        let state = translator.state();
        let progress = state.progress();
        Self {
            phase: state.phase(),
            status: state.status_line(),
            model: translator.acquirer().asset().id.clone(),
            progress: progress.and_then(|p| p.percent()),
            size_text: progress.and_then(|p| p.size_text()),
            error: state.error().map(str::to_string),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TranslateRequest {
    query: String,
    /// Defaults to the server's current language
    #[serde(default)]
    language: Option<Language>,
    /// Defaults to the server's current direction
    #[serde(default)]
    from_toki_pona: Option<bool>,
}

#[derive(Debug, Serialize)]
struct TranslateResponse {
    text: String,
    source: String,
    target: String,
    fragments: usize,
}

/// Build the API router. Acquisition must be started separately.
pub fn router<L: ModelLoader>(translator: Arc<Translator<L>>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/state", get(state_handler::<L>))
        .route("/api/retry", post(retry_handler::<L>))
        .route("/api/translate", post(translate_handler::<L>))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(cors)
        .with_state(AppState { translator })
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "ilotoki"
    }))
}

async fn state_handler<L: ModelLoader>(State(state): State<AppState<L>>) -> impl IntoResponse {
    Json(StateResponse::of(&state.translator))
}

/// Restart acquisition when idle or after a terminal failure.
///
/// 409 while a run is still in flight, including the automatic retry.
async fn retry_handler<L: ModelLoader>(State(state): State<AppState<L>>) -> impl IntoResponse {
    let translator = &state.translator;
    let started = match translator.state() {
        AcquisitionState::Idle => translator.start(),
        AcquisitionState::Failed {
            retrying: false, ..
        } => {
            tracing::info!("Retrying model acquisition on request");
            translator.retry()
        }
        _ => false,
    };
    let status = if started {
        StatusCode::ACCEPTED
    } else {
        StatusCode::CONFLICT
    };
    (status, Json(StateResponse::of(translator)))
}

async fn translate_handler<L: ModelLoader>(
    State(state): State<AppState<L>>,
    Json(req): Json<TranslateRequest>,
) -> Result<Json<TranslateResponse>, (StatusCode, String)> {
    let current = state.translator.form();
    let form = Form {
        query: req.query,
        from_toki_pona: req.from_toki_pona.unwrap_or(current.from_toki_pona),
        language: req.language.unwrap_or(current.language),
    };
    let request = form.request();

    let started = std::time::Instant::now();
    match state.translator.submit(form, |_| {}).await {
        Ok(result) => {
            tracing::debug!(
                "Translated {} -> {} in {:.1}ms",
                request.source(),
                request.target(),
                started.elapsed().as_secs_f64() * 1000.0
            );
            Ok(Json(TranslateResponse {
                text: result.text().to_string(),
                source: request.source().to_string(),
                target: request.target().to_string(),
                fragments: result.fragments().len(),
            }))
        }
        Err(e @ TranslatorError::Busy) => Err((StatusCode::CONFLICT, e.to_string())),
    }
}
