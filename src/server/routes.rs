//! HTTP route handlers: run control, credentials, documents.

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{delete, get, post};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::LoomError;
use crate::server::error::HttpError;
use crate::server::sse;
use crate::server::state::AppState;
use crate::storage::DocumentInfo;

/// Build the router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/generate", get(sse::generate_handler))
        .route("/stop", post(stop))
        .route("/set_token", post(set_token))
        .route("/api/token", get(token_status))
        .route("/api/models", get(models))
        .route("/api/save_models", post(save_models))
        .route("/api/documents", get(list_documents))
        .route("/api/documents/save", post(save_document))
        .route("/api/documents/load/{name}", get(load_document))
        .route("/api/documents/rename", post(rename_document))
        .route("/api/documents/delete/{name}", delete(delete_document))
}

async fn health() -> &'static str {
    "ok"
}

/// POST /stop - cancel the active run, if any.
async fn stop(State(state): State<AppState>) -> StatusCode {
    if !state.stop_run() {
        info!("stop requested with no active run");
    }
    StatusCode::NO_CONTENT
}

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenStatus {
    pub configured: bool,
}

async fn set_token(State(state): State<AppState>, Json(body): Json<TokenRequest>) -> Result<StatusCode, HttpError> {
    let token = body.token.trim();
    if token.is_empty() {
        return Err(HttpError::bad_request("token must not be empty"));
    }
    state.set_api_key(token)?;
    info!("API token updated");
    Ok(StatusCode::NO_CONTENT)
}

async fn token_status(State(state): State<AppState>) -> Json<TokenStatus> {
    Json(TokenStatus {
        configured: state.has_api_key(),
    })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModelsResponse {
    pub generation_model: String,
    pub grading_model: String,
}

async fn models(State(state): State<AppState>) -> Json<ModelsResponse> {
    let generation = state.config().generation;
    Json(ModelsResponse {
        generation_model: generation.generation_model,
        grading_model: generation.grading_model,
    })
}

/// Either model may be omitted to keep the current one
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SaveModelsRequest {
    #[serde(default)]
    pub base_model: Option<String>,
    #[serde(default)]
    pub grader_model: Option<String>,
}

/// POST /api/save_models - becomes the default for later runs.
async fn save_models(
    State(state): State<AppState>,
    Json(body): Json<SaveModelsRequest>,
) -> Result<StatusCode, HttpError> {
    state.save_models(body.base_model.as_deref(), body.grader_model.as_deref())?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/documents - newest first.
async fn list_documents(State(state): State<AppState>) -> Result<Json<Vec<DocumentInfo>>, HttpError> {
    Ok(Json(state.store.list()?))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SaveRequest {
    pub name: String,
    #[serde(default)]
    pub content: String,
}

async fn save_document(State(state): State<AppState>, Json(body): Json<SaveRequest>) -> Result<StatusCode, HttpError> {
    state.store.save(body.name.trim(), &body.content)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DocumentBody {
    pub name: String,
    pub content: String,
}

async fn load_document(State(state): State<AppState>, Path(name): Path<String>) -> Result<Json<DocumentBody>, HttpError> {
    let content = state.store.load(&name)?.ok_or_else(|| LoomError::DocumentNotFound(name.clone()))?;
    Ok(Json(DocumentBody { name, content }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RenameRequest {
    pub old_name: String,
    pub new_name: String,
}

async fn rename_document(
    State(state): State<AppState>,
    Json(body): Json<RenameRequest>,
) -> Result<StatusCode, HttpError> {
    state.store.rename(body.old_name.trim(), body.new_name.trim())?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_document(State(state): State<AppState>, Path(name): Path<String>) -> Result<StatusCode, HttpError> {
    state.store.delete(&name)?;
    Ok(StatusCode::NO_CONTENT)
}
