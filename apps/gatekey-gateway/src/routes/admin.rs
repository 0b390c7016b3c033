use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::state::AppState;

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/status", get(status))
        .route("/counts", get(counts))
        .route("/keys", post(add_key))
        .route("/keys/{identifier}", delete(delete_key))
        .route("/keys/{identifier}/reset", post(reset_key))
        .route("/keys/reset-all", post(reset_all_keys))
        .layer(middleware::from_fn_with_state(state, admin_auth))
}

async fn admin_auth(State(state): State<AppState>, headers: HeaderMap, req: axum::http::Request<axum::body::Body>, next: Next) -> Result<Response, StatusCode> {
    let key = extract_admin_key(&headers).ok_or(StatusCode::UNAUTHORIZED)?;
    if key != *state.admin_key {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

fn extract_admin_key(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get("x-admin-key")
        && let Ok(s) = value.to_str()
    {
        let s = s.trim();
        if !s.is_empty() {
            return Some(s.to_string());
        }
    }
    if let Some(value) = headers.get(header::AUTHORIZATION)
        && let Ok(auth) = value.to_str()
    {
        let auth = auth.trim();
        let prefix = "Bearer ";
        if auth.len() > prefix.len() && auth[..prefix.len()].eq_ignore_ascii_case(prefix) {
            let token = auth[prefix.len()..].trim();
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }
    None
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    match state.scheduler.status().await {
        Ok(status) => Json(status).into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({"error": err.to_string()}))).into_response(),
    }
}

async fn counts(State(state): State<AppState>) -> impl IntoResponse {
    match state.scheduler.counts().await {
        Ok(counts) => Json(counts).into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({"error": err.to_string()}))).into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct AddKeyBody {
    secret: String,
}

async fn add_key(State(state): State<AppState>, Json(body): Json<AddKeyBody>) -> impl IntoResponse {
    match state.scheduler.add_key(&body.secret).await {
        Ok(identifier) => (StatusCode::CREATED, Json(serde_json::json!({"identifier": identifier}))).into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({"error": err.to_string()}))).into_response(),
    }
}

async fn delete_key(State(state): State<AppState>, Path(identifier): Path<String>) -> impl IntoResponse {
    match state.scheduler.delete_key(&identifier).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({"error": err.to_string()}))).into_response(),
    }
}

async fn reset_key(State(state): State<AppState>, Path(identifier): Path<String>) -> impl IntoResponse {
    match state.scheduler.reset_key(&identifier).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({"error": err.to_string()}))).into_response(),
    }
}

async fn reset_all_keys(State(state): State<AppState>) -> impl IntoResponse {
    match state.scheduler.reset_all_keys().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({"error": err.to_string()}))).into_response(),
    }
}
