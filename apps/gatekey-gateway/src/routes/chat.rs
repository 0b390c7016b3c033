use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use futures_util::StreamExt;
use gatekey_forwarder::{ForwardRequest, ProviderFamily};
use gatekey_orchestrator::{HandleOutcome, RequestInfo};
use uuid::Uuid;

use crate::state::AppState;

/// The one downstream route the spec asks the demo binary to wire: a
/// tenant-authenticated, OpenAI `chat/completions`-shaped endpoint that
/// forwards through `RetryOrchestrator::handle`. Tenant authentication,
/// JWT login, and a dashboard are out of scope here and live elsewhere.
pub fn router() -> Router<AppState> {
    Router::new().route("/v1/chat/completions", post(chat_completions))
}

async fn chat_completions(State(state): State<AppState>, headers: HeaderMap, Json(body): Json<serde_json::Value>) -> Response {
    let model_id = body
        .get("model")
        .and_then(|v| v.as_str())
        .unwrap_or("gpt-4o-mini")
        .to_string();
    let stream = body.get("stream").and_then(|v| v.as_bool()).unwrap_or(false);
    let tenant_alias = headers
        .get("x-tenant-alias")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let info = RequestInfo {
        request_id: Uuid::new_v4().to_string(),
        tenant_alias,
        family: ProviderFamily::OpenAi,
    };
    let request = ForwardRequest { model_id, stream, body };

    match state.orchestrator.handle(info, request).await {
        Ok(HandleOutcome::Unary(response)) => Json(response.body).into_response(),
        Ok(HandleOutcome::Stream(frames)) => {
            let body = Body::from_stream(frames.map(Ok::<_, std::io::Error>));
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "text/event-stream")
                .body(body)
                .expect("static response builder never fails")
        }
        Err(err) => {
            let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, Json(serde_json::json!({"error": {"message": err.to_string()}}))).into_response()
        }
    }
}
