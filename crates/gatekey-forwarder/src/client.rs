use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use futures_util::{StreamExt, stream};
use gatekey_common::GatewayConfig;
use tokio::sync::oneshot;
use wreq::Client;

use crate::error::{ForwardError, ForwardResult};
use crate::family::{FamilyOps, GeminiFamily, OpenAiFamily};
use crate::model::{ForwardRequest, ForwardStream, ProviderFamily, UnaryResponse, UsageTokens};
use crate::sse::SseParser;

static GEMINI: GeminiFamily = GeminiFamily;
static OPENAI: OpenAiFamily = OpenAiFamily;

fn family_ops(family: ProviderFamily) -> &'static dyn FamilyOps {
    match family {
        ProviderFamily::Gemini => &GEMINI,
        ProviderFamily::OpenAi => &OPENAI,
    }
}

/// Sends forwarded requests upstream over `wreq`, one client per base URL so
/// connection pools are reused across keys and requests (grounded on
/// `WreqUpstreamClient`'s per-proxy client cache).
#[derive(Clone)]
pub struct GatewayForwarder {
    config: GatewayConfig,
    clients: std::sync::Arc<Mutex<HashMap<String, Client>>>,
}

impl GatewayForwarder {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            clients: std::sync::Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn base_url(&self, family: ProviderFamily) -> &str {
        match family {
            ProviderFamily::Gemini => &self.config.gemini_api_base_url,
            ProviderFamily::OpenAi => &self.config.openai_api_base_url,
        }
    }

    pub fn base_url_for(&self, family: ProviderFamily) -> &str {
        self.base_url(family)
    }

    /// `cf-aig-authorization` header added to every dispatch when the
    /// request is routed through a Cloudflare AI Gateway front door.
    fn gateway_header(&self) -> Option<(&'static str, String)> {
        if !self.config.cloudflare_gateway_enabled {
            return None;
        }
        self.config
            .cf_ai_authorization_key
            .as_ref()
            .map(|key| ("cf-aig-authorization", key.clone()))
    }

    fn client_for(&self, base_url: &str) -> ForwardResult<Client> {
        let mut guard = self
            .clients
            .lock()
            .map_err(|_| ForwardError::Unexpected("client cache lock poisoned".to_string()))?;
        if let Some(client) = guard.get(base_url) {
            return Ok(client.clone());
        }
        let client = build_client(&self.config)
            .map_err(|err| ForwardError::Transport(err.to_string()))?;
        guard.insert(base_url.to_string(), client.clone());
        Ok(client)
    }

    /// Drops the cached client for `base_url`, forcing a fresh TCP/TLS
    /// connection on the next request. Called by the orchestrator after a
    /// transport-level failure, since a stale connection is a plausible
    /// cause and wreq otherwise keeps reusing it.
    pub fn recycle_client(&self, base_url: &str) {
        if let Ok(mut guard) = self.clients.lock() {
            guard.remove(base_url);
        }
    }

    pub async fn send_unary(
        &self,
        family: ProviderFamily,
        secret: &str,
        request: ForwardRequest,
    ) -> ForwardResult<UnaryResponse> {
        let ops = family_ops(family);
        let (client, url) = self.prepare_dispatch(family, false, &request)?;
        let mut body = request.body;
        ops.prepare_body(&mut body, &request.model_id, false, &self.config);
        let (header_name, header_value) = ops.auth_header(secret);

        let mut builder = client.post(&url).header(header_name, header_value).json(&body);
        if let Some((name, value)) = self.gateway_header() {
            builder = builder.header(name, value);
        }
        let response = builder.send().await.map_err(transport_error)?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            return Err(ForwardError::Http { status, body });
        }

        let body: serde_json::Value = response.json().await.map_err(transport_error)?;
        let usage = ops.extract_usage_unary(&body);
        Ok(UnaryResponse { body, usage })
    }

    pub async fn send_stream(
        &self,
        family: ProviderFamily,
        secret: &str,
        request: ForwardRequest,
    ) -> ForwardResult<ForwardStream> {
        let ops = family_ops(family);
        let (client, url) = self.prepare_dispatch(family, true, &request)?;
        let mut body = request.body;
        ops.prepare_body(&mut body, &request.model_id, true, &self.config);
        let (header_name, header_value) = ops.auth_header(secret);

        let mut builder = client.post(&url).header(header_name, header_value).json(&body);
        if let Some((name, value)) = self.gateway_header() {
            builder = builder.header(name, value);
        }
        let response = builder.send().await.map_err(transport_error)?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            return Err(ForwardError::Http { status, body });
        }

        let idle_timeout = Duration::from_secs(self.config.request_timeout_seconds.max(1));
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let (frame_tx, frame_rx) = tokio::sync::mpsc::channel::<bytes::Bytes>(16);

        tokio::spawn(drive_stream(response, family, idle_timeout, frame_tx, outcome_tx));

        let frames = stream::unfold(frame_rx, |mut rx| async move {
            rx.recv().await.map(|frame| (frame, rx))
        });

        Ok(ForwardStream {
            frames: Box::pin(frames),
            outcome: outcome_rx,
        })
    }

    fn prepare_dispatch(
        &self,
        family: ProviderFamily,
        stream: bool,
        request: &ForwardRequest,
    ) -> ForwardResult<(Client, String)> {
        let ops = family_ops(family);
        let base_url = self.base_url(family);
        let client = self.client_for(base_url)?;
        let path = ops.path_for(&request.model_id, stream);
        let mut url = format!("{base_url}{path}");
        if let Some(query) = ops.stream_query() {
            url.push(if url.contains('?') { '&' } else { '?' });
            url.push_str(query);
        }
        Ok((client, url))
    }
}

async fn drive_stream(
    response: wreq::Response,
    family: ProviderFamily,
    idle_timeout: Duration,
    frame_tx: tokio::sync::mpsc::Sender<bytes::Bytes>,
    outcome_tx: oneshot::Sender<Result<UsageTokens, ForwardError>>,
) {
    let ops = family_ops(family);
    let mut parser = SseParser::new();
    let mut body = response.bytes_stream();
    let mut saw_terminal = false;
    let mut latest_usage = None;

    loop {
        let next = match tokio::time::timeout(idle_timeout, body.next()).await {
            Ok(next) => next,
            Err(_) => break,
        };
        let Some(item) = next else { break };
        let Ok(chunk) = item else { break };
        if !emit_frames(parser.push_bytes(&chunk), ops, &frame_tx, &mut saw_terminal, &mut latest_usage).await {
            return;
        }
    }
    emit_frames(parser.finish(), ops, &frame_tx, &mut saw_terminal, &mut latest_usage).await;

    let outcome = if saw_terminal {
        Ok(latest_usage.unwrap_or_default())
    } else {
        Err(ForwardError::StreamingCompletion)
    };
    let _ = outcome_tx.send(outcome);
}

/// Forwards decoded frames to the caller, tracking whether the protocol's
/// terminal signal was seen and the most recent usage data separately: for
/// OpenAI these arrive on two different frames (the `finish_reason:"stop"`
/// chunk, then a later `choices: []` chunk carrying `usage` once
/// `include_usage` is forced). Returns `false` if the caller has dropped its
/// receiver and the stream should stop.
async fn emit_frames(
    frames: Vec<crate::sse::SseFrame>,
    ops: &dyn FamilyOps,
    frame_tx: &tokio::sync::mpsc::Sender<bytes::Bytes>,
    saw_terminal: &mut bool,
    latest_usage: &mut Option<UsageTokens>,
) -> bool {
    for frame in frames {
        if frame.data == "[DONE]" {
            continue;
        }
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&frame.data) {
            if ops.is_terminal_frame(&value) {
                *saw_terminal = true;
            }
            if let Some(usage) = ops.frame_usage(&value) {
                *latest_usage = Some(usage);
            }
        }
        let wire = bytes::Bytes::from(format!("data: {}\n\n", frame.data));
        if frame_tx.send(wire).await.is_err() {
            return false;
        }
    }
    true
}

fn build_client(config: &GatewayConfig) -> Result<Client, wreq::Error> {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(config.request_timeout_seconds.max(1)))
        .build()
}

fn transport_error(err: wreq::Error) -> ForwardError {
    ForwardError::Transport(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepare_dispatch_builds_gemini_stream_query() {
        let forwarder = GatewayForwarder::new(GatewayConfig::default());
        let request = ForwardRequest {
            model_id: "gemini-2.0-flash".to_string(),
            stream: true,
            body: serde_json::json!({}),
        };
        let (_, url) = forwarder.prepare_dispatch(ProviderFamily::Gemini, true, &request).unwrap();
        assert!(url.ends_with(":streamGenerateContent?alt=sse"));
    }

    #[test]
    fn prepare_dispatch_builds_openai_chat_completions() {
        let forwarder = GatewayForwarder::new(GatewayConfig::default());
        let request = ForwardRequest {
            model_id: "gpt-4o".to_string(),
            stream: false,
            body: serde_json::json!({}),
        };
        let (_, url) = forwarder.prepare_dispatch(ProviderFamily::OpenAi, false, &request).unwrap();
        assert!(url.ends_with("/chat/completions"));
    }

    #[test]
    fn recycle_client_evicts_cached_entry() {
        let forwarder = GatewayForwarder::new(GatewayConfig::default());
        let base_url = forwarder.base_url(ProviderFamily::Gemini).to_string();
        forwarder.client_for(&base_url).unwrap();
        assert!(forwarder.clients.lock().unwrap().contains_key(&base_url));
        forwarder.recycle_client(&base_url);
        assert!(!forwarder.clients.lock().unwrap().contains_key(&base_url));
    }
}
