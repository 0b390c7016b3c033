use std::pin::Pin;

use bytes::Bytes;
use futures_util::Stream;
use tokio::sync::oneshot;

use crate::error::ForwardError;

/// Which upstream protocol family a request targets. The orchestrator
/// selects a variant once per request and stays upstream-agnostic from
/// then on (spec §9 "capability set / tagged variant" note).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderFamily {
    Gemini,
    OpenAi,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct UsageTokens {
    pub prompt_tokens: Option<i64>,
    pub completion_tokens: Option<i64>,
    pub total_tokens: Option<i64>,
}

/// One inbound-request descriptor's family-agnostic payload. `body` already
/// carries upstream field names; the family implementation folds in any
/// protocol-specific pre-processing (thinking_config, seed removal, gateway
/// model prefixing) before serializing it.
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    pub model_id: String,
    pub stream: bool,
    pub body: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct UnaryResponse {
    pub body: serde_json::Value,
    pub usage: UsageTokens,
}

/// A live streaming response. `frames` yields each SSE frame already framed
/// as `data: <payload>\n\n`, in source order, to be teed straight to the
/// caller. `outcome` resolves once the body is fully drained: `Ok(usage)` if
/// a terminal signal was observed, `Err(StreamingCompletion)` otherwise.
pub struct ForwardStream {
    pub frames: Pin<Box<dyn Stream<Item = Bytes> + Send>>,
    pub outcome: oneshot::Receiver<Result<UsageTokens, ForwardError>>,
}
