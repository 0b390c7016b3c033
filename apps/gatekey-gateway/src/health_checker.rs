use async_trait::async_trait;
use gatekey_forwarder::{ForwardRequest, GatewayForwarder, ProviderFamily};
use gatekey_keystore::UpstreamKey;
use gatekey_scheduler::HealthChecker;

/// Liveness probe for cooled-down keys: a trivial Gemini `generateContent`
/// call against the cheapest model. All upstream keys in this pool are
/// Gemini keys regardless of which downstream route accepted the request
/// (the OpenAI-compatible surface forwards to Gemini under the hood), so a
/// Gemini-only probe is sufficient to validate any key in the pool.
pub struct GeminiHealthChecker {
    forwarder: GatewayForwarder,
}

impl GeminiHealthChecker {
    pub fn new(forwarder: GatewayForwarder) -> Self {
        Self { forwarder }
    }
}

#[async_trait]
impl HealthChecker for GeminiHealthChecker {
    async fn check(&self, key: &UpstreamKey) -> bool {
        let request = ForwardRequest {
            model_id: "gemini-2.5-flash-lite".to_string(),
            stream: false,
            body: serde_json::json!({
                "contents": [{"role": "user", "parts": [{"text": "ping"}]}],
            }),
        };
        self.forwarder
            .send_unary(ProviderFamily::Gemini, &key.secret, request)
            .await
            .is_ok()
    }
}
