use gatekey_common::GatewayConfig;
use serde_json::{Value, json};

use crate::model::UsageTokens;

/// The capability set each upstream family implements. Kept as a plain
/// trait object behind the tagged `ProviderFamily` enum (spec §9) rather
/// than generics, so `GatewayForwarder` can hold both variants without the
/// orchestrator ever naming a concrete family type.
pub trait FamilyOps: Send + Sync {
    fn path_for(&self, model_id: &str, stream: bool) -> String;
    fn stream_query(&self) -> Option<&'static str>;
    fn auth_header(&self, secret: &str) -> (&'static str, String);
    fn prepare_body(&self, req: &mut Value, model_id: &str, stream: bool, cfg: &GatewayConfig);
    fn extract_usage_unary(&self, body: &Value) -> UsageTokens;
    /// Whether this frame carries the protocol's terminal signal
    /// (Gemini `finishReason=="STOP"`, OpenAI `finish_reason=="stop"`).
    fn is_terminal_frame(&self, frame: &Value) -> bool;
    /// `Some(usage)` iff this frame itself carries usage data. Kept
    /// independent of `is_terminal_frame`: OpenAI's forced
    /// `stream_options.include_usage` delivers token counts in a final
    /// `choices: []` frame sent *after* the `finish_reason:"stop"` frame, so
    /// the frame that signals completion and the frame that carries usage
    /// are not the same frame.
    fn frame_usage(&self, frame: &Value) -> Option<UsageTokens>;
}

pub struct GeminiFamily;

impl FamilyOps for GeminiFamily {
    fn path_for(&self, model_id: &str, stream: bool) -> String {
        let action = if stream { "streamGenerateContent" } else { "generateContent" };
        format!("/v1beta/models/{model_id}:{action}")
    }

    fn stream_query(&self) -> Option<&'static str> {
        Some("alt=sse")
    }

    fn auth_header(&self, secret: &str) -> (&'static str, String) {
        ("x-goog-api-key", secret.to_string())
    }

    fn prepare_body(&self, _req: &mut Value, _model_id: &str, _stream: bool, _cfg: &GatewayConfig) {
        // Gemini's wire shape needs no pre-processing beyond pass-through.
    }

    fn extract_usage_unary(&self, body: &Value) -> UsageTokens {
        usage_from_gemini(body)
    }

    fn is_terminal_frame(&self, frame: &Value) -> bool {
        frame
            .get("candidates")
            .and_then(Value::as_array)
            .is_some_and(|candidates| {
                candidates
                    .iter()
                    .any(|c| c.get("finishReason").and_then(Value::as_str) == Some("STOP"))
            })
    }

    fn frame_usage(&self, frame: &Value) -> Option<UsageTokens> {
        frame.get("usageMetadata").map(|_| usage_from_gemini(frame))
    }
}

fn usage_from_gemini(body: &Value) -> UsageTokens {
    let Some(usage) = body.get("usageMetadata") else {
        return UsageTokens::default();
    };
    UsageTokens {
        prompt_tokens: usage.get("promptTokenCount").and_then(Value::as_i64),
        completion_tokens: usage.get("candidatesTokenCount").and_then(Value::as_i64),
        total_tokens: usage.get("totalTokenCount").and_then(Value::as_i64),
    }
}

pub struct OpenAiFamily;

impl FamilyOps for OpenAiFamily {
    fn path_for(&self, _model_id: &str, _stream: bool) -> String {
        "/chat/completions".to_string()
    }

    fn stream_query(&self) -> Option<&'static str> {
        None
    }

    fn auth_header(&self, secret: &str) -> (&'static str, String) {
        ("Authorization", format!("Bearer {secret}"))
    }

    fn prepare_body(&self, req: &mut Value, _model_id: &str, stream: bool, cfg: &GatewayConfig) {
        let Some(obj) = req.as_object_mut() else {
            return;
        };

        fold_thinking_config(obj);
        obj.remove("seed");

        if stream {
            let options = obj
                .entry("stream_options")
                .or_insert_with(|| json!({}));
            if let Some(options) = options.as_object_mut() {
                options.insert("include_usage".to_string(), json!(true));
            }
        }

        if cfg.cloudflare_gateway_enabled
            && let Some(Value::String(model)) = obj.get("model").cloned()
        {
            obj.insert("model".to_string(), json!(format!("google-ai-studio/{model}")));
        }
    }

    fn extract_usage_unary(&self, body: &Value) -> UsageTokens {
        usage_from_openai(body)
    }

    fn is_terminal_frame(&self, frame: &Value) -> bool {
        frame
            .get("choices")
            .and_then(Value::as_array)
            .is_some_and(|choices| {
                choices
                    .iter()
                    .any(|c| c.get("finish_reason").and_then(Value::as_str) == Some("stop"))
            })
    }

    fn frame_usage(&self, frame: &Value) -> Option<UsageTokens> {
        frame.get("usage").filter(|u| !u.is_null()).map(|_| usage_from_openai(frame))
    }
}

/// Folds `include_thoughts` / `thinking_budget` top-level fields into
/// `extra_body.google.thinking_config`, removing the originals (spec §4.C
/// step 5; grounded on `_handle_thinking_config` in the original source).
fn fold_thinking_config(obj: &mut serde_json::Map<String, Value>) {
    let include_thoughts = obj.remove("include_thoughts");
    let thinking_budget = obj.remove("thinking_budget");
    if include_thoughts.is_none() && thinking_budget.is_none() {
        return;
    }

    let extra_body = obj
        .entry("extra_body")
        .or_insert_with(|| json!({}))
        .as_object_mut()
        .expect("extra_body is always an object once inserted");
    let google = extra_body
        .entry("google")
        .or_insert_with(|| json!({}))
        .as_object_mut()
        .expect("google is always an object once inserted");
    let thinking_config = google
        .entry("thinking_config")
        .or_insert_with(|| json!({}))
        .as_object_mut()
        .expect("thinking_config is always an object once inserted");

    if let Some(value) = include_thoughts {
        thinking_config.insert("include_thoughts".to_string(), value);
    }
    if let Some(value) = thinking_budget {
        thinking_config.insert("thinking_budget".to_string(), value);
    }
}

fn usage_from_openai(body: &Value) -> UsageTokens {
    let Some(usage) = body.get("usage") else {
        return UsageTokens::default();
    };
    UsageTokens {
        prompt_tokens: usage.get("prompt_tokens").and_then(Value::as_i64),
        completion_tokens: usage.get("completion_tokens").and_then(Value::as_i64),
        total_tokens: usage.get("total_tokens").and_then(Value::as_i64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cfg() -> GatewayConfig {
        GatewayConfig::default()
    }

    #[test]
    fn gemini_url_switches_on_stream() {
        let family = GeminiFamily;
        assert_eq!(family.path_for("gemini-2.0-flash", false), "/v1beta/models/gemini-2.0-flash:generateContent");
        assert_eq!(
            family.path_for("gemini-2.0-flash", true),
            "/v1beta/models/gemini-2.0-flash:streamGenerateContent"
        );
    }

    #[test]
    fn gemini_terminal_signal_requires_stop() {
        let family = GeminiFamily;
        let non_terminal = json!({"candidates": [{"finishReason": "MAX_TOKENS"}]});
        assert!(!family.is_terminal_frame(&non_terminal));

        let terminal = json!({
            "candidates": [{"finishReason": "STOP"}],
            "usageMetadata": {"promptTokenCount": 3, "candidatesTokenCount": 5, "totalTokenCount": 8}
        });
        assert!(family.is_terminal_frame(&terminal));
        let usage = family.frame_usage(&terminal).expect("usage present on the terminal frame");
        assert_eq!(usage.total_tokens, Some(8));
    }

    #[test]
    fn openai_terminal_signal_and_usage_arrive_on_different_frames() {
        let family = OpenAiFamily;
        // `include_usage` delivers the final chunk (`choices: []`, token
        // counts) strictly after the `finish_reason:"stop"` chunk; the two
        // must be tracked independently rather than read off one frame.
        let stop_frame = json!({"choices": [{"finish_reason": "stop"}], "usage": null});
        assert!(family.is_terminal_frame(&stop_frame));
        assert!(family.frame_usage(&stop_frame).is_none());

        let usage_frame = json!({"choices": [], "usage": {"prompt_tokens": 1, "completion_tokens": 2, "total_tokens": 3}});
        assert!(!family.is_terminal_frame(&usage_frame));
        let usage = family.frame_usage(&usage_frame).expect("usage frame carries usage");
        assert_eq!(usage.total_tokens, Some(3));
    }

    #[test]
    fn openai_folds_thinking_fields_and_drops_seed() {
        let family = OpenAiFamily;
        let mut body = json!({
            "model": "gpt-4o",
            "seed": 7,
            "include_thoughts": true,
            "thinking_budget": 1024,
        });
        family.prepare_body(&mut body, "gpt-4o", false, &cfg());
        assert!(body.get("seed").is_none());
        assert!(body.get("include_thoughts").is_none());
        assert!(body.get("thinking_budget").is_none());
        assert_eq!(body["extra_body"]["google"]["thinking_config"]["include_thoughts"], json!(true));
        assert_eq!(body["extra_body"]["google"]["thinking_config"]["thinking_budget"], json!(1024));
    }

    #[test]
    fn openai_forces_stream_usage_and_prefixes_model_behind_gateway() {
        let family = OpenAiFamily;
        let mut cfg = cfg();
        cfg.cloudflare_gateway_enabled = true;
        let mut body = json!({"model": "gpt-4o"});
        family.prepare_body(&mut body, "gpt-4o", true, &cfg);
        assert_eq!(body["stream_options"]["include_usage"], json!(true));
        assert_eq!(body["model"], json!("google-ai-studio/gpt-4o"));
    }
}
