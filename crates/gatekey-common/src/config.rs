use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum GatewayConfigError {
    #[error("missing required gateway config field: {0}")]
    MissingField(&'static str),
}

/// Final, merged configuration used by the running process.
///
/// Merge order: CLI > ENV > defaults. Unlike the wider gateway's tenant and
/// listener configuration (owned elsewhere), this struct only carries the
/// fields the scheduler, forwarder and orchestrator actually read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub dsn: String,
    pub gemini_api_base_url: String,
    pub openai_api_base_url: String,
    pub api_key_cool_down_seconds: u64,
    pub api_key_failure_threshold: u32,
    pub max_cool_down_seconds: u64,
    pub rate_limit_default_wait_seconds: u64,
    pub max_retries: u32,
    pub no_key_wait_seconds: u64,
    pub request_timeout_seconds: u64,
    pub max_concurrent_requests: usize,
    pub concurrency_timeout_seconds: u64,
    pub key_in_use_timeout_seconds: u64,
    pub default_check_cooled_down_seconds: u64,
    pub check_health_after_cool_down: bool,
    pub check_health_time_interval_seconds: u64,
    pub cloudflare_gateway_enabled: bool,
    pub cf_ai_authorization_key: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            dsn: "sqlite://gatekey.db?mode=rwc".to_string(),
            gemini_api_base_url: "https://generativelanguage.googleapis.com".to_string(),
            openai_api_base_url: "https://api.openai.com".to_string(),
            api_key_cool_down_seconds: 300,
            api_key_failure_threshold: 3,
            max_cool_down_seconds: 3600 * 12,
            rate_limit_default_wait_seconds: 90,
            max_retries: 0,
            no_key_wait_seconds: 1,
            request_timeout_seconds: 600,
            max_concurrent_requests: 100,
            concurrency_timeout_seconds: 30,
            key_in_use_timeout_seconds: 300,
            default_check_cooled_down_seconds: 30,
            check_health_after_cool_down: false,
            check_health_time_interval_seconds: 60,
            cloudflare_gateway_enabled: false,
            cf_ai_authorization_key: None,
        }
    }
}

/// Overlay layer used while merging CLI/ENV fields onto defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GatewayConfigPatch {
    pub dsn: Option<String>,
    pub gemini_api_base_url: Option<String>,
    pub openai_api_base_url: Option<String>,
    pub api_key_cool_down_seconds: Option<u64>,
    pub api_key_failure_threshold: Option<u32>,
    pub max_cool_down_seconds: Option<u64>,
    pub rate_limit_default_wait_seconds: Option<u64>,
    pub max_retries: Option<u32>,
    pub no_key_wait_seconds: Option<u64>,
    pub request_timeout_seconds: Option<u64>,
    pub max_concurrent_requests: Option<usize>,
    pub concurrency_timeout_seconds: Option<u64>,
    pub key_in_use_timeout_seconds: Option<u64>,
    pub default_check_cooled_down_seconds: Option<u64>,
    pub check_health_after_cool_down: Option<bool>,
    pub check_health_time_interval_seconds: Option<u64>,
    pub cloudflare_gateway_enabled: Option<bool>,
    pub cf_ai_authorization_key: Option<String>,
}

impl GatewayConfigPatch {
    /// CLI/ENV-layer `other` wins field-by-field over whatever is already set.
    pub fn overlay(&mut self, other: GatewayConfigPatch) {
        macro_rules! take {
            ($field:ident) => {
                if other.$field.is_some() {
                    self.$field = other.$field;
                }
            };
        }
        take!(dsn);
        take!(gemini_api_base_url);
        take!(openai_api_base_url);
        take!(api_key_cool_down_seconds);
        take!(api_key_failure_threshold);
        take!(max_cool_down_seconds);
        take!(rate_limit_default_wait_seconds);
        take!(max_retries);
        take!(no_key_wait_seconds);
        take!(request_timeout_seconds);
        take!(max_concurrent_requests);
        take!(concurrency_timeout_seconds);
        take!(key_in_use_timeout_seconds);
        take!(default_check_cooled_down_seconds);
        take!(check_health_after_cool_down);
        take!(check_health_time_interval_seconds);
        take!(cloudflare_gateway_enabled);
        take!(cf_ai_authorization_key);
    }

    pub fn into_config(self) -> Result<GatewayConfig, GatewayConfigError> {
        let defaults = GatewayConfig::default();
        Ok(GatewayConfig {
            dsn: self.dsn.unwrap_or(defaults.dsn),
            gemini_api_base_url: self.gemini_api_base_url.unwrap_or(defaults.gemini_api_base_url),
            openai_api_base_url: self.openai_api_base_url.unwrap_or(defaults.openai_api_base_url),
            api_key_cool_down_seconds: self
                .api_key_cool_down_seconds
                .unwrap_or(defaults.api_key_cool_down_seconds),
            api_key_failure_threshold: self
                .api_key_failure_threshold
                .unwrap_or(defaults.api_key_failure_threshold),
            max_cool_down_seconds: self.max_cool_down_seconds.unwrap_or(defaults.max_cool_down_seconds),
            rate_limit_default_wait_seconds: self
                .rate_limit_default_wait_seconds
                .unwrap_or(defaults.rate_limit_default_wait_seconds),
            max_retries: self.max_retries.unwrap_or(defaults.max_retries),
            no_key_wait_seconds: self.no_key_wait_seconds.unwrap_or(defaults.no_key_wait_seconds),
            request_timeout_seconds: self
                .request_timeout_seconds
                .unwrap_or(defaults.request_timeout_seconds),
            max_concurrent_requests: self
                .max_concurrent_requests
                .unwrap_or(defaults.max_concurrent_requests),
            concurrency_timeout_seconds: self
                .concurrency_timeout_seconds
                .unwrap_or(defaults.concurrency_timeout_seconds),
            key_in_use_timeout_seconds: self
                .key_in_use_timeout_seconds
                .unwrap_or(defaults.key_in_use_timeout_seconds),
            default_check_cooled_down_seconds: self
                .default_check_cooled_down_seconds
                .unwrap_or(defaults.default_check_cooled_down_seconds),
            check_health_after_cool_down: self
                .check_health_after_cool_down
                .unwrap_or(defaults.check_health_after_cool_down),
            check_health_time_interval_seconds: self
                .check_health_time_interval_seconds
                .unwrap_or(defaults.check_health_time_interval_seconds),
            cloudflare_gateway_enabled: self
                .cloudflare_gateway_enabled
                .unwrap_or(defaults.cloudflare_gateway_enabled),
            cf_ai_authorization_key: self.cf_ai_authorization_key,
        })
    }
}

impl From<GatewayConfig> for GatewayConfigPatch {
    fn from(value: GatewayConfig) -> Self {
        Self {
            dsn: Some(value.dsn),
            gemini_api_base_url: Some(value.gemini_api_base_url),
            openai_api_base_url: Some(value.openai_api_base_url),
            api_key_cool_down_seconds: Some(value.api_key_cool_down_seconds),
            api_key_failure_threshold: Some(value.api_key_failure_threshold),
            max_cool_down_seconds: Some(value.max_cool_down_seconds),
            rate_limit_default_wait_seconds: Some(value.rate_limit_default_wait_seconds),
            max_retries: Some(value.max_retries),
            no_key_wait_seconds: Some(value.no_key_wait_seconds),
            request_timeout_seconds: Some(value.request_timeout_seconds),
            max_concurrent_requests: Some(value.max_concurrent_requests),
            concurrency_timeout_seconds: Some(value.concurrency_timeout_seconds),
            key_in_use_timeout_seconds: Some(value.key_in_use_timeout_seconds),
            default_check_cooled_down_seconds: Some(value.default_check_cooled_down_seconds),
            check_health_after_cool_down: Some(value.check_health_after_cool_down),
            check_health_time_interval_seconds: Some(value.check_health_time_interval_seconds),
            cloudflare_gateway_enabled: Some(value.cloudflare_gateway_enabled),
            cf_ai_authorization_key: value.cf_ai_authorization_key,
        }
    }
}
