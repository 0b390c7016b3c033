use clap::Parser;

/// CLI/ENV surface for the demonstration binary. Every field is optional so
/// clap's built-in CLI > ENV precedence composes with the config crate's
/// ENV > defaults merge: `None` here means "let the lower layer decide".
#[derive(Debug, Clone, Parser)]
#[command(name = "gatekey-gateway", version, about = "Upstream-key scheduling gateway for Gemini and OpenAI-compatible traffic")]
pub struct CliArgs {
    /// Database DSN (sea-orm connection string).
    #[arg(long, env = "GATEKEY_DSN")]
    pub dsn: Option<String>,

    /// Bind host for the demo HTTP surface.
    #[arg(long, env = "GATEKEY_HOST")]
    pub host: Option<String>,

    /// Bind port for the demo HTTP surface.
    #[arg(long, env = "GATEKEY_PORT")]
    pub port: Option<String>,

    /// Admin key required on the `/admin` sub-router.
    #[arg(long, env = "GATEKEY_ADMIN_KEY")]
    pub admin_key: Option<String>,

    #[arg(long, env = "GATEKEY_GEMINI_API_BASE_URL")]
    pub gemini_api_base_url: Option<String>,

    #[arg(long, env = "GATEKEY_OPENAI_API_BASE_URL")]
    pub openai_api_base_url: Option<String>,

    #[arg(long, env = "GATEKEY_API_KEY_COOL_DOWN_SECONDS")]
    pub api_key_cool_down_seconds: Option<u64>,

    #[arg(long, env = "GATEKEY_API_KEY_FAILURE_THRESHOLD")]
    pub api_key_failure_threshold: Option<u32>,

    #[arg(long, env = "GATEKEY_MAX_COOL_DOWN_SECONDS")]
    pub max_cool_down_seconds: Option<u64>,

    #[arg(long, env = "GATEKEY_RATE_LIMIT_DEFAULT_WAIT_SECONDS")]
    pub rate_limit_default_wait_seconds: Option<u64>,

    #[arg(long, env = "GATEKEY_MAX_RETRIES")]
    pub max_retries: Option<u32>,

    #[arg(long, env = "GATEKEY_NO_KEY_WAIT_SECONDS")]
    pub no_key_wait_seconds: Option<u64>,

    #[arg(long, env = "GATEKEY_REQUEST_TIMEOUT_SECONDS")]
    pub request_timeout_seconds: Option<u64>,

    #[arg(long, env = "GATEKEY_MAX_CONCURRENT_REQUESTS")]
    pub max_concurrent_requests: Option<usize>,

    #[arg(long, env = "GATEKEY_CONCURRENCY_TIMEOUT_SECONDS")]
    pub concurrency_timeout_seconds: Option<u64>,

    #[arg(long, env = "GATEKEY_KEY_IN_USE_TIMEOUT_SECONDS")]
    pub key_in_use_timeout_seconds: Option<u64>,

    #[arg(long, env = "GATEKEY_DEFAULT_CHECK_COOLED_DOWN_SECONDS")]
    pub default_check_cooled_down_seconds: Option<u64>,

    #[arg(long, env = "GATEKEY_CHECK_HEALTH_AFTER_COOL_DOWN")]
    pub check_health_after_cool_down: Option<bool>,

    #[arg(long, env = "GATEKEY_CHECK_HEALTH_TIME_INTERVAL_SECONDS")]
    pub check_health_time_interval_seconds: Option<u64>,

    #[arg(long, env = "GATEKEY_CLOUDFLARE_GATEWAY_ENABLED")]
    pub cloudflare_gateway_enabled: Option<bool>,

    #[arg(long, env = "GATEKEY_CF_AI_AUTHORIZATION_KEY")]
    pub cf_ai_authorization_key: Option<String>,
}
