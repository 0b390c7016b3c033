use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use gatekey_common::{GatewayConfig, GatewayConfigPatch};
use gatekey_forwarder::GatewayForwarder;
use gatekey_keystore::SeaOrmKeyStore;
use gatekey_orchestrator::RetryOrchestrator;
use gatekey_scheduler::{EventHub, KeyScheduler};
use uuid::Uuid;

use crate::cli::CliArgs;
use crate::health_checker::GeminiHealthChecker;
use crate::state::AppState;

pub struct Bootstrap {
    pub state: AppState,
    pub host: String,
    pub port: u16,
    pub health_checker: Arc<GeminiHealthChecker>,
}

pub async fn bootstrap_from_env() -> anyhow::Result<Bootstrap> {
    bootstrap(CliArgs::parse()).await
}

pub async fn bootstrap(args: CliArgs) -> anyhow::Result<Bootstrap> {
    let dsn = sanitize_dsn_value(args.dsn.clone());
    let host = sanitize_optional_env_value(args.host.clone()).unwrap_or_else(|| "0.0.0.0".to_string());
    let port: u16 = sanitize_optional_env_value(args.port.clone())
        .map(|raw| raw.parse())
        .transpose()
        .context("invalid GATEKEY_PORT value")?
        .unwrap_or(8080);
    let admin_key = sanitize_optional_env_value(args.admin_key.clone()).unwrap_or_else(|| {
        let generated = Uuid::new_v4().to_string();
        eprintln!("generated admin key: {generated}");
        generated
    });

    ensure_sqlite_parent_dir(&dsn)?;

    let store = Arc::new(SeaOrmKeyStore::connect(&dsn).await.context("connect key store")?);
    store.sync().await.context("sync key store schema")?;

    let patch = GatewayConfigPatch {
        dsn: Some(dsn),
        gemini_api_base_url: args.gemini_api_base_url,
        openai_api_base_url: args.openai_api_base_url,
        api_key_cool_down_seconds: args.api_key_cool_down_seconds,
        api_key_failure_threshold: args.api_key_failure_threshold,
        max_cool_down_seconds: args.max_cool_down_seconds,
        rate_limit_default_wait_seconds: args.rate_limit_default_wait_seconds,
        max_retries: args.max_retries,
        no_key_wait_seconds: args.no_key_wait_seconds,
        request_timeout_seconds: args.request_timeout_seconds,
        max_concurrent_requests: args.max_concurrent_requests,
        concurrency_timeout_seconds: args.concurrency_timeout_seconds,
        key_in_use_timeout_seconds: args.key_in_use_timeout_seconds,
        default_check_cooled_down_seconds: args.default_check_cooled_down_seconds,
        check_health_after_cool_down: args.check_health_after_cool_down,
        check_health_time_interval_seconds: args.check_health_time_interval_seconds,
        cloudflare_gateway_enabled: args.cloudflare_gateway_enabled,
        cf_ai_authorization_key: args.cf_ai_authorization_key,
    };
    let config: GatewayConfig = patch.into_config().context("finalize gateway config")?;

    let events = EventHub::default();
    let scheduler = KeyScheduler::new(store, config.clone(), events);

    let recovered = scheduler.recover_from_restart().await.context("crash-recovery sweep")?;
    if recovered > 0 {
        tracing::warn!(recovered, "released keys orphaned by a prior process crash");
    }

    let forwarder = GatewayForwarder::new(config);
    let health_checker = Arc::new(GeminiHealthChecker::new(forwarder.clone()));
    let orchestrator = RetryOrchestrator::new(scheduler.clone(), forwarder);

    Ok(Bootstrap {
        state: AppState {
            scheduler,
            orchestrator,
            admin_key: Arc::new(admin_key),
        },
        host,
        port,
        health_checker,
    })
}

fn sanitize_optional_env_value(value: Option<String>) -> Option<String> {
    let trimmed = value?.trim().to_string();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.starts_with("${") && trimmed.ends_with('}') {
        return None;
    }
    Some(trimmed)
}

fn sanitize_dsn_value(value: Option<String>) -> String {
    sanitize_optional_env_value(value).unwrap_or_else(default_dsn)
}

fn default_dsn() -> String {
    if let Some(data_dir) = sanitize_optional_env_value(std::env::var("GATEKEY_DATA_DIR").ok()) {
        let dir = data_dir.trim_end_matches('/');
        return format!("sqlite://{dir}/gatekey.db?mode=rwc");
    }
    "sqlite://gatekey.db?mode=rwc".to_string()
}

fn ensure_sqlite_parent_dir(dsn: &str) -> anyhow::Result<()> {
    let Some(db_path) = sqlite_file_path_from_dsn(dsn) else {
        return Ok(());
    };
    let Some(parent) = db_path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(parent).with_context(|| format!("create sqlite parent dir {}", parent.display()))?;
    Ok(())
}

fn sqlite_file_path_from_dsn(dsn: &str) -> Option<PathBuf> {
    let rest = dsn.strip_prefix("sqlite:")?;
    let path_part = rest.split(['?', '#']).next()?.trim();
    if path_part.is_empty() {
        return None;
    }
    let mut normalized = path_part;
    if let Some(stripped) = normalized.strip_prefix("//") {
        normalized = stripped;
    }
    if normalized.to_ascii_lowercase() == ":memory:" || normalized.contains("mode=memory") {
        return None;
    }
    Some(PathBuf::from(normalized))
}

#[cfg(test)]
mod tests {
    use super::sqlite_file_path_from_dsn;

    #[test]
    fn sqlite_dsn_resolves_relative_path() {
        let path = sqlite_file_path_from_dsn("sqlite://gatekey.db?mode=rwc").unwrap();
        assert_eq!(path.to_string_lossy(), "gatekey.db");
    }

    #[test]
    fn sqlite_dsn_resolves_nested_path() {
        let path = sqlite_file_path_from_dsn("sqlite://data/gatekey.db?mode=rwc").unwrap();
        assert_eq!(path.to_string_lossy(), "data/gatekey.db");
    }

    #[test]
    fn sqlite_memory_dsn_is_ignored() {
        assert!(sqlite_file_path_from_dsn("sqlite::memory:").is_none());
        assert!(sqlite_file_path_from_dsn("sqlite://file:x?mode=memory&cache=shared").is_none());
    }
}
