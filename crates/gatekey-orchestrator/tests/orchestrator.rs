use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use gatekey_common::GatewayConfig;
use gatekey_forwarder::{ForwardRequest, GatewayForwarder, ProviderFamily};
use gatekey_keystore::entities::RequestLogs;
use gatekey_keystore::{KeyStore, SeaOrmKeyStore};
use sea_orm::EntityTrait;
use gatekey_orchestrator::{HandleOutcome, RequestInfo, RetryOrchestrator};
use gatekey_scheduler::{EventHub, KeyScheduler};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

static DB_COUNTER: AtomicU32 = AtomicU32::new(0);

async fn fresh_store() -> Arc<SeaOrmKeyStore> {
    let n = DB_COUNTER.fetch_add(1, Ordering::Relaxed);
    let dsn = format!("sqlite://file:gatekey_orchestrator_test_{n}?mode=memory&cache=shared");
    let store = SeaOrmKeyStore::connect(&dsn).await.expect("connect");
    store.sync().await.expect("sync schema");
    Arc::new(store)
}

fn config_for(server: &MockServer) -> GatewayConfig {
    GatewayConfig {
        gemini_api_base_url: server.uri(),
        openai_api_base_url: server.uri(),
        api_key_cool_down_seconds: 5,
        max_cool_down_seconds: 60,
        no_key_wait_seconds: 1,
        rate_limit_default_wait_seconds: 1,
        request_timeout_seconds: 5,
        max_concurrent_requests: 100,
        concurrency_timeout_seconds: 2,
        key_in_use_timeout_seconds: 30,
        ..GatewayConfig::default()
    }
}

fn info(family: ProviderFamily) -> RequestInfo {
    RequestInfo {
        request_id: "req-1".to_string(),
        tenant_alias: Some("tenant-a".to_string()),
        family,
    }
}

fn gemini_request() -> ForwardRequest {
    ForwardRequest {
        model_id: "gemini-2.0-flash".to_string(),
        stream: false,
        body: serde_json::json!({"contents": []}),
    }
}

#[tokio::test]
async fn happy_path_unary_returns_body_and_logs_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-2.0-flash:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "ok": true,
            "usageMetadata": {"promptTokenCount": 3, "candidatesTokenCount": 5, "totalTokenCount": 8}
        })))
        .mount(&server)
        .await;

    let store = fresh_store().await;
    let scheduler = KeyScheduler::new(store.clone(), config_for(&server), EventHub::default());
    scheduler.add_key("sk-one").await.unwrap();
    let forwarder = GatewayForwarder::new(scheduler.config().clone());
    let orchestrator = RetryOrchestrator::new(scheduler.clone(), forwarder);

    let outcome = orchestrator
        .handle(info(ProviderFamily::Gemini), gemini_request())
        .await
        .expect("request succeeds");

    let HandleOutcome::Unary(response) = outcome else {
        panic!("expected a unary outcome");
    };
    assert_eq!(response.usage.total_tokens, Some(8));

    let status = scheduler.status().await.unwrap();
    assert!(matches!(status.keys[0].state, gatekey_scheduler::KeyLifecycleState::Active));

    let logs = RequestLogs::find().all(store.connection()).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert!(logs[0].is_success);
    assert_eq!(logs[0].total_tokens, Some(8));
}

#[tokio::test]
async fn auth_failure_then_success_cools_first_key_and_retries_second() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-2.0-flash:generateContent"))
        .respond_with(ResponseTemplate::new(401).set_body_string("nope"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-2.0-flash:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
        .mount(&server)
        .await;

    let store = fresh_store().await;
    let scheduler = KeyScheduler::new(store, config_for(&server), EventHub::default());
    scheduler.add_key("sk-one").await.unwrap();
    scheduler.add_key("sk-two").await.unwrap();
    let forwarder = GatewayForwarder::new(scheduler.config().clone());
    let orchestrator = RetryOrchestrator::new(scheduler.clone(), forwarder);

    let outcome = orchestrator
        .handle(info(ProviderFamily::Gemini), gemini_request())
        .await
        .expect("second key succeeds");
    assert!(matches!(outcome, HandleOutcome::Unary(_)));

    let status = scheduler.status().await.unwrap();
    let cooling = status
        .keys
        .iter()
        .find(|k| matches!(k.state, gatekey_scheduler::KeyLifecycleState::CoolingDown { .. }))
        .expect("one key is cooling after the 401");
    assert_eq!(cooling.cool_down_entry_count, 1);
}

#[tokio::test]
async fn soft_http_failure_only_cools_down_after_threshold_is_crossed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-2.0-flash:generateContent"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let mut config = config_for(&server);
    config.api_key_failure_threshold = 3;
    config.max_retries = 1;
    let store = fresh_store().await;
    let scheduler = KeyScheduler::new(store, config, EventHub::default());
    scheduler.add_key("sk-one").await.unwrap();
    let forwarder = GatewayForwarder::new(scheduler.config().clone());
    let orchestrator = RetryOrchestrator::new(scheduler.clone(), forwarder);

    for attempt in 1..=2 {
        let _ = orchestrator.handle(info(ProviderFamily::Gemini), gemini_request()).await;
        let status = scheduler.status().await.unwrap();
        assert!(
            matches!(status.keys[0].state, gatekey_scheduler::KeyLifecycleState::Active),
            "key must still be active before the threshold on attempt {attempt}"
        );
    }

    let _ = orchestrator.handle(info(ProviderFamily::Gemini), gemini_request()).await;
    let status = scheduler.status().await.unwrap();
    assert!(matches!(
        status.keys[0].state,
        gatekey_scheduler::KeyLifecycleState::CoolingDown { .. }
    ));
}

#[tokio::test]
async fn streaming_premature_close_yields_one_error_frame_and_does_not_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-2.0-flash:streamGenerateContent"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_raw(
                    concat!(
                        "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"a\"}]}}]}\n\n",
                        "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"b\"}]}}]}\n\n",
                    ),
                    "text/event-stream",
                ),
        )
        .mount(&server)
        .await;

    let store = fresh_store().await;
    let scheduler = KeyScheduler::new(store, config_for(&server), EventHub::default());
    scheduler.add_key("sk-one").await.unwrap();
    let forwarder = GatewayForwarder::new(scheduler.config().clone());
    let orchestrator = RetryOrchestrator::new(scheduler.clone(), forwarder);

    let request = ForwardRequest {
        model_id: "gemini-2.0-flash".to_string(),
        stream: true,
        body: serde_json::json!({"contents": []}),
    };
    let outcome = orchestrator
        .handle(info(ProviderFamily::Gemini), request)
        .await
        .expect("stream starts");
    let HandleOutcome::Stream(mut frames) = outcome else {
        panic!("expected a streaming outcome");
    };

    let mut collected = Vec::new();
    while let Some(chunk) = frames.next().await {
        collected.push(String::from_utf8(chunk.to_vec()).unwrap());
    }

    assert_eq!(collected.len(), 3, "two forwarded frames plus one terminal error frame");
    assert!(collected[2].contains("streaming_completion_error"));

    let status = scheduler.status().await.unwrap();
    assert!(matches!(
        status.keys[0].state,
        gatekey_scheduler::KeyLifecycleState::CoolingDown { .. }
    ));
}

#[tokio::test]
async fn concurrent_dispatch_is_fair_and_exclusive_across_keys() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-2.0-flash:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
        .mount(&server)
        .await;

    let mut config = config_for(&server);
    config.max_concurrent_requests = 100;
    let store = fresh_store().await;
    let scheduler = KeyScheduler::new(store, config, EventHub::default());
    for i in 0..4 {
        scheduler.add_key(&format!("sk-{i}")).await.unwrap();
    }
    let forwarder = GatewayForwarder::new(scheduler.config().clone());
    let orchestrator = RetryOrchestrator::new(scheduler.clone(), forwarder);

    let mut handles = Vec::new();
    for _ in 0..16 {
        let orchestrator = orchestrator.clone();
        handles.push(tokio::spawn(async move {
            orchestrator.handle(info(ProviderFamily::Gemini), gemini_request()).await
        }));
    }

    let mut succeeded = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            succeeded += 1;
        }
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(succeeded, 16);
    let counts = scheduler.counts().await.unwrap();
    assert_eq!(counts.available, 4, "every key returns to available, none double-locked");
}
