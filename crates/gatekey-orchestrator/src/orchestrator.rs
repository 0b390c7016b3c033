use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use gatekey_common::ErrorKind;
use gatekey_forwarder::{ForwardError, ForwardRequest, ForwardStream, GatewayForwarder, UsageTokens};
use gatekey_keystore::{KeyStore, NewRequestLog, UpstreamKey};
use gatekey_scheduler::KeyScheduler;
use rand::Rng;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::OrchestratorError;
use crate::request::{HandleOutcome, RequestInfo};

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Owns one inbound request end to end: concurrency admission, key
/// dispatch, retry-on-failure, and the per-attempt request log.
pub struct RetryOrchestrator<S: KeyStore + Send + Sync + 'static> {
    scheduler: KeyScheduler<S>,
    forwarder: GatewayForwarder,
    concurrency: Arc<Semaphore>,
}

impl<S: KeyStore + Send + Sync + 'static> Clone for RetryOrchestrator<S> {
    fn clone(&self) -> Self {
        Self {
            scheduler: self.scheduler.clone(),
            forwarder: self.forwarder.clone(),
            concurrency: self.concurrency.clone(),
        }
    }
}

impl<S: KeyStore + Send + Sync + 'static> RetryOrchestrator<S> {
    pub fn new(scheduler: KeyScheduler<S>, forwarder: GatewayForwarder) -> Self {
        let permits = scheduler.config().max_concurrent_requests.max(1);
        Self {
            scheduler,
            forwarder,
            concurrency: Arc::new(Semaphore::new(permits)),
        }
    }

    pub async fn handle(
        &self,
        info: RequestInfo,
        request: ForwardRequest,
    ) -> OrchestratorResult<HandleOutcome> {
        let config = self.scheduler.config().clone();
        let concurrency_timeout = Duration::from_secs(config.concurrency_timeout_seconds.max(1));

        let permit = tokio::time::timeout(concurrency_timeout, self.concurrency.clone().acquire_owned())
            .await
            .map_err(|_| OrchestratorError::ConcurrencyTimeout(concurrency_timeout))?
            .expect("concurrency semaphore is never closed");

        let counts = self.scheduler.counts().await?;
        let max_retries = if config.max_retries > 0 {
            config.max_retries
        } else {
            (counts.available + counts.cooled).max(1) as u32
        };

        let mut saw_no_key = false;
        let mut last_error: Option<String> = None;

        for _attempt in 0..max_retries {
            let Some(key) = self.scheduler.next_key().await? else {
                saw_no_key = true;
                tokio::time::sleep(Duration::from_secs(config.no_key_wait_seconds.max(1))).await;
                continue;
            };
            saw_no_key = false;

            let watchdog = self.spawn_use_timeout(key.clone(), config.key_in_use_timeout_seconds);

            if request.stream {
                match self.forwarder.send_stream(info.family, &key.secret, request.clone()).await {
                    Ok(stream) => {
                        let tee = self.tee_stream(info, key, request.model_id.clone(), stream, watchdog, permit);
                        return Ok(HandleOutcome::Stream(Box::pin(tee)));
                    }
                    Err(err) => {
                        watchdog.abort();
                        self.handle_attempt_failure(&info, &key, &request.model_id, &err).await?;
                        if matches!(err, ForwardError::Http { status: 429, .. }) {
                            rate_limit_sleep(config.rate_limit_default_wait_seconds).await;
                        }
                        last_error = Some(err.to_string());
                        continue;
                    }
                }
            }

            match self.forwarder.send_unary(info.family, &key.secret, request.clone()).await {
                Ok(response) => {
                    watchdog.abort();
                    self.scheduler.mark_success(&key).await?;
                    self.log(&info, &key, &request.model_id, true, None, Some(&response.usage)).await;
                    return Ok(HandleOutcome::Unary(response));
                }
                Err(err) => {
                    watchdog.abort();
                    self.handle_attempt_failure(&info, &key, &request.model_id, &err).await?;
                    if matches!(err, ForwardError::Http { status: 429, .. }) {
                        rate_limit_sleep(config.rate_limit_default_wait_seconds).await;
                    }
                    last_error = Some(err.to_string());
                }
            }
        }

        drop(permit);
        if last_error.is_none() && saw_no_key {
            Err(OrchestratorError::NoKeyAvailable)
        } else {
            Err(OrchestratorError::AllAttemptsFailed(last_error.unwrap_or_default()))
        }
    }

    async fn handle_attempt_failure(
        &self,
        info: &RequestInfo,
        key: &UpstreamKey,
        model_name: &str,
        err: &ForwardError,
    ) -> OrchestratorResult<()> {
        if matches!(err, ForwardError::Transport(_)) {
            self.forwarder.recycle_client(self.forwarder.base_url_for(info.family));
        }
        self.scheduler.mark_fail(key, err.classify()).await?;
        self.log(info, key, model_name, false, Some(err.classify()), None).await;
        Ok(())
    }

    fn spawn_use_timeout(&self, key: UpstreamKey, key_in_use_timeout_seconds: u64) -> tokio::task::JoinHandle<()> {
        let scheduler = self.scheduler.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(key_in_use_timeout_seconds.max(1))).await;
            let _ = scheduler.mark_fail(&key, ErrorKind::UseTimeoutError).await;
        })
    }

    /// Tees forwarded SSE frames straight to the caller. The request has
    /// committed to `key` the moment the first frame is yielded: a failure
    /// observed past that point surfaces as one terminal error frame rather
    /// than a retry, per the streaming ordering guarantee.
    fn tee_stream(
        &self,
        info: RequestInfo,
        key: UpstreamKey,
        model_name: String,
        mut forward_stream: ForwardStream,
        watchdog: tokio::task::JoinHandle<()>,
        permit: OwnedSemaphorePermit,
    ) -> impl futures_util::Stream<Item = bytes::Bytes> + Send + 'static {
        let scheduler = self.scheduler.clone();
        async_stream::stream! {
            let _permit = permit;
            while let Some(chunk) = forward_stream.frames.next().await {
                yield chunk;
            }
            watchdog.abort();

            match forward_stream.outcome.await {
                Ok(Ok(usage)) => {
                    let _ = scheduler.mark_success(&key).await;
                    append_log(&scheduler, &info, &key, &model_name, true, None, Some(usage)).await;
                }
                Ok(Err(err)) => {
                    let kind = err.classify();
                    let _ = scheduler.mark_fail(&key, kind).await;
                    append_log(&scheduler, &info, &key, &model_name, false, Some(kind), None).await;
                    let envelope = serde_json::json!({
                        "error": {"type": kind.as_str(), "message": err.to_string()},
                    });
                    yield bytes::Bytes::from(format!("data: {envelope}\n\n"));
                }
                Err(_) => {
                    // Outcome sender dropped (task panicked); nothing more to tee.
                }
            }
        }
    }

    async fn log(
        &self,
        info: &RequestInfo,
        key: &UpstreamKey,
        model_name: &str,
        is_success: bool,
        error_kind: Option<ErrorKind>,
        usage: Option<&UsageTokens>,
    ) {
        append_log(&self.scheduler, info, key, model_name, is_success, error_kind, usage.copied()).await;
    }
}

async fn append_log<S: KeyStore + Send + Sync + 'static>(
    scheduler: &KeyScheduler<S>,
    info: &RequestInfo,
    key: &UpstreamKey,
    model_name: &str,
    is_success: bool,
    error_kind: Option<ErrorKind>,
    usage: Option<UsageTokens>,
) {
    let log = NewRequestLog {
        request_id: &info.request_id,
        request_time: time::OffsetDateTime::now_utc(),
        key_identifier: Some(&key.identifier),
        key_brief: Some(&key.brief),
        tenant_alias: info.tenant_alias.as_deref(),
        model_name,
        is_success,
        error_type: error_kind.map(ErrorKind::as_str),
        prompt_tokens: usage.as_ref().and_then(|u| u.prompt_tokens),
        completion_tokens: usage.as_ref().and_then(|u| u.completion_tokens),
        total_tokens: usage.as_ref().and_then(|u| u.total_tokens),
    };
    if let Err(err) = scheduler.append_log(log).await {
        tracing::warn!(error = %err, request_id = %info.request_id, "failed to persist request log");
    }
}

async fn rate_limit_sleep(base_seconds: u64) {
    let jitter = rand::rng().random_range(1..=5u64);
    tokio::time::sleep(Duration::from_secs(base_seconds + jitter)).await;
}
