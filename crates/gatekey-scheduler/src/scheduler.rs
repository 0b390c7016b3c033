use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::Mutex;

use gatekey_common::{ErrorKind, GatewayConfig, key_identifier};
use gatekey_keystore::{KeyCounts, KeyState, KeyStore, NewRequestLog, StoreError, UpstreamKey};

use crate::classify::{backoff_duration, should_cool_down};
use crate::events::{Event, EventHub};
use crate::status::{KeyLifecycleState, KeyStatus, PerKeyStatus};

pub type SchedulerResult<T> = Result<T, SchedulerError>;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Policy layer over a `KeyStore`: dispenses keys, classifies failures,
/// computes backoff, and publishes wakeups for the background loops.
///
/// All KeyState mutations funnel through the store's atomic primitives; the
/// `write_lock` additionally serializes the read-modify-write sequences in
/// `mark_success`/`mark_fail` so that a success racing a failure for the
/// same key always leaves a coherent final state (last writer wins, per the
/// ordering guarantee in the spec's concurrency section).
pub struct KeyScheduler<S: KeyStore> {
    store: Arc<S>,
    config: GatewayConfig,
    events: EventHub,
    wakeup: Arc<tokio::sync::Notify>,
    write_lock: Arc<Mutex<()>>,
}

impl<S: KeyStore> Clone for KeyScheduler<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            config: self.config.clone(),
            events: self.events.clone(),
            wakeup: self.wakeup.clone(),
            write_lock: self.write_lock.clone(),
        }
    }
}

impl<S: KeyStore> KeyScheduler<S> {
    pub fn new(store: Arc<S>, config: GatewayConfig, events: EventHub) -> Self {
        Self {
            store,
            config,
            events,
            wakeup: Arc::new(tokio::sync::Notify::new()),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn events(&self) -> &EventHub {
        &self.events
    }

    pub(crate) fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub(crate) fn wakeup_signal(&self) -> Arc<tokio::sync::Notify> {
        self.wakeup.clone()
    }

    /// Crash recovery: every key left `is_in_use` across a restart had its
    /// owning request die with the process. Release them all before the
    /// background loops and request path start running.
    pub async fn recover_from_restart(&self) -> SchedulerResult<usize> {
        let orphaned = self.store.list_in_use().await?;
        for key in &orphaned {
            self.store.release_from_use(&key.identifier).await?;
        }
        Ok(orphaned.len())
    }

    /// Thin wrapper over the store's atomic pick-and-lock. Returns `None`
    /// when no key is available; callers (the retry orchestrator) sleep
    /// briefly and retry.
    pub async fn next_key(&self) -> SchedulerResult<Option<UpstreamKey>> {
        Ok(self.store.pick_next_available_and_lock().await?)
    }

    pub async fn mark_success(&self, key: &UpstreamKey) -> SchedulerResult<()> {
        let _guard = self.write_lock.lock().await;
        let Some(mut state) = self.store.get_state(&key.identifier).await? else {
            return Ok(());
        };
        state.request_fail_count = 0;
        state.cool_down_entry_count = 0;
        state.last_usage_time = now_epoch_seconds();
        state.is_in_use = false;
        state.is_cooled_down = false;
        state.cool_down_until = 0.0;
        self.store.save_state(&state).await?;
        Ok(())
    }

    /// Classifies the failure, applies backoff if it cools the key down, and
    /// returns whether it did. See the spec's failure classification table.
    pub async fn mark_fail(&self, key: &UpstreamKey, kind: ErrorKind) -> SchedulerResult<bool> {
        let _guard = self.write_lock.lock().await;
        let Some(mut state) = self.store.get_state(&key.identifier).await? else {
            return Ok(false);
        };

        let now = now_epoch_seconds();
        state.request_fail_count += 1;
        state.last_usage_time = now;

        let cools_down = should_cool_down(kind, state.request_fail_count as u32, self.config.api_key_failure_threshold);

        if cools_down {
            state.cool_down_entry_count += 1;
            let duration = backoff_duration(
                self.config.api_key_cool_down_seconds,
                state.cool_down_entry_count as u32,
                self.config.max_cool_down_seconds,
            );
            state.current_cool_down_seconds = duration as i64;
            state.cool_down_until = now + duration as f64;
            state.is_cooled_down = true;
            state.is_in_use = false;
            self.store.save_state(&state).await?;

            self.events
                .emit(Event::CoolDownStart {
                    at: SystemTime::now(),
                    identifier: key.identifier.clone(),
                    error_kind: kind.as_str().to_string(),
                    until: SystemTime::UNIX_EPOCH + std::time::Duration::from_secs_f64(state.cool_down_until.max(0.0)),
                })
                .await;
            self.wakeup.notify_one();
        } else {
            state.is_in_use = false;
            self.store.save_state(&state).await?;
        }

        Ok(cools_down)
    }

    pub async fn add_key(&self, secret: &str) -> SchedulerResult<String> {
        let identifier = key_identifier(secret);
        let brief = redact(secret);
        self.store.add(&identifier, secret, &brief).await?;
        Ok(identifier)
    }

    pub async fn delete_key(&self, identifier: &str) -> SchedulerResult<()> {
        self.store.delete(identifier).await?;
        Ok(())
    }

    pub async fn reset_key(&self, identifier: &str) -> SchedulerResult<()> {
        self.store.reset(identifier).await?;
        Ok(())
    }

    pub async fn reset_all_keys(&self) -> SchedulerResult<()> {
        self.store.reset_all().await?;
        Ok(())
    }

    pub async fn counts(&self) -> SchedulerResult<KeyCounts> {
        Ok(self.store.counts().await?)
    }

    pub async fn status(&self) -> SchedulerResult<KeyStatus> {
        let counts = self.store.counts().await?;
        let states = self.store.list_all().await?;
        let now = now_epoch_seconds();
        let mut keys = Vec::with_capacity(states.len());
        for state in states {
            let brief = self
                .store
                .get_key(&state.identifier)
                .await?
                .map(|key| key.brief)
                .unwrap_or_default();
            keys.push(per_key_status(state, now, brief));
        }
        Ok(KeyStatus { counts, keys })
    }

    pub async fn append_log(&self, log: NewRequestLog<'_>) -> SchedulerResult<()> {
        self.store.append_log(log).await?;
        Ok(())
    }
}

fn per_key_status(state: KeyState, now: f64, brief: String) -> PerKeyStatus {
    let lifecycle = if state.is_in_use {
        KeyLifecycleState::InUse
    } else if state.is_cooled_down {
        let remaining = (state.cool_down_until - now).max(0.0) as i64;
        KeyLifecycleState::CoolingDown {
            cool_down_seconds_remaining: remaining,
        }
    } else {
        KeyLifecycleState::Active
    };
    PerKeyStatus {
        identifier: state.identifier,
        brief,
        state: lifecycle,
        request_fail_count: state.request_fail_count,
        cool_down_entry_count: state.cool_down_entry_count,
        last_usage_time: state.last_usage_time,
    }
}

fn redact(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

pub(crate) fn now_epoch_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
