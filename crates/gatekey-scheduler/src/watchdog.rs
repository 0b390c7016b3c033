use std::time::Duration;

use tokio::sync::watch;
use tracing::warn;

use gatekey_common::ErrorKind;
use gatekey_keystore::KeyStore;

use crate::scheduler::{KeyScheduler, now_epoch_seconds};

impl<S: KeyStore + 'static> KeyScheduler<S> {
    /// Spawns the in-use watchdog: scans `list_in_use()` and force-fails any
    /// key held past `key_in_use_timeout_seconds`.
    ///
    /// Deliberately redundant with the per-request timer the retry
    /// orchestrator schedules for the same key: the orchestrator's task can
    /// be cancelled mid-flight by the HTTP layer (client disconnect),
    /// orphaning the key, and this is the safety net that eventually frees
    /// it. `mark_fail` is idempotent against double-firing.
    pub fn spawn_use_timeout_watchdog(self, mut shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let scan_interval = Duration::from_secs(self.config().default_check_cooled_down_seconds.max(1));
            loop {
                if *shutdown.borrow() {
                    return;
                }

                if let Err(err) = self.sweep_timed_out_keys().await {
                    warn!(error = %err, "use-timeout watchdog: scan failed");
                }

                tokio::select! {
                    _ = tokio::time::sleep(scan_interval) => {}
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            return;
                        }
                    }
                }
            }
        })
    }

    async fn sweep_timed_out_keys(&self) -> crate::scheduler::SchedulerResult<()> {
        let now = now_epoch_seconds();
        let deadline_seconds = self.config().key_in_use_timeout_seconds as f64;
        for key in self.store().list_in_use().await? {
            let Some(state) = self.store().get_state(&key.identifier).await? else {
                continue;
            };
            if !state.is_in_use {
                continue;
            }
            if now - state.last_usage_time >= deadline_seconds {
                warn!(key_identifier = %key.identifier, "use-timeout watchdog: key held past deadline, forcing release");
                self.mark_fail(&key, ErrorKind::UseTimeoutError).await?;
            }
        }
        Ok(())
    }
}
