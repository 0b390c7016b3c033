use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::watch;
use tokio::time::Instant as TokioInstant;

use gatekey_common::ErrorKind;
use gatekey_keystore::KeyStore;
use tracing::{info, warn};

use crate::events::Event;
use crate::health::HealthChecker;
use crate::scheduler::{KeyScheduler, now_epoch_seconds};

impl<S: KeyStore + 'static> KeyScheduler<S> {
    /// Spawns the background loop that drains cooled-down keys back to
    /// `available`, optionally probing liveness first.
    ///
    /// Implements the health-checked variant named in the spec's open
    /// questions (the naïve always-reactivate variant is not built): when
    /// `check_health_after_cool_down` is set, the health-check interval caps
    /// the generic `default_check_cooled_down_seconds` deadline.
    pub fn spawn_release_loop(
        self,
        health_checker: Arc<dyn HealthChecker>,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let wakeup = self.wakeup_signal();
            loop {
                if *shutdown.borrow() {
                    return;
                }

                if let Err(err) = self.release_due_keys(&health_checker).await {
                    warn!(error = %err, "release loop: failed to list or release cooled-down keys");
                }

                let deadline = match self.next_release_deadline().await {
                    Ok(deadline) => deadline,
                    Err(err) => {
                        warn!(error = %err, "release loop: failed to compute next deadline");
                        TokioInstant::now() + Duration::from_secs(self.config().default_check_cooled_down_seconds)
                    }
                };

                tokio::select! {
                    _ = wakeup.notified() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            return;
                        }
                    }
                }
            }
        })
    }

    async fn release_due_keys(&self, health_checker: &Arc<dyn HealthChecker>) -> crate::scheduler::SchedulerResult<()> {
        let now = now_epoch_seconds();
        let releasable = self.store().list_releasable(now).await?;
        for key in releasable {
            if self.config().check_health_after_cool_down {
                if health_checker.check(&key).await {
                    self.store().reactivate(&key.identifier).await?;
                    if let Some(mut state) = self.store().get_state(&key.identifier).await? {
                        state.request_fail_count = 0;
                        self.store().save_state(&state).await?;
                    }
                    self.events()
                        .emit(Event::CoolDownEnd {
                            at: SystemTime::now(),
                            identifier: key.identifier.clone(),
                        })
                        .await;
                    info!(key_identifier = %key.identifier, "release loop: key reactivated after passing health check");
                } else {
                    // A failed probe restarts the cooldown with an increased
                    // entry count and thus a longer duration (spec 4.B step 2).
                    self.mark_fail(&key, ErrorKind::HealthCheckError).await?;
                    warn!(key_identifier = %key.identifier, "release loop: health check failed, cooldown restarted");
                }
            } else {
                self.store().reactivate(&key.identifier).await?;
                self.events()
                    .emit(Event::CoolDownEnd {
                        at: SystemTime::now(),
                        identifier: key.identifier.clone(),
                    })
                    .await;
                info!(key_identifier = %key.identifier, "release loop: key reactivated");
            }
        }
        Ok(())
    }

    async fn next_release_deadline(&self) -> crate::scheduler::SchedulerResult<TokioInstant> {
        let now = now_epoch_seconds();
        let generic = now + self.config().default_check_cooled_down_seconds as f64;
        let mut deadline = match self.store().min_cool_down_until().await? {
            Some(min) => min.min(generic),
            None => generic,
        };
        if self.config().check_health_after_cool_down {
            let capped = now + self.config().check_health_time_interval_seconds as f64;
            deadline = deadline.min(capped);
        }
        let wait = (deadline - now).max(0.0);
        Ok(TokioInstant::now() + Duration::from_secs_f64(wait))
    }
}
