use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("no concurrency slot available within {0:?}")]
    ConcurrencyTimeout(Duration),
    #[error("no upstream key became available")]
    NoKeyAvailable,
    #[error("all attempts failed: {0}")]
    AllAttemptsFailed(String),
    #[error(transparent)]
    Scheduler(#[from] gatekey_scheduler::SchedulerError),
}

impl OrchestratorError {
    /// Matches the spec's surfacing rule: concurrency/key exhaustion is a
    /// `503`, anything else that ran out of retries is a `500`.
    pub fn http_status(&self) -> u16 {
        match self {
            OrchestratorError::ConcurrencyTimeout(_) | OrchestratorError::NoKeyAvailable => 503,
            OrchestratorError::AllAttemptsFailed(_) => 500,
            OrchestratorError::Scheduler(_) => 500,
        }
    }
}
