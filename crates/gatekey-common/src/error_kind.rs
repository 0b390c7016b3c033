use serde::{Deserialize, Serialize};

/// The failure taxonomy the scheduler classifies every forwarder outcome
/// into. Ordering here has no meaning; each variant carries its own
/// cooldown policy in `gatekey_scheduler::classify`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// HTTP 401 / 403.
    AuthError,
    /// HTTP 429.
    RateLimitError,
    /// Any other non-2xx HTTP status.
    OtherHttpError,
    /// Connection/IO/timeout errors below the HTTP layer.
    RequestError,
    /// An SSE stream closed without a per-protocol terminal signal.
    StreamingCompletionError,
    /// A liveness probe issued by the release loop failed.
    HealthCheckError,
    /// A key was held past `key_in_use_timeout_seconds`.
    UseTimeoutError,
    /// Anything else (panics caught at a boundary, unexpected shapes).
    UnexpectedError,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::AuthError => "auth_error",
            ErrorKind::RateLimitError => "rate_limit_error",
            ErrorKind::OtherHttpError => "other_http_error",
            ErrorKind::RequestError => "request_error",
            ErrorKind::StreamingCompletionError => "streaming_completion_error",
            ErrorKind::HealthCheckError => "health_check_error",
            ErrorKind::UseTimeoutError => "use_timeout_error",
            ErrorKind::UnexpectedError => "unexpected_error",
        }
    }

    /// Failures that always trigger a cooldown, independent of the
    /// consecutive-failure threshold.
    pub fn always_cools_down(self) -> bool {
        !matches!(self, ErrorKind::OtherHttpError | ErrorKind::RequestError)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
