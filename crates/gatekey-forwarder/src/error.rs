use gatekey_common::ErrorKind;

pub type ForwardResult<T> = Result<T, ForwardError>;

/// Everything a forwarder attempt can fail with, distinct enough for the
/// orchestrator to classify per the spec's failure table without needing to
/// inspect an HTTP status code itself in the common cases.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("upstream returned {status}: {body}")]
    Http { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("streaming response ended without a terminal signal")]
    StreamingCompletion,
    #[error("{0}")]
    Unexpected(String),
}

impl ForwardError {
    /// Maps a forwarder failure onto the scheduler's failure taxonomy.
    /// HTTP status codes drive the split between auth/rate-limit/other;
    /// everything else maps 1:1 onto its own kind.
    pub fn classify(&self) -> ErrorKind {
        match self {
            ForwardError::Http { status, .. } => match *status {
                401 | 403 => ErrorKind::AuthError,
                429 => ErrorKind::RateLimitError,
                _ => ErrorKind::OtherHttpError,
            },
            ForwardError::Transport(_) => ErrorKind::RequestError,
            ForwardError::StreamingCompletion => ErrorKind::StreamingCompletionError,
            ForwardError::Unexpected(_) => ErrorKind::UnexpectedError,
        }
    }

    pub fn http_status(&self) -> Option<u16> {
        match self {
            ForwardError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}
