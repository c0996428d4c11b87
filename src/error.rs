use std::time::Duration;

use thiserror::Error;

// Errors surfaced by `CircuitBreaker::execute`. The breaker produces none of its own
// except `Rejected`, which only exists under `OpenPolicy::Reject`.
#[derive(Error, Debug)]
pub enum BreakerError<E> {
    #[error("action failed: {0}")]
    Action(#[source] E),

    #[error("fallback failed: {0}")]
    Fallback(#[source] anyhow::Error),

    #[error("circuit open, retry after {}ms", .retry_after.as_millis())]
    Rejected { retry_after: Duration },
}

impl<E> BreakerError<E> {
    pub fn is_rejected(&self) -> bool {
        matches!(self, BreakerError::Rejected { .. })
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, BreakerError::Fallback(_))
    }

    // The wrapped action's own error, if that is what this is.
    pub fn into_action(self) -> Option<E> {
        match self {
            BreakerError::Action(err) => Some(err),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid breaker config: {0}")]
    Json(#[from] serde_json::Error),
}
