use ft_core::{SessionState, TrackingError};
use thiserror::Error;

/// Errors raised by the session orchestrator and its runner.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The ingest queue is at capacity; the producer should back off.
    #[error("ingest queue is full ({capacity} messages)")]
    QueueFull { capacity: usize },

    /// The session no longer accepts messages.
    #[error("ingest queue is closed")]
    QueueClosed,

    /// The operation requires a running session.
    #[error("session is not active (state: {0})")]
    NotActive(SessionState),

    #[error(transparent)]
    Tracking(#[from] TrackingError),

    /// The background tick task panicked or was cancelled.
    #[error("session task failed: {0}")]
    Task(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages() {
        assert_eq!(
            SessionError::QueueFull { capacity: 8 }.to_string(),
            "ingest queue is full (8 messages)"
        );
        assert_eq!(
            SessionError::NotActive(SessionState::Ended).to_string(),
            "session is not active (state: ended)"
        );
        assert_eq!(
            SessionError::from(TrackingError::TickOutOfOrder {
                expected: 3,
                actual: 5
            })
            .to_string(),
            "timeline tick out of order: expected 3, got 5"
        );
    }
}
