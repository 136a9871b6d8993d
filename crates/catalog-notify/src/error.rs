//! Error types for the change notifier.

/// Errors returned by session and room management.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotifyError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Invalid room name '{room}': {reason}")]
    InvalidRoom { room: String, reason: &'static str },

    #[error("Outbound queue of session {0} is full")]
    QueueFull(String),

    #[error("Session {0} is closed")]
    SessionClosed(String),
}

impl NotifyError {
    /// A full queue is temporary; every other error is permanent for the session.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::QueueFull(_))
    }
}

pub type Result<T> = std::result::Result<T, NotifyError>;
