//! Error taxonomy of the session manager.
//!
//! None of these cross the command boundary as a `Result`. Each one becomes
//! an [`Event`](super::event::Event) whose `error` field is the `Display`
//! output below. Adapter details and link-loss reasons pass through verbatim.

use super::event::{EventKind, Operation};
use super::state::SessionState;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Empty endpoint, client identity, topic or payload
    #[error("{operation} rejected: {reason}")]
    InvalidArgument {
        operation: Operation,
        topic: Option<String>,
        reason: &'static str,
    },

    /// Lifecycle command not allowed in the current state
    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: Operation,
        state: SessionState,
    },

    /// Subscribe or publish attempted outside `Connected`
    #[error("cannot {operation} to '{topic}' while {state}")]
    NotConnected {
        operation: Operation,
        topic: String,
        state: SessionState,
    },

    /// The protocol client reported a failed call
    #[error("{detail}")]
    AdapterFailure {
        operation: Operation,
        topic: Option<String>,
        detail: String,
    },

    /// Unsolicited disconnect reported by the protocol client
    #[error("{0}")]
    LinkLost(String),
}

impl SessionError {
    pub fn kind(&self) -> EventKind {
        match self {
            SessionError::InvalidArgument { operation, .. } => EventKind::InvalidArgument(*operation),
            SessionError::InvalidState { operation, .. } => EventKind::InvalidState(*operation),
            SessionError::NotConnected { operation, .. } => EventKind::NotConnected(*operation),
            SessionError::AdapterFailure { operation, .. } => EventKind::AdapterFailure(*operation),
            SessionError::LinkLost(_) => EventKind::LinkLost,
        }
    }

    pub fn topic(&self) -> Option<&str> {
        match self {
            SessionError::InvalidArgument { topic, .. }
            | SessionError::AdapterFailure { topic, .. } => topic.as_deref(),
            SessionError::NotConnected { topic, .. } => Some(topic),
            SessionError::InvalidState { .. } | SessionError::LinkLost(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_operation_and_state() {
        let err = SessionError::InvalidState {
            operation: Operation::Connect,
            state: SessionState::Disconnecting,
        };
        assert_eq!(err.to_string(), "cannot connect while disconnecting");
        assert_eq!(err.kind(), EventKind::InvalidState(Operation::Connect));

        let err = SessionError::NotConnected {
            operation: Operation::Publish,
            topic: "t/1".to_string(),
            state: SessionState::Disconnected,
        };
        assert_eq!(err.to_string(), "cannot publish to 't/1' while disconnected");
        assert_eq!(err.topic(), Some("t/1"));
    }

    #[test]
    fn adapter_detail_is_verbatim() {
        let err = SessionError::AdapterFailure {
            operation: Operation::Connect,
            topic: None,
            detail: "I/O: Connection refused (os error 111)".to_string(),
        };
        assert_eq!(err.to_string(), "I/O: Connection refused (os error 111)");
        assert_eq!(err.topic(), None);
    }
}
