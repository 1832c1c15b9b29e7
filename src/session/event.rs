use std::borrow::Cow;
use std::fmt;

use chrono::{DateTime, Local};

use super::error::SessionError;

/// Command that caused an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Connect,
    Disconnect,
    Subscribe,
    Publish,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Operation::Connect => "connect",
            Operation::Disconnect => "disconnect",
            Operation::Subscribe => "subscribe",
            Operation::Publish => "publish",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    ConnectSuccess,
    DisconnectSuccess,
    SubscribeSuccess,
    PublishSuccess,
    MessageReceived,
    LinkLost,
    InvalidArgument(Operation),
    InvalidState(Operation),
    NotConnected(Operation),
    AdapterFailure(Operation),
}

/// Immutable notification handed to observers.
///
/// `sequence` is strictly increasing across everything one manager emits,
/// so sorting by it reproduces emission order.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    pub sequence: u64,
    pub kind: EventKind,
    pub topic: Option<String>,
    pub payload: Option<Vec<u8>>,
    pub error: Option<String>,
    pub timestamp: DateTime<Local>,
}

impl Event {
    pub fn payload_text(&self) -> Option<Cow<'_, str>> {
        self.payload.as_deref().map(String::from_utf8_lossy)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let topic = self.topic.as_deref().unwrap_or("");
        let payload = self.payload_text().unwrap_or_default();
        let error = self.error.as_deref().unwrap_or("");
        match self.kind {
            EventKind::ConnectSuccess => write!(f, "connected"),
            EventKind::DisconnectSuccess => write!(f, "disconnected"),
            EventKind::SubscribeSuccess => write!(f, "[subscribed] {topic}"),
            EventKind::PublishSuccess => write!(f, "[sent] {topic} -> {payload}"),
            EventKind::MessageReceived => write!(f, "[received] {topic} -> {payload}"),
            EventKind::LinkLost => write!(f, "connection lost: {error}"),
            EventKind::AdapterFailure(Operation::Subscribe) => {
                write!(f, "[subscribe failed] {topic}: {error}")
            }
            EventKind::AdapterFailure(Operation::Publish) => {
                write!(f, "[send failed] {topic}: {error}")
            }
            EventKind::AdapterFailure(op) => write!(f, "{op} failed: {error}"),
            EventKind::InvalidArgument(_)
            | EventKind::InvalidState(_)
            | EventKind::NotConnected(_) => write!(f, "rejected: {error}"),
        }
    }
}

/// An event before it has been sequenced.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Outcome {
    kind: EventKind,
    topic: Option<String>,
    payload: Option<Vec<u8>>,
    error: Option<String>,
}

impl Outcome {
    pub(crate) fn success(kind: EventKind) -> Self {
        Self {
            kind,
            topic: None,
            payload: None,
            error: None,
        }
    }

    pub(crate) fn failure(error: SessionError) -> Self {
        Self {
            kind: error.kind(),
            topic: error.topic().map(str::to_string),
            payload: None,
            error: Some(error.to_string()),
        }
    }

    pub(crate) fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub(crate) fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = Some(payload);
        self
    }

    pub(crate) fn sequenced(self, sequence: u64) -> Event {
        Event {
            sequence,
            kind: self.kind,
            topic: self.topic,
            payload: self.payload,
            error: self.error,
            timestamp: Local::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_carries_topic_and_detail() {
        let event = Outcome::failure(SessionError::AdapterFailure {
            operation: Operation::Subscribe,
            topic: Some("a/b".to_string()),
            detail: "not authorized".to_string(),
        })
        .sequenced(7);

        assert_eq!(event.sequence, 7);
        assert_eq!(event.kind, EventKind::AdapterFailure(Operation::Subscribe));
        assert_eq!(event.topic.as_deref(), Some("a/b"));
        assert_eq!(event.error.as_deref(), Some("not authorized"));
        assert_eq!(event.to_string(), "[subscribe failed] a/b: not authorized");
    }

    #[test]
    fn display_matches_log_lines() {
        let received = Outcome::success(EventKind::MessageReceived)
            .with_topic("t/1")
            .with_payload(b"hello".to_vec())
            .sequenced(1);
        assert_eq!(received.to_string(), "[received] t/1 -> hello");

        let lost = Outcome::failure(SessionError::LinkLost("network error".to_string()))
            .sequenced(2);
        assert_eq!(lost.kind, EventKind::LinkLost);
        assert_eq!(lost.to_string(), "connection lost: network error");
    }

    #[test]
    fn payload_text_is_lossy() {
        let event = Outcome::success(EventKind::MessageReceived)
            .with_payload(vec![0x68, 0x69, 0xff])
            .sequenced(1);
        assert_eq!(event.payload_text().unwrap(), "hi\u{fffd}");
    }
}
