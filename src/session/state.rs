use std::collections::BTreeSet;
use std::fmt;

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq, Hash)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Disconnecting => "disconnecting",
        };
        f.write_str(name)
    }
}

/// The one mutable entity behind the session lock.
///
/// `endpoint` and `client_identity` are set when a connect attempt starts
/// and cleared whenever the session falls back to `Disconnected`.
/// `active_subscriptions` is best effort and never reconciled with the
/// broker.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Session {
    state: SessionState,
    endpoint: Option<String>,
    client_identity: Option<String>,
    active_subscriptions: BTreeSet<String>,
}

impl Session {
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    pub fn client_identity(&self) -> Option<&str> {
        self.client_identity.as_deref()
    }

    pub fn active_subscriptions(&self) -> &BTreeSet<String> {
        &self.active_subscriptions
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.active_subscriptions.contains(topic)
    }

    pub(crate) fn begin_connect(&mut self, endpoint: String, client_identity: String) {
        self.state = SessionState::Connecting;
        self.endpoint = Some(endpoint);
        self.client_identity = Some(client_identity);
    }

    pub(crate) fn mark_connected(&mut self) {
        self.state = SessionState::Connected;
    }

    pub(crate) fn begin_disconnect(&mut self) {
        self.state = SessionState::Disconnecting;
    }

    pub(crate) fn add_subscription(&mut self, topic: String) -> bool {
        self.active_subscriptions.insert(topic)
    }

    /// Tears the session down to a fresh `Disconnected` value.
    pub(crate) fn reset(&mut self) {
        *self = Session::default();
    }
}
