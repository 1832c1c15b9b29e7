//! Session manager: lifecycle state machine and event emission.
//!
//! # State Machine
//!
//! ```text
//! Disconnected ──connect──► Connecting ──ok──► Connected ──disconnect──► Disconnecting
//!      ▲                        │                  │                          │
//!      ├────────────err─────────┘                  │                          │
//!      ├─────────────────link lost─────────────────┘                          │
//!      └──────────────────────────────(always)────────────────────────────────┘
//! ```
//!
//! # Locking
//!
//! Session, sequence counter and observer list live behind one mutex. A
//! command commits its transition under that mutex, releases it, and only
//! then hands the adapter call to the executor. Completions and adapter
//! callbacks take the mutex again to update the session and emit, so an
//! event always follows the state change it reports.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::command::Command;
use super::error::SessionError;
use super::event::{Event, EventKind, Operation, Outcome};
use super::observer::{ChannelObserver, Observer};
use super::state::{Session, SessionState};
use crate::adapter::{AdapterError, Completion, ProtocolAdapter, QoS};
use crate::executor::Executor;

struct Inner {
    session: Session,
    last_sequence: u64,
    observers: Vec<Arc<dyn Observer>>,
}

impl Inner {
    /// Sequences `outcome` and hands it to every observer in registration
    /// order. Must be called with the session lock held.
    fn emit(&mut self, outcome: Outcome) -> u64 {
        self.last_sequence += 1;
        let event = outcome.sequenced(self.last_sequence);
        debug!("Emitting event {} {:?}", event.sequence, event.kind);
        for observer in &self.observers {
            observer.on_event(&event);
        }
        event.sequence
    }

    fn reject(&mut self, error: SessionError) {
        warn!("Rejected: {}", error);
        self.emit(Outcome::failure(error));
    }
}

struct Shared {
    adapter: Arc<dyn ProtocolAdapter>,
    executor: Arc<dyn Executor>,
    qos: QoS,
    inner: Mutex<Inner>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn on_connect_complete(&self, result: Result<(), AdapterError>) {
        let mut inner = self.lock();
        let state = inner.session.state();
        match result {
            Ok(()) => {
                if state == SessionState::Connecting {
                    inner.session.mark_connected();
                    info!(
                        "Connected to {}",
                        inner.session.endpoint().unwrap_or_default()
                    );
                } else {
                    warn!("Connect succeeded while {}", state);
                }
                inner.emit(Outcome::success(EventKind::ConnectSuccess));
            }
            Err(e) => {
                if state == SessionState::Connecting {
                    inner.session.reset();
                }
                warn!("Connect failed: {}", e);
                inner.emit(Outcome::failure(SessionError::AdapterFailure {
                    operation: Operation::Connect,
                    topic: None,
                    detail: e.detail().to_string(),
                }));
            }
        }
    }

    fn on_disconnect_complete(&self, result: Result<(), AdapterError>) {
        let mut inner = self.lock();
        let state = inner.session.state();
        if state == SessionState::Disconnecting {
            inner.session.reset();
        } else {
            warn!("Disconnect completed while {}", state);
        }
        match result {
            Ok(()) => {
                info!("Disconnected");
                inner.emit(Outcome::success(EventKind::DisconnectSuccess));
            }
            Err(e) => {
                warn!("Disconnect reported failure: {}", e);
                inner.emit(Outcome::failure(SessionError::AdapterFailure {
                    operation: Operation::Disconnect,
                    topic: None,
                    detail: e.detail().to_string(),
                }));
            }
        }
    }

    fn on_subscribe_complete(&self, topic: String, result: Result<(), AdapterError>) {
        let mut inner = self.lock();
        match result {
            Ok(()) => {
                if inner.session.state() == SessionState::Connected {
                    inner.session.add_subscription(topic.clone());
                } else {
                    debug!("Subscription to {} acknowledged after the link went down", topic);
                }
                info!("Subscribed to {}", topic);
                inner.emit(Outcome::success(EventKind::SubscribeSuccess).with_topic(topic));
            }
            Err(e) => {
                warn!("Subscribe to {} failed: {}", topic, e);
                inner.emit(Outcome::failure(SessionError::AdapterFailure {
                    operation: Operation::Subscribe,
                    topic: Some(topic),
                    detail: e.detail().to_string(),
                }));
            }
        }
    }

    fn on_publish_complete(&self, topic: String, payload: Vec<u8>, result: Result<(), AdapterError>) {
        let mut inner = self.lock();
        match result {
            Ok(()) => {
                debug!("Published {} bytes to {}", payload.len(), topic);
                inner.emit(
                    Outcome::success(EventKind::PublishSuccess)
                        .with_topic(topic)
                        .with_payload(payload),
                );
            }
            Err(e) => {
                warn!("Publish to {} failed: {}", topic, e);
                inner.emit(Outcome::failure(SessionError::AdapterFailure {
                    operation: Operation::Publish,
                    topic: Some(topic),
                    detail: e.detail().to_string(),
                }));
            }
        }
    }

    fn on_message(&self, topic: String, payload: Vec<u8>) {
        let mut inner = self.lock();
        let state = inner.session.state();
        if state != SessionState::Connected {
            warn!("Message on {} arrived while {}", topic, state);
        }
        inner.emit(
            Outcome::success(EventKind::MessageReceived)
                .with_topic(topic)
                .with_payload(payload),
        );
    }

    fn on_link_lost(&self, reason: String) {
        let mut inner = self.lock();
        let state = inner.session.state();
        if state == SessionState::Connected {
            inner.session.reset();
        } else {
            warn!("Link lost reported while {}", state);
        }
        warn!("Connection lost: {}", reason);
        inner.emit(Outcome::failure(SessionError::LinkLost(reason)));
    }
}

/// Owns one broker session and turns every outcome into an [`Event`].
///
/// Cloning yields another handle to the same session. All operations are
/// non-blocking and safe to call from any thread; results arrive only as
/// events.
#[derive(Clone)]
pub struct SessionManager {
    shared: Arc<Shared>,
}

impl SessionManager {
    /// Creates a manager in `Disconnected` and installs its inbound and
    /// link-lost handlers on `adapter`.
    pub fn new(adapter: Arc<dyn ProtocolAdapter>, executor: Arc<dyn Executor>, qos: QoS) -> Self {
        let shared = Arc::new(Shared {
            adapter,
            executor,
            qos,
            inner: Mutex::new(Inner {
                session: Session::default(),
                last_sequence: 0,
                observers: Vec::new(),
            }),
        });

        let weak = Arc::downgrade(&shared);
        shared
            .adapter
            .set_inbound_handler(Arc::new(move |topic, payload| {
                if let Some(shared) = weak.upgrade() {
                    shared.on_message(topic, payload);
                }
            }));

        let weak = Arc::downgrade(&shared);
        shared.adapter.set_link_lost_handler(Arc::new(move |reason| {
            if let Some(shared) = weak.upgrade() {
                shared.on_link_lost(reason);
            }
        }));

        Self { shared }
    }

    pub fn register_observer(&self, observer: Arc<dyn Observer>) {
        let mut inner = self.shared.lock();
        inner.observers.push(observer);
        debug!("Registered observer #{}", inner.observers.len());
    }

    /// Registers a channel observer and returns its receiving end.
    pub fn subscribe_events(&self) -> mpsc::UnboundedReceiver<Event> {
        let (observer, rx) = ChannelObserver::channel();
        self.register_observer(Arc::new(observer));
        rx
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().session.state()
    }

    /// Copy of the session as it is right now.
    pub fn snapshot(&self) -> Session {
        self.shared.lock().session.clone()
    }

    pub fn active_subscriptions(&self) -> BTreeSet<String> {
        self.shared.lock().session.active_subscriptions().clone()
    }

    /// Sequence number of the most recent event, 0 before the first one.
    pub fn last_sequence(&self) -> u64 {
        self.shared.lock().last_sequence
    }

    /// Whether the adapter reports a live link.
    pub fn is_link_up(&self) -> bool {
        self.shared.adapter.is_connected()
    }

    pub fn submit(&self, command: Command) {
        debug!("Submitted {} command", command.operation());
        match command {
            Command::Connect {
                endpoint,
                client_identity,
            } => self.connect(endpoint, client_identity),
            Command::Disconnect => self.disconnect(),
            Command::Subscribe { topic } => self.subscribe(topic),
            Command::Publish { topic, payload } => self.publish(topic, payload),
        }
    }

    pub fn connect(&self, endpoint: impl Into<String>, client_identity: impl Into<String>) {
        let endpoint = endpoint.into();
        let client_identity = client_identity.into();
        {
            let mut inner = self.shared.lock();
            if endpoint.is_empty() || client_identity.is_empty() {
                inner.reject(SessionError::InvalidArgument {
                    operation: Operation::Connect,
                    topic: None,
                    reason: "endpoint and client identity must not be empty",
                });
                return;
            }
            let state = inner.session.state();
            if state != SessionState::Disconnected {
                inner.reject(SessionError::InvalidState {
                    operation: Operation::Connect,
                    state,
                });
                return;
            }
            inner
                .session
                .begin_connect(endpoint.clone(), client_identity.clone());
            info!("Connecting to {} as {}", endpoint, client_identity);
        }

        let weak = Arc::downgrade(&self.shared);
        self.dispatch(move |adapter| {
            adapter.connect_async(
                endpoint,
                client_identity,
                completion(weak, |shared, result| shared.on_connect_complete(result)),
            )
        });
    }

    /// Starts a graceful disconnect. Does nothing when already
    /// `Disconnected`; rejected while a connect or disconnect is in flight.
    pub fn disconnect(&self) {
        {
            let mut inner = self.shared.lock();
            match inner.session.state() {
                SessionState::Disconnected => {
                    debug!("Disconnect ignored: already disconnected");
                    return;
                }
                SessionState::Connected => {
                    inner.session.begin_disconnect();
                    info!("Disconnecting");
                }
                state @ (SessionState::Connecting | SessionState::Disconnecting) => {
                    inner.reject(SessionError::InvalidState {
                        operation: Operation::Disconnect,
                        state,
                    });
                    return;
                }
            }
        }

        let weak = Arc::downgrade(&self.shared);
        self.dispatch(move |adapter| {
            adapter.disconnect_async(completion(weak, |shared, result| {
                shared.on_disconnect_complete(result)
            }))
        });
    }

    pub fn subscribe(&self, topic: impl Into<String>) {
        let topic = topic.into();
        {
            let mut inner = self.shared.lock();
            if topic.is_empty() {
                inner.reject(SessionError::InvalidArgument {
                    operation: Operation::Subscribe,
                    topic: None,
                    reason: "topic must not be empty",
                });
                return;
            }
            let state = inner.session.state();
            if state != SessionState::Connected {
                inner.reject(SessionError::NotConnected {
                    operation: Operation::Subscribe,
                    topic,
                    state,
                });
                return;
            }
            debug!("Subscribing to {}", topic);
        }

        let qos = self.shared.qos;
        let weak = Arc::downgrade(&self.shared);
        self.dispatch(move |adapter| {
            let pending = topic.clone();
            adapter.subscribe_async(
                topic,
                qos,
                completion(weak, move |shared, result| {
                    shared.on_subscribe_complete(pending, result)
                }),
            )
        });
    }

    pub fn publish(&self, topic: impl Into<String>, payload: impl Into<Vec<u8>>) {
        let topic = topic.into();
        let payload = payload.into();
        {
            let mut inner = self.shared.lock();
            if topic.is_empty() || payload.is_empty() {
                let topic = (!topic.is_empty()).then_some(topic);
                inner.reject(SessionError::InvalidArgument {
                    operation: Operation::Publish,
                    topic,
                    reason: "topic and payload must not be empty",
                });
                return;
            }
            let state = inner.session.state();
            if state != SessionState::Connected {
                inner.reject(SessionError::NotConnected {
                    operation: Operation::Publish,
                    topic,
                    state,
                });
                return;
            }
            debug!("Publishing {} bytes to {}", payload.len(), topic);
        }

        let qos = self.shared.qos;
        let weak = Arc::downgrade(&self.shared);
        self.dispatch(move |adapter| {
            let sent = (topic.clone(), payload.clone());
            adapter.publish_async(
                topic,
                payload,
                qos,
                completion(weak, move |shared, result| {
                    shared.on_publish_complete(sent.0, sent.1, result)
                }),
            )
        });
    }

    fn dispatch<F>(&self, call: F)
    where
        F: FnOnce(&dyn ProtocolAdapter) + Send + 'static,
    {
        let adapter = self.shared.adapter.clone();
        self.shared
            .executor
            .execute(Box::new(move || call(adapter.as_ref())));
    }
}

/// Wraps a completion handler so it only runs while the manager is alive.
fn completion<F>(weak: Weak<Shared>, handler: F) -> Completion
where
    F: FnOnce(&Shared, Result<(), AdapterError>) + Send + 'static,
{
    Box::new(move |result| match weak.upgrade() {
        Some(shared) => handler(&shared, result),
        None => debug!("Completion arrived after the session manager was dropped"),
    })
}
