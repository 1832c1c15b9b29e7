//! Scripted adapter for unit tests. Calls are recorded and parked until the
//! test completes them, so every interleaving is reproducible.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use super::{AdapterError, Completion, InboundHandler, LinkLostHandler, ProtocolAdapter, QoS};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Connect {
        endpoint: String,
        client_identity: String,
    },
    Disconnect,
    Subscribe {
        topic: String,
        qos: QoS,
    },
    Publish {
        topic: String,
        payload: Vec<u8>,
        qos: QoS,
    },
}

#[derive(Default)]
pub(crate) struct MockAdapter {
    calls: Mutex<Vec<Call>>,
    pending: Mutex<VecDeque<(Call, Completion)>>,
    inbound: Mutex<Option<InboundHandler>>,
    link_lost: Mutex<Option<LinkLostHandler>>,
    connected: AtomicBool,
    auto_succeed: AtomicBool,
}

impl MockAdapter {
    /// Adapter that completes every call successfully as soon as it is made.
    pub(crate) fn auto_succeeding() -> Self {
        let adapter = Self::default();
        adapter.auto_succeed.store(true, Ordering::SeqCst);
        adapter
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Completes the oldest parked call and returns it.
    pub(crate) fn complete_next(&self, result: Result<(), AdapterError>) -> Call {
        let (call, completion) = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .expect("no pending adapter call");
        self.track_link(&call, &result);
        completion(result);
        call
    }

    pub(crate) fn complete_next_ok(&self) -> Call {
        self.complete_next(Ok(()))
    }

    pub(crate) fn complete_next_err(&self, detail: &str) -> Call {
        self.complete_next(Err(AdapterError::new(detail)))
    }

    pub(crate) fn fire_message(&self, topic: &str, payload: &[u8]) {
        let handler = self
            .inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .expect("inbound handler not installed");
        handler(topic.to_string(), payload.to_vec());
    }

    pub(crate) fn fire_link_lost(&self, reason: &str) {
        self.connected.store(false, Ordering::SeqCst);
        let handler = self
            .link_lost
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .expect("link lost handler not installed");
        handler(reason.to_string());
    }

    fn track_link(&self, call: &Call, result: &Result<(), AdapterError>) {
        match call {
            Call::Connect { .. } => self.connected.store(result.is_ok(), Ordering::SeqCst),
            Call::Disconnect => self.connected.store(false, Ordering::SeqCst),
            _ => {}
        }
    }

    fn record(&self, call: Call, completion: Completion) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call.clone());

        if self.auto_succeed.load(Ordering::SeqCst) {
            self.track_link(&call, &Ok(()));
            completion(Ok(()));
        } else {
            self.pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push_back((call, completion));
        }
    }
}

impl ProtocolAdapter for MockAdapter {
    fn connect_async(&self, endpoint: String, client_identity: String, on_complete: Completion) {
        self.record(
            Call::Connect {
                endpoint,
                client_identity,
            },
            on_complete,
        );
    }

    fn disconnect_async(&self, on_complete: Completion) {
        self.record(Call::Disconnect, on_complete);
    }

    fn subscribe_async(&self, topic: String, qos: QoS, on_complete: Completion) {
        self.record(Call::Subscribe { topic, qos }, on_complete);
    }

    fn publish_async(&self, topic: String, payload: Vec<u8>, qos: QoS, on_complete: Completion) {
        self.record(
            Call::Publish {
                topic,
                payload,
                qos,
            },
            on_complete,
        );
    }

    fn set_inbound_handler(&self, handler: InboundHandler) {
        *self.inbound.lock().unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    fn set_link_lost_handler(&self, handler: LinkLostHandler) {
        *self.link_lost.lock().unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
