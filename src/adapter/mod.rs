//! # Protocol Client Adapter
//!
//! Boundary between the session manager and a concrete pub/sub protocol
//! client. The session manager only ever talks to [`ProtocolAdapter`]; it
//! never sees packets, sockets or event loops.
//!
//! ## Contract
//!
//! - Every `*_async` call invokes its [`Completion`] exactly once, on success
//!   or failure. The call itself returns immediately; the completion runs
//!   later on a thread owned by the adapter.
//! - The inbound handler fires zero or more times, only while the link is up.
//! - The link-lost handler fires at most once per connected period. No
//!   inbound message follows it until a new connect succeeds.
//!
//! ```text
//! SessionManager ──connect/disconnect/subscribe/publish──► ProtocolAdapter
//!        ▲                                                     │
//!        └──────── Completion / InboundHandler / LinkLost ─────┘
//! ```

pub mod rumqtt;

#[cfg(test)]
pub(crate) mod mock;

use std::sync::Arc;

pub use rumqttc::QoS;

/// Failure reported by the protocol client. The detail string is forwarded
/// to observers untouched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{detail}")]
pub struct AdapterError {
    detail: String,
}

impl AdapterError {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }
}

/// One-shot completion callback of an async adapter call.
pub type Completion = Box<dyn FnOnce(Result<(), AdapterError>) + Send + 'static>;

/// Called with `(topic, payload)` for every message delivered by the broker.
pub type InboundHandler = Arc<dyn Fn(String, Vec<u8>) + Send + Sync + 'static>;

/// Called with a human readable reason when the link drops unsolicited.
pub type LinkLostHandler = Arc<dyn Fn(String) + Send + Sync + 'static>;

/// Capability set the session manager needs from a protocol client.
pub trait ProtocolAdapter: Send + Sync {
    fn connect_async(&self, endpoint: String, client_identity: String, on_complete: Completion);

    fn disconnect_async(&self, on_complete: Completion);

    fn subscribe_async(&self, topic: String, qos: QoS, on_complete: Completion);

    fn publish_async(&self, topic: String, payload: Vec<u8>, qos: QoS, on_complete: Completion);

    fn set_inbound_handler(&self, handler: InboundHandler);

    fn set_link_lost_handler(&self, handler: LinkLostHandler);

    fn is_connected(&self) -> bool;
}

/// Maps the numeric level used in configuration files to [`QoS`].
pub fn qos_from_level(level: u8) -> Option<QoS> {
    match level {
        0 => Some(QoS::AtMostOnce),
        1 => Some(QoS::AtLeastOnce),
        2 => Some(QoS::ExactlyOnce),
        _ => None,
    }
}
