//! # mqtt-session
//!
//! Connection-lifecycle manager for an MQTT client. A [`SessionManager`]
//! accepts connect, disconnect, subscribe and publish commands from any
//! thread, runs them through a [`ProtocolAdapter`] off the calling path, and
//! reports every outcome as one sequenced [`Event`] to its observers.
//!
//! ```text
//! caller ──command──► SessionManager ──Executor──► ProtocolAdapter (rumqttc)
//!                          │    ▲                        │
//!                          │    └── completions, inbound messages, link loss
//!                          ▼
//!                      Observers (in registration order)
//! ```
//!
//! [`SessionManager`]: session::SessionManager
//! [`ProtocolAdapter`]: adapter::ProtocolAdapter
//! [`Event`]: session::Event

pub mod adapter;
pub mod config;
pub mod console;
pub mod executor;
pub mod session;
