//! [`ProtocolAdapter`] backed by `rumqttc`.
//!
//! Each connect attempt gets its own [`AsyncClient`]/[`EventLoop`] pair and a
//! driver task that polls the event loop. The driver is a statum machine with
//! two states:
//!
//! ```text
//! Handshaking ──ConnAck──► Established ──(disconnect | poll error)──► done
//!      │
//!      └──poll error / refused──► done (connect completion fails)
//! ```
//!
//! Subscribe and publish completions are queued in request order and bound
//! to packet ids when the event loop reports the matching `Outgoing` event.
//! They are resolved by `SubAck`, `PubAck` (QoS 1) or `PubComp` (QoS 2).
//! QoS 0 publishes resolve as soon as they are written.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet,
    SubscribeReasonCode,
};
use statum::{machine, state};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{AdapterError, Completion, InboundHandler, LinkLostHandler, ProtocolAdapter, QoS};
use crate::config::BrokerConfig;

pub const DEFAULT_PORT: u16 = 1883;

/// Connection options applied to every connect attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterSettings {
    pub keep_alive: Duration,
    pub clean_session: bool,
    pub channel_capacity: usize,
    pub credentials: Option<(String, String)>,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            keep_alive: Duration::from_secs(60),
            clean_session: true,
            channel_capacity: 100,
            credentials: None,
        }
    }
}

impl From<&BrokerConfig> for AdapterSettings {
    fn from(config: &BrokerConfig) -> Self {
        let credentials = match (&config.username, &config.password) {
            (Some(user), Some(pw)) => Some((user.clone(), pw.clone())),
            (Some(user), None) => Some((user.clone(), String::new())),
            _ => None,
        };
        Self {
            keep_alive: Duration::from_secs(config.keep_alive_secs),
            clean_session: config.clean_session,
            channel_capacity: config.channel_capacity,
            credentials,
        }
    }
}

/// Splits `tcp://host:port`, `mqtt://host:port`, `host:port` or `host` into
/// host and port.
pub fn parse_endpoint(endpoint: &str) -> Result<(String, u16), AdapterError> {
    let trimmed = endpoint.trim();
    let address = match trimmed.split_once("://") {
        Some(("tcp" | "mqtt", rest)) => rest,
        Some((scheme, _)) => {
            return Err(AdapterError::new(format!(
                "unsupported endpoint scheme: {scheme}"
            )))
        }
        None => trimmed,
    };
    let address = address.trim_end_matches('/');

    let (host, port) = match address.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|e| AdapterError::new(format!("invalid port '{port}': {e}")))?;
            (host, port)
        }
        None => (address, DEFAULT_PORT),
    };

    if host.is_empty() {
        return Err(AdapterError::new(format!(
            "endpoint '{endpoint}' has no host"
        )));
    }
    Ok((host.to_string(), port))
}

struct QueuedPublish {
    qos: QoS,
    completion: Completion,
}

/// Completions waiting on the event loop. Guarded by a std mutex and never
/// held across an await point or a callback.
///
/// Once `closed` is set the driver has stopped resolving requests, so nothing
/// new may be queued.
#[derive(Default)]
struct Pending {
    closed: bool,
    connect: Option<Completion>,
    disconnect: Option<Completion>,
    subscribes_unsent: VecDeque<Completion>,
    publishes_unsent: VecDeque<QueuedPublish>,
    subscribes_inflight: HashMap<u16, Completion>,
    publishes_inflight: HashMap<u16, Completion>,
}

impl Pending {
    fn drain_requests(&mut self) -> Vec<Completion> {
        let mut drained: Vec<Completion> = self.subscribes_unsent.drain(..).collect();
        drained.extend(self.publishes_unsent.drain(..).map(|p| p.completion));
        drained.extend(self.subscribes_inflight.drain().map(|(_, c)| c));
        drained.extend(self.publishes_inflight.drain().map(|(_, c)| c));
        drained
    }
}

/// One connect attempt and everything in flight on it.
struct Connection {
    client: AsyncClient,
    cancel: CancellationToken,
    closing: AtomicBool,
    pending: Mutex<Pending>,
    // Keeps queue order identical to the order requests enter the client.
    dispatch: tokio::sync::Mutex<()>,
}

impl Connection {
    fn new(client: AsyncClient, connect: Option<Completion>) -> Self {
        Self {
            client,
            cancel: CancellationToken::new(),
            closing: AtomicBool::new(false),
            pending: Mutex::new(Pending {
                connect,
                ..Pending::default()
            }),
            dispatch: tokio::sync::Mutex::new(()),
        }
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn complete_connect(&self, result: Result<(), AdapterError>) {
        let completion = self.pending().connect.take();
        match completion {
            Some(completion) => completion(result),
            None => warn!("Connect outcome without a pending connect: {:?}", result),
        }
    }

    fn complete_disconnect(&self, result: Result<(), AdapterError>) {
        let completion = self.pending().disconnect.take();
        if let Some(completion) = completion {
            completion(result);
        }
    }

    /// Hands the completion back when the connection is already drained.
    fn queue_subscribe(&self, completion: Completion) -> Result<(), Completion> {
        let mut pending = self.pending();
        if pending.closed {
            return Err(completion);
        }
        pending.subscribes_unsent.push_back(completion);
        Ok(())
    }

    fn queue_publish(&self, queued: QueuedPublish) -> Result<(), QueuedPublish> {
        let mut pending = self.pending();
        if pending.closed {
            return Err(queued);
        }
        pending.publishes_unsent.push_back(queued);
        Ok(())
    }

    /// Closes the connection to new requests and fails everything queued.
    fn fail_requests(&self, detail: &str) {
        let drained = {
            let mut pending = self.pending();
            pending.closed = true;
            pending.drain_requests()
        };
        if !drained.is_empty() {
            debug!("Failing {} pending requests: {}", drained.len(), detail);
        }
        for completion in drained {
            completion(Err(AdapterError::new(detail)));
        }
    }
}

#[derive(Default)]
struct Shared {
    current: Mutex<Option<Arc<Connection>>>,
    inbound: Mutex<Option<InboundHandler>>,
    link_lost: Mutex<Option<LinkLostHandler>>,
    connected: AtomicBool,
}

impl Shared {
    fn current(&self) -> Option<Arc<Connection>> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn release(&self, connection: &Arc<Connection>) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if current
            .as_ref()
            .is_some_and(|c| Arc::ptr_eq(c, connection))
        {
            *current = None;
        }
    }

    fn deliver(&self, topic: String, payload: Vec<u8>) {
        let handler = self
            .inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match handler {
            Some(handler) => handler(topic, payload),
            None => debug!("Dropping message on {}: no inbound handler", topic),
        }
    }

    fn link_lost(&self, reason: String) {
        let handler = self
            .link_lost
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match handler {
            Some(handler) => handler(reason),
            None => warn!("Link lost without handler: {}", reason),
        }
    }
}

#[state]
#[derive(Debug, Clone)]
enum DriverState {
    Handshaking, // Waiting for ConnAck
    Established, // Routing packets until the link ends
}

/// Event loop driver for a single connection.
#[machine]
struct ConnectionDriver<S: DriverState> {
    event_loop: EventLoop,
    connection: Arc<Connection>,
    shared: Arc<Shared>,
}

impl ConnectionDriver<Handshaking> {
    fn create(event_loop: EventLoop, connection: Arc<Connection>, shared: Arc<Shared>) -> Self {
        Self::new(event_loop, connection, shared)
    }

    /// Polls until the broker acknowledges the connection.
    async fn handshake(mut self) -> Result<ConnectionDriver<Established>, AdapterError> {
        let cancel = self.connection.cancel.clone();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(AdapterError::new("connection attempt cancelled"));
                }

                polled = self.event_loop.poll() => match polled {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        if ack.code == ConnectReturnCode::Success {
                            info!("Broker accepted connection");
                            return Ok(self.transition());
                        }
                        return Err(AdapterError::new(format!(
                            "connection refused: {:?}",
                            ack.code
                        )));
                    }
                    Ok(event) => debug!("Event before ConnAck: {:?}", event),
                    Err(e) => return Err(AdapterError::new(e.to_string())),
                }
            }
        }
    }
}

impl ConnectionDriver<Established> {
    /// Routes packets until the link ends. Returns once every completion
    /// queued on this connection has been resolved.
    async fn run(mut self) {
        let cancel = self.connection.cancel.clone();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Connection driver cancelled");
                    self.shared.connected.store(false, Ordering::SeqCst);
                    self.connection.fail_requests("connection closed");
                    self.connection.complete_disconnect(Ok(()));
                    break;
                }

                polled = self.event_loop.poll() => match polled {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                        info!("Disconnect sent to broker");
                        self.shared.connected.store(false, Ordering::SeqCst);
                        self.connection.fail_requests("disconnected");
                        self.connection.complete_disconnect(Ok(()));
                        break;
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        self.on_link_down("disconnected by broker".to_string());
                        break;
                    }
                    Ok(event) => self.route(event),
                    Err(e) => {
                        self.on_link_down(e.to_string());
                        break;
                    }
                }
            }
        }
        self.shared.release(&self.connection);
    }

    fn route(&self, event: Event) {
        match event {
            Event::Incoming(Packet::Publish(publish)) => {
                debug!("Message received on {}", publish.topic);
                self.shared
                    .deliver(publish.topic.clone(), publish.payload.to_vec());
            }
            Event::Outgoing(Outgoing::Subscribe(pkid)) => {
                let mut pending = self.connection.pending();
                match pending.subscribes_unsent.pop_front() {
                    Some(completion) => {
                        pending.subscribes_inflight.insert(pkid, completion);
                    }
                    None => warn!("Subscribe {} sent without a queued request", pkid),
                }
            }
            Event::Outgoing(Outgoing::Publish(pkid)) => {
                let queued = self.connection.pending().publishes_unsent.pop_front();
                match queued {
                    Some(QueuedPublish {
                        qos: QoS::AtMostOnce,
                        completion,
                    }) => completion(Ok(())),
                    Some(QueuedPublish { completion, .. }) => {
                        self.connection
                            .pending()
                            .publishes_inflight
                            .insert(pkid, completion);
                    }
                    None => debug!("Publish {} sent without a queued request", pkid),
                }
            }
            Event::Incoming(Packet::SubAck(ack)) => {
                let completion = self.connection.pending().subscribes_inflight.remove(&ack.pkid);
                let rejected = ack
                    .return_codes
                    .iter()
                    .any(|code| matches!(code, SubscribeReasonCode::Failure));
                let result = if rejected {
                    Err(AdapterError::new("subscription rejected by broker"))
                } else {
                    Ok(())
                };
                match completion {
                    Some(completion) => completion(result),
                    None => warn!("SubAck for unknown packet {}", ack.pkid),
                }
            }
            Event::Incoming(Packet::PubAck(ack)) => self.complete_publish(ack.pkid),
            Event::Incoming(Packet::PubComp(comp)) => self.complete_publish(comp.pkid),
            other => debug!("Ignoring event: {:?}", other),
        }
    }

    fn complete_publish(&self, pkid: u16) {
        let completion = self.connection.pending().publishes_inflight.remove(&pkid);
        match completion {
            Some(completion) => completion(Ok(())),
            None => debug!("Acknowledgement for unknown publish {}", pkid),
        }
    }

    fn on_link_down(&self, reason: String) {
        self.shared.connected.store(false, Ordering::SeqCst);
        if self.connection.closing.load(Ordering::SeqCst) {
            debug!("Link closed during disconnect: {}", reason);
        } else {
            error!("Link lost: {}", reason);
            self.shared.link_lost(reason.clone());
        }
        self.connection.fail_requests(&reason);
        // A disconnect queued before the drain still gets its answer.
        self.connection.complete_disconnect(Ok(()));
    }
}

/// `rumqttc` implementation of [`ProtocolAdapter`]. All completions and
/// handlers run on tasks spawned on `runtime`.
pub struct RumqttAdapter {
    runtime: Handle,
    settings: AdapterSettings,
    shared: Arc<Shared>,
}

impl RumqttAdapter {
    pub fn new(runtime: Handle, settings: AdapterSettings) -> Self {
        Self {
            runtime,
            settings,
            shared: Arc::new(Shared::default()),
        }
    }

    fn complete_later(&self, on_complete: Completion, result: Result<(), AdapterError>) {
        self.runtime.spawn(async move { on_complete(result) });
    }

    fn options(&self, host: String, port: u16, client_identity: String) -> MqttOptions {
        let mut options = MqttOptions::new(client_identity, host, port);
        options
            .set_keep_alive(self.settings.keep_alive)
            .set_clean_session(self.settings.clean_session);
        if let Some((user, pw)) = &self.settings.credentials {
            options.set_credentials(user.clone(), pw.clone());
        }
        options
    }
}

impl ProtocolAdapter for RumqttAdapter {
    fn connect_async(&self, endpoint: String, client_identity: String, on_complete: Completion) {
        let (host, port) = match parse_endpoint(&endpoint) {
            Ok(parts) => parts,
            Err(e) => {
                warn!("Rejecting endpoint {}: {}", endpoint, e);
                self.complete_later(on_complete, Err(e));
                return;
            }
        };

        if client_identity.is_empty() || client_identity.starts_with(char::is_whitespace) {
            self.complete_later(
                on_complete,
                Err(AdapterError::new(format!(
                    "invalid client identifier '{client_identity}'"
                ))),
            );
            return;
        }

        info!("Connecting to {}:{} as {}", host, port, client_identity);
        let options = self.options(host, port, client_identity);
        let (client, event_loop) = AsyncClient::new(options, self.settings.channel_capacity);

        let connection = Arc::new(Connection::new(client, Some(on_complete)));

        let previous = self
            .shared
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(connection.clone());
        if let Some(previous) = previous {
            warn!("Replacing a live connection");
            previous.cancel.cancel();
        }

        let shared = self.shared.clone();
        self.runtime.spawn(async move {
            let driver = ConnectionDriver::create(event_loop, connection.clone(), shared.clone());
            match driver.handshake().await {
                Ok(established) => {
                    shared.connected.store(true, Ordering::SeqCst);
                    connection.complete_connect(Ok(()));
                    established.run().await;
                }
                Err(e) => {
                    warn!("Connect failed: {}", e);
                    connection.cancel.cancel();
                    shared.release(&connection);
                    connection.fail_requests("connection attempt failed");
                    connection.complete_disconnect(Ok(()));
                    connection.complete_connect(Err(e));
                }
            }
        });
    }

    fn disconnect_async(&self, on_complete: Completion) {
        let Some(connection) = self.shared.current() else {
            debug!("Disconnect without a connection");
            self.complete_later(on_complete, Ok(()));
            return;
        };

        connection.closing.store(true, Ordering::SeqCst);
        let drained = {
            let mut pending = connection.pending();
            if pending.closed {
                Some(on_complete)
            } else {
                pending.disconnect = Some(on_complete);
                None
            }
        };
        if let Some(on_complete) = drained {
            debug!("Disconnect on a connection that already closed");
            self.complete_later(on_complete, Ok(()));
            return;
        }

        self.runtime.spawn(async move {
            let _order = connection.dispatch.lock().await;
            if let Err(e) = connection.client.disconnect().await {
                warn!("Failed to queue disconnect: {}", e);
                connection.cancel.cancel();
                connection.complete_disconnect(Err(AdapterError::new(e.to_string())));
            }
        });
    }

    fn subscribe_async(&self, topic: String, qos: QoS, on_complete: Completion) {
        let Some(connection) = self.shared.current() else {
            self.complete_later(on_complete, Err(AdapterError::new("not connected")));
            return;
        };

        self.runtime.spawn(async move {
            let _order = connection.dispatch.lock().await;
            if let Err(on_complete) = connection.queue_subscribe(on_complete) {
                debug!("Subscribe to {} after the connection closed", topic);
                on_complete(Err(AdapterError::new("connection closed")));
                return;
            }
            if let Err(e) = connection.client.subscribe(topic.clone(), qos).await {
                warn!("Failed to queue subscribe for {}: {}", topic, e);
                let queued = connection.pending().subscribes_unsent.pop_back();
                if let Some(completion) = queued {
                    completion(Err(AdapterError::new(e.to_string())));
                }
            }
        });
    }

    fn publish_async(&self, topic: String, payload: Vec<u8>, qos: QoS, on_complete: Completion) {
        let Some(connection) = self.shared.current() else {
            self.complete_later(on_complete, Err(AdapterError::new("not connected")));
            return;
        };

        self.runtime.spawn(async move {
            let _order = connection.dispatch.lock().await;
            let queued = QueuedPublish {
                qos,
                completion: on_complete,
            };
            if let Err(queued) = connection.queue_publish(queued) {
                debug!("Publish to {} after the connection closed", topic);
                (queued.completion)(Err(AdapterError::new("connection closed")));
                return;
            }
            if let Err(e) = connection
                .client
                .publish(topic.clone(), qos, false, payload)
                .await
            {
                warn!("Failed to queue publish to {}: {}", topic, e);
                let queued = connection.pending().publishes_unsent.pop_back();
                if let Some(queued) = queued {
                    (queued.completion)(Err(AdapterError::new(e.to_string())));
                }
            }
        });
    }

    fn set_inbound_handler(&self, handler: InboundHandler) {
        *self
            .shared
            .inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    fn set_link_lost_handler(&self, handler: LinkLostHandler) {
        *self
            .shared
            .link_lost
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }
}

impl Drop for RumqttAdapter {
    fn drop(&mut self) {
        if let Some(connection) = self.shared.current() {
            connection.cancel.cancel();
        }
    }
}
