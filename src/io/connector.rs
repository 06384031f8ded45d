//! Connector: state machine, worker thread, and data plane
//!
//! A [`Connector`] owns one TCP endpoint (listening or connecting) and one
//! dedicated worker thread. The worker performs every blocking socket
//! operation: it waits for a connection, then loops reading length-prefixed
//! frames into per-device [`CircularBuffer`]s until the peer disconnects or
//! [`stop`](Connector::stop) is requested. Everything else (sending,
//! draining, configuration) runs on whatever thread the application calls
//! from and never blocks on the worker.
//!
//! State machine:
//!
//! ```text
//! Off -> WaitingForConnection -> Connected -> WaitingForConnection -> ... -> Off
//! ```
//!
//! Transport failures (malformed frames, short reads, disconnects) are
//! absorbed by the worker and reported only as state-change events; they
//! never escalate into errors on the owner thread.

use std::collections::{HashMap, HashSet};
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::bridge::{ApplicationBridge, NodeEvent, SharedNode};
use crate::error::{IgtlError, Result};
use crate::io::circular::CircularBuffer;
use crate::io::event::{ConnectorEvent, EventDispatcher, SubscriptionId};
use crate::io::lock;
use crate::io::retry::RetryPolicy;
use crate::protocol::frame::{FramedMessage, MAX_BODY_SIZE};
use crate::protocol::header::Header;
use crate::registry::converter::{Converter, ConverterRegistry};
use crate::registry::device::{DeviceEntry, DeviceRegistry, DirectionMask};

/// Poll interval for the stop flag while waiting for a connection
const STOP_POLL: Duration = Duration::from_millis(100);

/// Per-address timeout for one client connect attempt
const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Which side of the connection this connector plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectorRole {
    /// Role not yet chosen; `start()` is rejected
    #[default]
    NotDefined,
    /// Listen on `port` and accept one peer at a time
    Server,
    /// Connect to `hostname:port`, retrying until stopped
    Client,
}

/// Connector lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorState {
    /// No worker thread running
    Off,
    /// Worker running, no peer connected
    WaitingForConnection,
    /// A peer is connected and frames are flowing
    Connected,
}

fn default_name() -> String {
    "connector".to_owned()
}

fn default_hostname() -> String {
    "localhost".to_owned()
}

fn default_port() -> u16 {
    18944
}

fn default_true() -> bool {
    true
}

/// Connector configuration, fixed once the connector is constructed
///
/// A flat attribute set so it round-trips through session files unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Human-readable name used in logs and the worker thread name
    #[serde(default = "default_name")]
    pub name: String,
    /// Server or client role
    #[serde(default)]
    pub role: ConnectorRole,
    /// Peer hostname (client role only)
    #[serde(default = "default_hostname")]
    pub hostname: String,
    /// Listen port (server) or peer port (client)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Discard inbound messages from devices that were not pre-registered
    #[serde(default)]
    pub restrict_device_name: bool,
    /// Verify body CRCs on receive
    #[serde(default = "default_true")]
    pub check_crc: bool,
    /// Backoff between failed client connect attempts
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            role: ConnectorRole::NotDefined,
            hostname: default_hostname(),
            port: default_port(),
            restrict_device_name: false,
            check_crc: true,
            retry: RetryPolicy::default(),
        }
    }
}

impl ConnectorConfig {
    /// Server configuration listening on `port`
    pub fn server(port: u16) -> Self {
        Self {
            name: format!("server:{port}"),
            role: ConnectorRole::Server,
            port,
            ..Self::default()
        }
    }

    /// Client configuration connecting to `hostname:port`
    pub fn client(hostname: impl Into<String>, port: u16) -> Self {
        let hostname = hostname.into();
        Self {
            name: format!("client:{hostname}:{port}"),
            role: ConnectorRole::Client,
            hostname,
            port,
            ..Self::default()
        }
    }
}

struct OutgoingSubscription {
    node: SharedNode,
    converter: Arc<dyn Converter>,
    events: HashSet<NodeEvent>,
}

/// State shared between the owner thread and the worker thread
struct Shared {
    config: ConnectorConfig,
    state: Mutex<ConnectorState>,
    stop: AtomicBool,
    worker_alive: AtomicBool,
    /// Established connection. Guards lifecycle transitions (assign/close)
    /// against concurrent sends; the worker reads from its own clone so no
    /// lock spans a blocking receive.
    socket: Mutex<Option<TcpStream>>,
    /// Actual listening port once the server has bound (resolves port 0)
    bound_port: Mutex<Option<u16>>,
    devices: Mutex<DeviceRegistry>,
    converters: Arc<Mutex<ConverterRegistry>>,
    buffers: Mutex<HashMap<String, Arc<CircularBuffer>>>,
    events: EventDispatcher,
    incoming_nodes: Mutex<Vec<SharedNode>>,
    outgoing: Mutex<HashMap<String, OutgoingSubscription>>,
}

/// Bidirectional OpenIGTLink endpoint with a dedicated I/O thread
pub struct Connector {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl Connector {
    /// Create a connector with its own converter registry
    pub fn new(config: ConnectorConfig) -> Self {
        Self::with_converter_registry(config, Arc::new(Mutex::new(ConverterRegistry::new())))
    }

    /// Create a connector sharing a converter registry with other connectors
    ///
    /// An application typically builds one registry at startup and hands it
    /// to every connector it creates.
    pub fn with_converter_registry(
        config: ConnectorConfig,
        converters: Arc<Mutex<ConverterRegistry>>,
    ) -> Self {
        let mut devices = DeviceRegistry::new();
        devices.set_restrict(config.restrict_device_name);
        Connector {
            shared: Arc::new(Shared {
                state: Mutex::new(ConnectorState::Off),
                stop: AtomicBool::new(false),
                worker_alive: AtomicBool::new(false),
                socket: Mutex::new(None),
                bound_port: Mutex::new(None),
                devices: Mutex::new(devices),
                converters,
                buffers: Mutex::new(HashMap::new()),
                events: EventDispatcher::default(),
                incoming_nodes: Mutex::new(Vec::new()),
                outgoing: Mutex::new(HashMap::new()),
                config,
            }),
            worker: None,
        }
    }

    /// The configuration this connector was built from
    pub fn config(&self) -> &ConnectorConfig {
        &self.shared.config
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectorState {
        *lock(&self.shared.state)
    }

    /// True while the worker thread is alive
    pub fn is_running(&self) -> bool {
        self.shared.worker_alive.load(Ordering::SeqCst)
    }

    /// Actual listening port, once bound (server role)
    ///
    /// Useful when configured with port 0 to let the OS pick.
    pub fn local_port(&self) -> Option<u16> {
        *lock(&self.shared.bound_port)
    }

    /// Register a callback for connector events
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&ConnectorEvent) + Send + Sync + 'static,
    {
        self.shared.events.subscribe(callback)
    }

    /// Remove an event subscription
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.events.unsubscribe(id)
    }

    /// Spawn the worker thread and begin waiting for a connection
    ///
    /// Fails with [`IgtlError::InvalidConfiguration`] when no role is set and
    /// with [`IgtlError::AlreadyRunning`] when a worker already exists.
    pub fn start(&mut self) -> Result<()> {
        if self.shared.config.role == ConnectorRole::NotDefined {
            return Err(IgtlError::InvalidConfiguration("connector role is not set"));
        }
        if let Some(handle) = self.worker.take() {
            if self.shared.worker_alive.load(Ordering::SeqCst) {
                self.worker = Some(handle);
                return Err(IgtlError::AlreadyRunning);
            }
            // worker exited on its own (e.g. bind failure); reap and restart
            let _ = handle.join();
        }

        self.shared.stop.store(false, Ordering::SeqCst);
        self.shared.worker_alive.store(true, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        let handle = match thread::Builder::new()
            .name(format!("igtl-{}", self.shared.config.name))
            .spawn(move || worker_main(shared))
        {
            Ok(handle) => handle,
            Err(e) => {
                self.shared.worker_alive.store(false, Ordering::SeqCst);
                return Err(IgtlError::Io(e));
            }
        };
        self.worker = Some(handle);

        // The worker also sets this, but not necessarily before start()
        // returns; callers expect the transition to be visible immediately.
        set_state(&self.shared, ConnectorState::WaitingForConnection);
        self.shared.events.emit(&ConnectorEvent::Activated);
        info!(connector = %self.shared.config.name, "activated");
        Ok(())
    }

    /// Stop the worker thread and close the connection
    ///
    /// Force-closes the socket to unblock a receive in progress, then joins
    /// the worker. Returns false when there was nothing to stop.
    pub fn stop(&mut self) -> bool {
        let Some(handle) = self.worker.take() else {
            return false;
        };
        self.shared.stop.store(true, Ordering::SeqCst);
        if let Some(stream) = lock(&self.shared.socket).as_ref() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        let _ = handle.join();
        info!(connector = %self.shared.config.name, "stopped");
        true
    }

    // ---- registries ---------------------------------------------------

    /// Register a converter on this connector's registry
    pub fn register_converter(&self, converter: Arc<dyn Converter>) -> Result<()> {
        lock(&self.shared.converters).register(converter)
    }

    /// Remove a converter from this connector's registry
    pub fn unregister_converter(&self, converter: &Arc<dyn Converter>) {
        lock(&self.shared.converters).unregister(converter);
    }

    /// Pre-register a device (required for inbound data in restricted mode)
    pub fn register_device(
        &self,
        name: &str,
        device_type: &str,
        direction: DirectionMask,
    ) -> u64 {
        lock(&self.shared.devices).register(name, device_type, direction)
    }

    /// Clear direction bits from a device entry
    pub fn unregister_device(
        &self,
        name: &str,
        device_type: &str,
        direction: DirectionMask,
    ) -> bool {
        lock(&self.shared.devices).unregister(name, device_type, direction)
    }

    /// Remove a device entry outright by id
    pub fn unregister_device_id(&self, id: u64) -> bool {
        lock(&self.shared.devices).unregister_id(id)
    }

    /// Device id for a wire (name, type) pair
    pub fn lookup_device(&self, name: &str, device_type: &str) -> Option<u64> {
        lock(&self.shared.devices).lookup(name, device_type)
    }

    /// Snapshot of one device entry
    pub fn device(&self, id: u64) -> Option<DeviceEntry> {
        lock(&self.shared.devices).device(id).cloned()
    }

    /// Snapshot of all device entries
    pub fn devices(&self) -> Vec<DeviceEntry> {
        lock(&self.shared.devices).devices().cloned().collect()
    }

    /// Toggle restricted mode at runtime
    pub fn set_restrict_device_name(&self, restrict: bool) {
        lock(&self.shared.devices).set_restrict(restrict);
    }

    /// Whether restricted mode is active
    pub fn restrict_device_name(&self) -> bool {
        lock(&self.shared.devices).restrict()
    }

    // ---- outgoing path ------------------------------------------------

    /// Subscribe a node for outgoing serialization
    ///
    /// The node's tag must resolve to a registered converter; the converter's
    /// interested events decide which
    /// [`process_node_event`](Connector::process_node_event) calls trigger a
    /// send. The device entry is recorded under the converter's primary wire
    /// type with the outgoing direction.
    pub fn register_outgoing_node(&self, node: SharedNode) -> Result<()> {
        let tag = lock(&node).tag().to_owned();
        let converter = lock(&self.shared.converters)
            .by_application_tag(&tag)
            .ok_or(IgtlError::NoConverterFound(tag))?;
        self.register_outgoing_node_with(node, converter)
    }

    /// Subscribe a node for outgoing serialization with an explicit converter
    ///
    /// Bypasses the tag lookup of
    /// [`register_outgoing_node`](Connector::register_outgoing_node); the
    /// given converter handles this node regardless of its tag.
    pub fn register_outgoing_node_with(
        &self,
        node: SharedNode,
        converter: Arc<dyn Converter>,
    ) -> Result<()> {
        let name = lock(&node).name().to_owned();
        let events: HashSet<NodeEvent> = converter.interested_events().into_iter().collect();
        if let Some(device_type) = converter.wire_types().first().copied() {
            lock(&self.shared.devices).register(&name, device_type, DirectionMask::OUTGOING);
        }
        debug!(node = %name, "registered outgoing node");
        lock(&self.shared.outgoing).insert(
            name,
            OutgoingSubscription {
                node,
                converter,
                events,
            },
        );
        Ok(())
    }

    /// Drop a node's outgoing subscription
    pub fn unregister_outgoing_node(&self, node: &SharedNode) {
        let name = lock(node).name().to_owned();
        let mut outgoing = lock(&self.shared.outgoing);
        if let Some(sub) = outgoing.get(&name) {
            if Arc::ptr_eq(&sub.node, node) {
                outgoing.remove(&name);
            }
        }
    }

    /// Number of nodes subscribed for outgoing serialization
    pub fn outgoing_node_count(&self) -> usize {
        lock(&self.shared.outgoing).len()
    }

    /// Deliver a node mutation event to the outgoing path
    ///
    /// Serializes and sends synchronously on the calling thread when the node
    /// is subscribed and the converter declared interest in `event`;
    /// otherwise a no-op. This is the explicit replacement for observer
    /// wiring on a live object graph: the application reports its node
    /// mutations here.
    pub fn process_node_event(&self, node: &SharedNode, event: NodeEvent) -> Result<()> {
        let name = lock(node).name().to_owned();
        let subscribed = {
            let outgoing = lock(&self.shared.outgoing);
            match outgoing.get(&name) {
                Some(sub) if Arc::ptr_eq(&sub.node, node) && sub.events.contains(&event) => {
                    Some(Arc::clone(&sub.converter))
                }
                _ => None,
            }
        };
        let Some(converter) = subscribed else {
            return Ok(());
        };
        let frame = {
            let guard = lock(node);
            converter.application_to_wire(event, &*guard)?
        };
        match frame {
            Some(mut frame) => self.send_frame(&mut frame),
            None => Ok(()),
        }
    }

    /// Force an immediate one-shot send of a node, independent of the event
    /// subscription path
    ///
    /// The node's converter (subscription first, tag lookup otherwise) is
    /// asked to serialize for [`NodeEvent::Modified`].
    pub fn push_node(&self, node: &SharedNode) -> Result<()> {
        let (name, tag) = {
            let guard = lock(node);
            (guard.name().to_owned(), guard.tag().to_owned())
        };
        let subscribed = lock(&self.shared.outgoing)
            .get(&name)
            .map(|sub| Arc::clone(&sub.converter));
        let converter = match subscribed {
            Some(converter) => converter,
            None => lock(&self.shared.converters)
                .by_application_tag(&tag)
                .ok_or(IgtlError::NoConverterFound(tag))?,
        };
        let frame = {
            let guard = lock(node);
            converter.application_to_wire(NodeEvent::Modified, &*guard)?
        };
        match frame {
            Some(mut frame) => self.send_frame(&mut frame),
            None => Ok(()),
        }
    }

    /// Send an already-framed message
    pub fn send_frame(&self, frame: &mut FramedMessage) -> Result<()> {
        let bytes = frame.pack();
        self.send_data(&bytes)
    }

    /// Send raw, already-packed wire bytes
    ///
    /// Safe to call from any thread; the socket lock serializes the send
    /// against connection lifecycle transitions. Fails with
    /// [`IgtlError::NotConnected`] when no peer is connected.
    pub fn send_data(&self, data: &[u8]) -> Result<()> {
        let mut guard = lock(&self.shared.socket);
        let stream = guard.as_mut().ok_or(IgtlError::NotConnected)?;
        stream.write_all(data)?;
        stream.flush()?;
        trace!(bytes = data.len(), "sent");
        Ok(())
    }

    // ---- incoming path (consumer side) --------------------------------

    /// Register a node as a sink for inbound data
    ///
    /// Matched during [`drain`](Connector::drain) by the node's (tag, name)
    /// pair. When a converter for the tag is known, the device entry is
    /// recorded with the incoming direction.
    pub fn register_incoming_node(&self, node: SharedNode) {
        let (name, tag) = {
            let guard = lock(&node);
            (guard.name().to_owned(), guard.tag().to_owned())
        };
        {
            let mut nodes = lock(&self.shared.incoming_nodes);
            if !nodes.iter().any(|n| Arc::ptr_eq(n, &node)) {
                nodes.push(node);
            }
        }
        let converter = lock(&self.shared.converters).by_application_tag(&tag);
        if let Some(converter) = converter {
            if let Some(device_type) = converter.wire_types().first().copied() {
                lock(&self.shared.devices).register(&name, device_type, DirectionMask::INCOMING);
            }
        }
    }

    /// Remove a node from the inbound sink list
    pub fn unregister_incoming_node(&self, node: &SharedNode) {
        lock(&self.shared.incoming_nodes).retain(|n| !Arc::ptr_eq(n, node));
    }

    /// Number of registered inbound sink nodes
    pub fn incoming_node_count(&self) -> usize {
        lock(&self.shared.incoming_nodes).len()
    }

    /// Device names whose buffers completed a message since the last pull
    pub fn updated_device_names(&self) -> Vec<String> {
        lock(&self.shared.buffers)
            .iter()
            .filter(|(_, buffer)| buffer.is_updated())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// The circular buffer for a device, if one exists yet
    pub fn circular_buffer(&self, device: &str) -> Option<Arc<CircularBuffer>> {
        lock(&self.shared.buffers).get(device).cloned()
    }

    /// Pull every updated buffer and apply converters to application nodes
    ///
    /// Non-blocking; intended to be called at a bounded interval from the
    /// application's main loop. For each updated device the latest completed
    /// message is decoded into the matching registered incoming node, or,
    /// outside restricted mode, into a node resolved (or created) through
    /// the bridge. Returns the number of messages delivered; failed
    /// deliveries are logged and skipped.
    pub fn drain(&self, bridge: &mut dyn ApplicationBridge) -> usize {
        let mut delivered = 0;
        for name in self.updated_device_names() {
            let Some(buffer) = self.circular_buffer(&name) else {
                continue;
            };
            if buffer.start_pull().is_none() {
                continue;
            }
            match self.deliver_pulled(&buffer, &name, bridge) {
                Ok(true) => delivered += 1,
                Ok(false) => {}
                Err(e) => warn!(device = %name, error = %e, "drain delivery failed"),
            }
            buffer.end_pull();
        }
        delivered
    }

    fn deliver_pulled(
        &self,
        buffer: &CircularBuffer,
        name: &str,
        bridge: &mut dyn ApplicationBridge,
    ) -> Result<bool> {
        let Some(slot) = buffer.pull_slot() else {
            return Ok(false);
        };
        let device_type = slot.device_type()?.to_owned();
        let Some(converter) = lock(&self.shared.converters).by_wire_type(&device_type) else {
            debug!(device = %name, device_type = %device_type, "no converter for inbound type");
            return Ok(false);
        };
        let tag = converter.application_tag().to_owned();

        let mut node = None;
        for candidate in lock(&self.shared.incoming_nodes).iter() {
            let guard = lock(candidate.as_ref());
            if guard.tag() == tag && guard.name() == name {
                drop(guard);
                node = Some(Arc::clone(candidate));
                break;
            }
        }
        let node = match node {
            Some(node) => node,
            // In restricted mode unsolicited devices never materialize nodes.
            None if !self.restrict_device_name() => {
                let created = bridge
                    .find_node(&tag, name)
                    .unwrap_or_else(|| bridge.create_node(&tag, name));
                self.register_incoming_node(Arc::clone(&created));
                created
            }
            None => return Ok(false),
        };

        let mut guard = lock(&node);
        converter.wire_to_application(&slot, &mut *guard)?;
        guard.mark_modified();
        Ok(true)
    }

    // ---- socket tuning -------------------------------------------------

    /// Enable or disable TCP_NODELAY on the established connection
    pub fn set_nodelay(&self, nodelay: bool) -> Result<()> {
        let guard = lock(&self.shared.socket);
        let stream = guard.as_ref().ok_or(IgtlError::NotConnected)?;
        stream.set_nodelay(nodelay)?;
        Ok(())
    }

    /// Set the kernel receive buffer (SO_RCVBUF) on the established connection
    pub fn set_recv_buffer_size(&self, size: usize) -> Result<()> {
        let guard = lock(&self.shared.socket);
        let stream = guard.as_ref().ok_or(IgtlError::NotConnected)?;
        set_socket_buffer(stream, libc::SO_RCVBUF, size)
    }

    /// Set the kernel send buffer (SO_SNDBUF) on the established connection
    pub fn set_send_buffer_size(&self, size: usize) -> Result<()> {
        let guard = lock(&self.shared.socket);
        let stream = guard.as_ref().ok_or(IgtlError::NotConnected)?;
        set_socket_buffer(stream, libc::SO_SNDBUF, size)
    }
}

impl Drop for Connector {
    fn drop(&mut self) {
        self.stop();
    }
}

fn set_socket_buffer(stream: &TcpStream, option: libc::c_int, size: usize) -> Result<()> {
    use std::os::fd::AsRawFd;

    let fd = stream.as_raw_fd();
    let size = size as libc::c_int;

    unsafe {
        let ret = libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            option,
            &size as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        );
        if ret != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
    }
    Ok(())
}

fn set_state(shared: &Shared, state: ConnectorState) {
    *lock(&shared.state) = state;
}

// ---- worker thread ------------------------------------------------------

fn worker_main(shared: Arc<Shared>) {
    set_state(&shared, ConnectorState::WaitingForConnection);

    let listener = match shared.config.role {
        ConnectorRole::Server => match bind_listener(&shared) {
            Some(listener) => Some(listener),
            None => {
                finish(&shared);
                return;
            }
        },
        _ => None,
    };

    let mut attempt = 0u32;
    while !shared.stop.load(Ordering::SeqCst) {
        let stream = match (&shared.config.role, &listener) {
            (ConnectorRole::Server, Some(listener)) => accept_connection(&shared, listener),
            (ConnectorRole::Client, _) => connect_to_server(&shared, &mut attempt),
            _ => break,
        };
        let Some(stream) = stream else {
            continue;
        };
        // The worker reads from its own handle; the shared one serves the
        // send path and the force-close in stop().
        let reader = match stream.try_clone() {
            Ok(reader) => reader,
            Err(e) => {
                warn!(error = %e, "failed to clone connection handle");
                continue;
            }
        };
        *lock(&shared.socket) = Some(stream);
        set_state(&shared, ConnectorState::Connected);
        shared.events.emit(&ConnectorEvent::Connected);
        info!(connector = %shared.config.name, "connected");

        receive_loop(&shared, reader);

        if let Some(stream) = lock(&shared.socket).take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        set_state(&shared, ConnectorState::WaitingForConnection);
        shared.events.emit(&ConnectorEvent::Disconnected);
        info!(connector = %shared.config.name, "disconnected");
    }

    finish(&shared);
}

fn finish(shared: &Shared) {
    if let Some(stream) = lock(&shared.socket).take() {
        let _ = stream.shutdown(Shutdown::Both);
    }
    *lock(&shared.bound_port) = None;
    set_state(shared, ConnectorState::Off);
    shared.worker_alive.store(false, Ordering::SeqCst);
    shared.events.emit(&ConnectorEvent::Deactivated);
}

fn bind_listener(shared: &Shared) -> Option<TcpListener> {
    match TcpListener::bind(("0.0.0.0", shared.config.port)) {
        Ok(listener) => {
            if let Err(e) = listener.set_nonblocking(true) {
                warn!(error = %e, "failed to make listener nonblocking");
                return None;
            }
            let port = listener.local_addr().ok().map(|addr| addr.port());
            *lock(&shared.bound_port) = port;
            info!(port = port.unwrap_or(shared.config.port), "listening");
            Some(listener)
        }
        Err(e) => {
            warn!(port = shared.config.port, error = %e, "failed to bind listener");
            None
        }
    }
}

/// Accept one peer, polling so the stop flag is honored promptly
fn accept_connection(shared: &Shared, listener: &TcpListener) -> Option<TcpStream> {
    while !shared.stop.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                // the accepted stream must block; the listener does not
                if let Err(e) = stream.set_nonblocking(false) {
                    warn!(error = %e, "failed to restore blocking mode");
                    continue;
                }
                debug!(%peer, "peer connected");
                return Some(stream);
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(STOP_POLL),
            Err(e) => {
                warn!(error = %e, "accept failed");
                thread::sleep(STOP_POLL);
            }
        }
    }
    None
}

/// One connect attempt; on failure sleeps per the retry policy and returns
/// None so the outer loop re-checks the stop flag
fn connect_to_server(shared: &Shared, attempt: &mut u32) -> Option<TcpStream> {
    let hostname = shared.config.hostname.as_str();
    let port = shared.config.port;
    match try_connect(hostname, port) {
        Ok(stream) => {
            *attempt = 0;
            Some(stream)
        }
        Err(e) => {
            let delay = shared.config.retry.delay_for_attempt(*attempt);
            debug!(%hostname, port, error = %e, ?delay, "connect failed, retrying");
            *attempt = attempt.saturating_add(1);
            sleep_while_running(shared, delay);
            None
        }
    }
}

fn try_connect(hostname: &str, port: u16) -> std::io::Result<TcpStream> {
    let addrs: Vec<SocketAddr> = (hostname, port).to_socket_addrs()?.collect();
    let mut last = std::io::Error::new(ErrorKind::AddrNotAvailable, "no addresses resolved");
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
            Ok(stream) => return Ok(stream),
            Err(e) => last = e,
        }
    }
    Err(last)
}

fn sleep_while_running(shared: &Shared, total: Duration) {
    let mut remaining = total;
    while !shared.stop.load(Ordering::SeqCst) && !remaining.is_zero() {
        let step = remaining.min(STOP_POLL);
        thread::sleep(step);
        remaining = remaining.saturating_sub(step);
    }
}

/// Per-connection receive loop
///
/// Reads exactly one header, then exactly the declared body, directly into
/// the target slot's buffer. Any framing violation or short read drops the
/// connection (the stream position can no longer be trusted); a CRC failure
/// only discards that message.
fn receive_loop(shared: &Shared, mut stream: TcpStream) {
    let mut header_buf = [0u8; Header::SIZE];
    while !shared.stop.load(Ordering::SeqCst) {
        if let Err(e) = stream.read_exact(&mut header_buf) {
            debug!(error = %e, "header read failed, dropping connection");
            break;
        }
        let header = match Header::decode(&header_buf) {
            Ok(header) => header,
            Err(e) => {
                warn!(error = %e, "malformed header, dropping connection");
                break;
            }
        };
        let (name, device_type) = match (header.device_name.as_str(), header.type_name.as_str()) {
            (Ok(name), Ok(device_type)) => (name.to_owned(), device_type.to_owned()),
            _ => {
                warn!("undecodable names in header, dropping connection");
                break;
            }
        };
        if header.body_size > MAX_BODY_SIZE as u64 {
            warn!(declared = header.body_size, "body size beyond wire limit, dropping connection");
            break;
        }
        let body_size = header.body_size as usize;
        trace!(device = %name, device_type = %device_type, body = body_size, "frame header");

        let mut new_device = false;
        {
            let mut devices = lock(&shared.devices);
            if devices.lookup(&name, &device_type).is_none() {
                if devices.restrict() {
                    drop(devices);
                    // consume the body so stream framing stays intact,
                    // deliver nothing
                    if let Err(e) = skip_body(&mut stream, body_size) {
                        debug!(error = %e, "skip failed, dropping connection");
                        break;
                    }
                    trace!(device = %name, "dropped frame from unregistered device");
                    continue;
                }
                devices.register(&name, &device_type, DirectionMask::INCOMING);
                new_device = true;
            }
        }
        if new_device {
            debug!(device = %name, device_type = %device_type, "new device");
            shared.events.emit(&ConnectorEvent::NewDevice {
                name: name.clone(),
                device_type: device_type.clone(),
            });
        }

        let buffer = {
            let mut buffers = lock(&shared.buffers);
            Arc::clone(
                buffers
                    .entry(name.clone())
                    .or_insert_with(|| Arc::new(CircularBuffer::new())),
            )
        };

        buffer.start_push();
        let published = {
            let Some(mut slot) = buffer.push_slot() else {
                break;
            };
            slot.initialize_for_receive();
            slot.set_header(header);
            if slot.allocate_body(body_size).is_err() {
                break;
            }
            if let Err(e) = stream.read_exact(slot.body_mut()) {
                debug!(error = %e, "body read failed, dropping connection");
                break;
            }
            if shared.config.check_crc {
                match slot.unpack_body(true) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(device = %name, error = %e, "discarding message");
                        false
                    }
                }
            } else {
                true
            }
        };
        if published {
            buffer.end_push();
            shared.events.emit(&ConnectorEvent::Receive { device: name });
        }
    }
}

/// Consume `length` body bytes without buffering them
///
/// Constant scratch space so a restricted-mode drop of a large frame costs
/// no allocation.
fn skip_body(stream: &mut TcpStream, length: usize) -> std::io::Result<()> {
    let mut scratch = [0u8; 256];
    let mut remaining = length;
    while remaining > 0 {
        let chunk = remaining.min(scratch.len());
        stream.read_exact(&mut scratch[..chunk])?;
        remaining -= chunk;
    }
    Ok(())
}
