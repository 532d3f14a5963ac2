//! One leg of a proxied connection.
//!
//! An endpoint owns a socket plus a paired input/output stream context. A
//! reader task decodes frames from the socket and dispatches packets to
//! handlers; a writer task drains an unbounded queue of outgoing packets,
//! which also serializes all writes for the endpoint.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use conduit_protocol::ProtocolError;
use conduit_protocol::frame_reader::{FrameDecoder, LARGE_INPUT_BUFFER_SIZE};
use conduit_protocol::frame_writer::FrameEncoder;
use conduit_protocol::packet::{PacketType, PacketValue};
use conduit_protocol::registry::{Direction, ProtocolState, ProtocolVersion};
use conduit_protocol::stream::StreamContext;
use conduit_protocol::value::Value;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::select;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// An error raised by a packet handler.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// A packet handler. Returning `true` consumes the packet and stops
/// dispatch, which also suppresses the default forwarding.
pub type PacketHandler =
    Arc<dyn Fn(&Arc<Endpoint>, &mut PacketValue) -> Result<bool, HandlerError> + Send + Sync>;

/// A disconnect handler; receives the disconnect reason.
pub type DisconnectHandler = Arc<dyn Fn(&str) + Send + Sync>;

enum Outgoing {
    Packet(PacketValue),
    EnableEncryption([u8; 16]),
    Shutdown,
}

enum InputControl {
    EnableEncryption([u8; 16]),
}

/// The I/O half of a freshly constructed endpoint, consumed by
/// [`Endpoint::spawn`].
pub struct EndpointDriver {
    read_half: OwnedReadHalf,
    write_half: OwnedWriteHalf,
    decoder: FrameDecoder,
    encoder: FrameEncoder,
    input: StreamContext,
    output: StreamContext,
    outgoing_rx: UnboundedReceiver<Outgoing>,
    control_rx: UnboundedReceiver<InputControl>,
}

/// One leg of a proxied connection.
pub struct Endpoint {
    label: &'static str,
    peer: SocketAddr,
    input: StreamContext,
    output: StreamContext,
    outgoing: UnboundedSender<Outgoing>,
    control: UnboundedSender<InputControl>,
    cancel: CancellationToken,
    connected: AtomicBool,
    disconnect_reason: OnceLock<String>,
    handlers: Mutex<FxHashMap<(ProtocolState, &'static str), Vec<PacketHandler>>>,
    disconnect_handlers: Mutex<Vec<DisconnectHandler>>,
    partner: OnceLock<Weak<Endpoint>>,
}

impl Endpoint {
    /// Creates an endpoint over a connected socket.
    ///
    /// `input_direction` is the direction of packets arriving on the
    /// socket: server-bound for the client-facing leg, client-bound for
    /// the server-facing leg.
    #[must_use]
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        input_direction: Direction,
        version: &'static ProtocolVersion,
        label: &'static str,
    ) -> (Arc<Self>, EndpointDriver) {
        if let Err(err) = stream.set_nodelay(true) {
            log::debug!("{label}: could not set TCP_NODELAY: {err}");
        }
        let (read_half, write_half) = stream.into_split();
        let (input, output) = StreamContext::pair(version, input_direction);
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let (control, control_rx) = mpsc::unbounded_channel();

        let endpoint = Arc::new(Self {
            label,
            peer,
            input: input.clone(),
            output: output.clone(),
            outgoing,
            control,
            cancel: CancellationToken::new(),
            connected: AtomicBool::new(true),
            disconnect_reason: OnceLock::new(),
            handlers: Mutex::new(FxHashMap::default()),
            disconnect_handlers: Mutex::new(Vec::new()),
            partner: OnceLock::new(),
        });
        let driver = EndpointDriver {
            read_half,
            write_half,
            // The larger input ring; proxied play-state frames routinely
            // exceed the 64 KiB default.
            decoder: FrameDecoder::with_capacity(LARGE_INPUT_BUFFER_SIZE),
            encoder: FrameEncoder::new(),
            input,
            output,
            outgoing_rx,
            control_rx,
        };
        (endpoint, driver)
    }

    /// Starts the reader and writer tasks.
    pub fn spawn(self: &Arc<Self>, driver: EndpointDriver, tracker: &TaskTracker) {
        let EndpointDriver {
            read_half,
            write_half,
            decoder,
            encoder,
            input,
            output,
            outgoing_rx,
            control_rx,
        } = driver;
        tracker.spawn(run_reader(
            Arc::clone(self),
            read_half,
            decoder,
            input,
            control_rx,
        ));
        tracker.spawn(run_writer(
            Arc::clone(self),
            write_half,
            encoder,
            output,
            outgoing_rx,
        ));
    }

    /// A short label for logs ("client" or "server").
    #[must_use]
    pub fn label(&self) -> &'static str {
        self.label
    }

    /// The remote address of the socket.
    #[must_use]
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// The current conversation state.
    #[must_use]
    pub fn state(&self) -> ProtocolState {
        self.input.state()
    }

    /// Whether the endpoint is still connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// The disconnect reason, once set.
    #[must_use]
    pub fn disconnect_reason(&self) -> Option<&str> {
        self.disconnect_reason.get().map(String::as_str)
    }

    /// Pairs this endpoint with the other leg of the session. The partner
    /// is held weakly; the session owns both endpoints.
    pub fn set_partner(&self, partner: &Arc<Endpoint>) {
        let _ = self.partner.set(Arc::downgrade(partner));
    }

    /// The other leg of the session, while it is alive.
    #[must_use]
    pub fn partner(&self) -> Option<Arc<Endpoint>> {
        self.partner.get().and_then(Weak::upgrade)
    }

    /// Registers a packet handler for a packet type. Handlers run in
    /// registration order until one consumes the packet.
    pub fn register_packet_handler(&self, ty: &'static PacketType, handler: PacketHandler) {
        self.handlers
            .lock()
            .entry((ty.state, ty.name))
            .or_default()
            .push(handler);
    }

    /// Removes a previously registered packet handler.
    pub fn unregister_packet_handler(&self, ty: &'static PacketType, handler: &PacketHandler) {
        let mut handlers = self.handlers.lock();
        if let Some(list) = handlers.get_mut(&(ty.state, ty.name)) {
            list.retain(|h| !Arc::ptr_eq(h, handler));
        }
    }

    /// Registers a disconnect handler. Handlers run once, on close.
    pub fn register_disconnect_handler(&self, handler: DisconnectHandler) {
        self.disconnect_handlers.lock().push(handler);
    }

    /// Removes a previously registered disconnect handler.
    pub fn unregister_disconnect_handler(&self, handler: &DisconnectHandler) {
        self.disconnect_handlers
            .lock()
            .retain(|h| !Arc::ptr_eq(h, handler));
    }

    /// Queues a packet for the socket. Packets reach the wire in call
    /// order.
    pub fn send(&self, packet: PacketValue) -> Result<(), ProtocolError> {
        if !self.is_connected() {
            return Err(ProtocolError::ConnectionClosed);
        }
        if packet.packet_type().direction != self.output.direction() {
            log::warn!(
                "{}: sending {} against the stream direction {:?}",
                self.label,
                packet.name(),
                self.output.direction()
            );
        }
        self.outgoing
            .send(Outgoing::Packet(packet))
            .map_err(|err| ProtocolError::Send(err.to_string()))
    }

    /// Arms the AES-128 CFB8 ciphers on both halves of this endpoint at
    /// their next frame boundary. May be called at most once.
    pub fn enable_encryption(&self, secret: [u8; 16]) {
        let _ = self.control.send(InputControl::EnableEncryption(secret));
        let _ = self.outgoing.send(Outgoing::EnableEncryption(secret));
    }

    /// Closes the endpoint: records the reason (first writer wins), queues
    /// a terminal disconnect packet on client-bound output legs, shuts the
    /// writer down after it flushes, and runs the disconnect handlers.
    ///
    /// Idempotent; later calls are no-ops.
    pub fn close(&self, reason: &str) {
        let _ = self.disconnect_reason.set(reason.to_owned());
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        let reason = self.disconnect_reason.get().map_or(reason, String::as_str);
        log::info!("{}: disconnect: {reason}", self.label);

        if self.output.direction() == Direction::ClientBound {
            if let Some(packet) = self.disconnect_packet(reason) {
                let _ = self.outgoing.send(Outgoing::Packet(packet));
            }
        }
        if self.outgoing.send(Outgoing::Shutdown).is_err() {
            // The writer is already gone; stop the reader directly.
            self.cancel.cancel();
        }

        let handlers: Vec<DisconnectHandler> = std::mem::take(&mut *self.disconnect_handlers.lock());
        for handler in handlers {
            handler(reason);
        }
    }

    fn disconnect_packet(&self, reason: &str) -> Option<PacketValue> {
        let (state, name) = match self.output.state() {
            ProtocolState::Login => (ProtocolState::Login, "LoginDisconnect"),
            ProtocolState::Play => (ProtocolState::Play, "Disconnect"),
            ProtocolState::Handshake | ProtocolState::Status => return None,
        };
        let ty = self
            .output
            .version()
            .packet(Direction::ClientBound, state, name)?;
        ty.make(vec![(
            "reason",
            Value::Json(serde_json::json!({ "text": reason })),
        )])
        .ok()
    }

    /// Waits for the next packet of one of the given types, observing
    /// without consuming. Returns `None` on timeout (the endpoint stays
    /// open) or on disconnect.
    pub async fn wait_for_packet(
        self: &Arc<Self>,
        types: &[&'static PacketType],
        timeout: Duration,
    ) -> Option<PacketValue> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Option<PacketValue>>();

        let observer: PacketHandler = {
            let tx = tx.clone();
            Arc::new(move |_, packet: &mut PacketValue| {
                let _ = tx.send(Some(packet.clone()));
                Ok(false)
            })
        };
        let on_disconnect: DisconnectHandler = Arc::new(move |_reason: &str| {
            let _ = tx.send(None);
        });

        for &ty in types {
            self.register_packet_handler(ty, Arc::clone(&observer));
        }
        self.register_disconnect_handler(Arc::clone(&on_disconnect));

        let result = tokio::time::timeout(timeout, rx.recv()).await;

        for &ty in types {
            self.unregister_packet_handler(ty, &observer);
        }
        self.unregister_disconnect_handler(&on_disconnect);

        match result {
            Ok(Some(Some(packet))) => Some(packet),
            _ => None,
        }
    }

    /// Runs registered handlers for a packet in order; when none consumes
    /// it, forwards it to the partner endpoint.
    fn dispatch(self: &Arc<Self>, mut packet: PacketValue) -> Result<(), HandlerError> {
        let ty = packet.packet_type();
        let handlers = self.handlers.lock().get(&(ty.state, ty.name)).cloned();
        if let Some(handlers) = handlers {
            for handler in handlers {
                if handler(self, &mut packet)? {
                    return Ok(());
                }
            }
        }
        self.forward(packet);
        Ok(())
    }

    fn forward(&self, packet: PacketValue) {
        let Some(partner) = self.partner() else {
            log::debug!("{}: no partner, dropping {}", self.label, packet.name());
            return;
        };
        if let Err(err) = partner.send(packet) {
            log::warn!("{}: failed to forward packet: {err}", self.label);
        }
    }
}

async fn run_reader(
    endpoint: Arc<Endpoint>,
    mut read_half: OwnedReadHalf,
    mut decoder: FrameDecoder,
    input: StreamContext,
    mut control_rx: UnboundedReceiver<InputControl>,
) {
    'outer: loop {
        select! {
            () = endpoint.cancel.cancelled() => break,
            control = control_rx.recv() => {
                if let Some(InputControl::EnableEncryption(secret)) = control {
                    decoder.set_encryption(&secret);
                }
            }
            received = decoder.recv_from(&mut read_half) => {
                match received {
                    Ok(0) => {
                        endpoint.close("Connection closed");
                        break;
                    }
                    Ok(_) => loop {
                        match decoder.next_frame(input.compression_threshold()) {
                            Ok(Some(body)) => {
                                let packet = match input.read_packet(body) {
                                    Ok(packet) => packet,
                                    Err(err) => {
                                        log::warn!("{}: protocol error: {err}", endpoint.label);
                                        endpoint.close(&format!("Protocol error: {err}"));
                                        break 'outer;
                                    }
                                };
                                log::trace!("{} recv {packet}", endpoint.label);

                                // The transition applies only after the frame
                                // is fully consumed and dispatched; the next
                                // buffered frame already obeys it.
                                let change = input.handle_packet(&packet);
                                if let Err(err) = endpoint.dispatch(packet) {
                                    log::error!(
                                        "{}: handler raised: {err}",
                                        endpoint.label
                                    );
                                    endpoint.close(&format!("Handler error: {err}"));
                                    break 'outer;
                                }
                                if let Some(change) = change {
                                    input.apply(&change);
                                }
                            }
                            Ok(None) => break,
                            Err(err) => {
                                log::warn!("{}: framing error: {err}", endpoint.label);
                                endpoint.close(&format!("Framing error: {err}"));
                                break 'outer;
                            }
                        }
                    },
                    Err(err) => {
                        endpoint.close(&err.to_string());
                        break;
                    }
                }
            }
        }
    }
    endpoint.cancel.cancel();
}

async fn run_writer(
    endpoint: Arc<Endpoint>,
    mut write_half: OwnedWriteHalf,
    mut encoder: FrameEncoder,
    output: StreamContext,
    mut outgoing_rx: UnboundedReceiver<Outgoing>,
) {
    loop {
        select! {
            () = endpoint.cancel.cancelled() => break,
            message = outgoing_rx.recv() => {
                match message {
                    Some(Outgoing::Packet(packet)) => {
                        let result = write_packet(&mut encoder, &mut write_half, &output, &packet).await;
                        match result {
                            Ok(()) => {
                                log::trace!("{} send {packet}", endpoint.label);
                                if let Some(change) = output.handle_packet(&packet) {
                                    output.apply(&change);
                                }
                            }
                            Err(err) => {
                                log::warn!("{}: failed to send packet: {err}", endpoint.label);
                                endpoint.close(&err.to_string());
                                break;
                            }
                        }
                        if outgoing_rx.is_empty() {
                            if let Err(err) = encoder.flush(&mut write_half).await {
                                log::warn!("{}: flush failed: {err}", endpoint.label);
                                endpoint.close(&err.to_string());
                                break;
                            }
                        }
                    }
                    Some(Outgoing::EnableEncryption(secret)) => {
                        // Flush plaintext before the cipher arms.
                        if let Err(err) = encoder.flush(&mut write_half).await {
                            log::warn!("{}: flush failed: {err}", endpoint.label);
                            endpoint.close(&err.to_string());
                            break;
                        }
                        encoder.set_encryption(&secret);
                    }
                    Some(Outgoing::Shutdown) | None => break,
                }
            }
        }
    }
    let _ = encoder.flush(&mut write_half).await;
    let _ = tokio::io::AsyncWriteExt::shutdown(&mut write_half).await;
    endpoint.cancel.cancel();
}

async fn write_packet(
    encoder: &mut FrameEncoder,
    write_half: &mut OwnedWriteHalf,
    output: &StreamContext,
    packet: &PacketValue,
) -> Result<(), ProtocolError> {
    let payload = packet.emit()?;
    encoder
        .send(write_half, &payload, output.compression_threshold())
        .await
}
