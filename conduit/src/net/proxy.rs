//! The proxy controller.
//!
//! Accepts client connections, opens the matching upstream connection, and
//! wires the two endpoints together: packets a handler does not consume are
//! forwarded to the other leg, and a disconnect on either leg cascades to
//! its partner.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use conduit_protocol::registry::{Direction, base_protocol};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::task::TaskTracker;

use crate::net::endpoint::Endpoint;
use crate::net::resolver::{DnsResolver, NameResolver};
use crate::plugin::Plugin;

/// One proxied session: the client-facing and server-facing endpoints.
#[derive(Clone)]
pub struct ProxySession {
    /// The endpoint connected to the player's client.
    pub client: Arc<Endpoint>,
    /// The endpoint connected to the real server.
    pub server: Arc<Endpoint>,
}

/// The listening proxy.
pub struct ProxyServer {
    listener: TcpListener,
    upstream_host: String,
    upstream_port: u16,
    resolver: Arc<dyn NameResolver>,
    plugins: Arc<Vec<Box<dyn Plugin>>>,
    tracker: TaskTracker,
}

impl ProxyServer {
    /// Binds the listening socket.
    pub async fn bind(
        listen: SocketAddr,
        upstream_host: impl Into<String>,
        upstream_port: u16,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(listen).await?;
        log::info!("Listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            upstream_host: upstream_host.into(),
            upstream_port,
            resolver: Arc::new(DnsResolver),
            plugins: Arc::new(Vec::new()),
            tracker: TaskTracker::new(),
        })
    }

    /// Installs the plugin list.
    #[must_use]
    pub fn with_plugins(mut self, plugins: Vec<Box<dyn Plugin>>) -> Self {
        self.plugins = Arc::new(plugins);
        self
    }

    /// Replaces the name resolver.
    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn NameResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// The bound listen address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs the accept loop until a fatal socket error.
    pub async fn run(self) -> io::Result<()> {
        for plugin in self.plugins.iter() {
            plugin.on_enable(&self);
        }
        let result = loop {
            match self.listener.accept().await {
                Ok((sock, addr)) => {
                    log::info!("Incoming connection from {addr}");
                    self.tracker.spawn(start_session(
                        sock,
                        addr,
                        self.upstream_host.clone(),
                        self.upstream_port,
                        Arc::clone(&self.resolver),
                        Arc::clone(&self.plugins),
                        self.tracker.clone(),
                    ));
                }
                Err(err) => {
                    log::error!("Accept failed: {err}");
                    break Err(err);
                }
            }
        };
        for plugin in self.plugins.iter() {
            plugin.on_disable(&self);
        }
        result
    }
}

async fn start_session(
    sock: TcpStream,
    addr: SocketAddr,
    upstream_host: String,
    upstream_port: u16,
    resolver: Arc<dyn NameResolver>,
    plugins: Arc<Vec<Box<dyn Plugin>>>,
    tracker: TaskTracker,
) {
    let upstream_addr = match resolver.resolve(&upstream_host, upstream_port).await {
        Ok(Some(addr)) => addr,
        Ok(None) => {
            log::error!("Upstream {upstream_host}:{upstream_port} has no addresses");
            return;
        }
        Err(err) => {
            log::error!("Could not resolve {upstream_host}:{upstream_port}: {err}");
            return;
        }
    };
    let upstream = match TcpStream::connect(upstream_addr).await {
        Ok(stream) => stream,
        Err(err) => {
            log::error!("Could not connect to upstream {upstream_addr}: {err}");
            return;
        }
    };
    log::debug!("Connected to upstream {upstream_addr}");

    let version = base_protocol();
    let (client, client_driver) =
        Endpoint::new(sock, addr, Direction::ServerBound, version, "client");
    let (server, server_driver) = Endpoint::new(
        upstream,
        upstream_addr,
        Direction::ClientBound,
        version,
        "server",
    );
    client.set_partner(&server);
    server.set_partner(&client);

    // Disconnects cascade across the pair.
    {
        let server_weak = Arc::downgrade(&server);
        client.register_disconnect_handler(Arc::new(move |_reason| {
            if let Some(server) = server_weak.upgrade() {
                server.close("Client disconnected");
            }
        }));
        let client_weak = Arc::downgrade(&client);
        server.register_disconnect_handler(Arc::new(move |_reason| {
            if let Some(client) = client_weak.upgrade() {
                client.close("Server disconnected");
            }
        }));
    }

    let session = ProxySession {
        client: Arc::clone(&client),
        server: Arc::clone(&server),
    };
    for plugin in plugins.iter() {
        plugin.on_connect(&session);
        for entry in plugin.handlers() {
            // Client-bound packets arrive on the server-facing leg.
            let endpoint = match entry.direction {
                Direction::ClientBound => &session.server,
                Direction::ServerBound => &session.client,
            };
            match version.packet(entry.direction, entry.state, entry.packet) {
                Some(ty) => endpoint.register_packet_handler(ty, entry.handler),
                None => log::warn!(
                    "Plugin {} binds unknown packet {:?}/{:?}/{}",
                    plugin.name(),
                    entry.direction,
                    entry.state,
                    entry.packet
                ),
            }
        }
    }
    if !plugins.is_empty() {
        let plugins = Arc::clone(&plugins);
        let session = session.clone();
        client.register_disconnect_handler(Arc::new(move |_reason| {
            for plugin in plugins.iter() {
                plugin.on_disconnect(&session);
            }
        }));
    }

    client.spawn(client_driver, &tracker);
    server.spawn(server_driver, &tracker);
}
