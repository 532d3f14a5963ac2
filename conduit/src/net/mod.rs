//! Endpoints, the proxy controller, and name resolution.

pub(crate) mod endpoint;
/// The proxy controller: accept loop, session pairing, cascade teardown.
pub mod proxy;
/// Hostname resolution for the upstream connection.
pub mod resolver;

pub use endpoint::{DisconnectHandler, Endpoint, EndpointDriver, HandlerError, PacketHandler};
pub use proxy::{ProxyServer, ProxySession};
