use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;

/// A boxed future, the dyn-compatible shape for async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Resolves the upstream host and port to a socket address.
pub trait NameResolver: Send + Sync {
    /// Resolves `host:port`; `Ok(None)` when the name has no addresses.
    fn resolve<'a>(&'a self, host: &'a str, port: u16)
    -> BoxFuture<'a, io::Result<Option<SocketAddr>>>;
}

/// The default resolver, backed by the system's DNS.
pub struct DnsResolver;

impl NameResolver for DnsResolver {
    fn resolve<'a>(
        &'a self,
        host: &'a str,
        port: u16,
    ) -> BoxFuture<'a, io::Result<Option<SocketAddr>>> {
        Box::pin(async move {
            let mut addrs = tokio::net::lookup_host((host, port)).await?;
            Ok(addrs.next())
        })
    }
}
