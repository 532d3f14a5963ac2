//! The plugin host and the collaborator interfaces plugins build on.
//!
//! A plugin is a record of optional lifecycle hooks plus a list of packet
//! handlers; the proxy registers the handlers on the right leg of every
//! session, ahead of the default forwarding. A handler returning `true`
//! consumes its packet, suppressing forwarding (it may re-send a modified
//! packet itself).

use std::collections::HashMap;
use std::io;

use conduit_protocol::registry::{Direction, ProtocolState};
use parking_lot::Mutex;

use crate::net::endpoint::PacketHandler;
use crate::net::proxy::{ProxyServer, ProxySession};
use crate::plugins::commands::ChatCommandPlugin;

/// A packet handler binding declared by a plugin.
pub struct PluginHandler {
    /// The direction of the packets to intercept.
    pub direction: Direction,
    /// The state the packet lives in.
    pub state: ProtocolState,
    /// The packet name.
    pub packet: &'static str,
    /// The handler itself.
    pub handler: PacketHandler,
}

/// A proxy plugin.
pub trait Plugin: Send + Sync {
    /// The plugin's name, used in logs and CLI activation.
    fn name(&self) -> &'static str;

    /// Called once when the proxy starts listening.
    fn on_enable(&self, _server: &ProxyServer) {}

    /// Called once when the proxy stops.
    fn on_disable(&self, _server: &ProxyServer) {}

    /// Called for every new proxied session.
    fn on_connect(&self, _session: &ProxySession) {}

    /// Called when a proxied session tears down.
    fn on_disconnect(&self, _session: &ProxySession) {}

    /// The packet handlers this plugin wants installed per session.
    fn handlers(&self) -> Vec<PluginHandler> {
        Vec::new()
    }
}

/// Instantiates a built-in plugin from a CLI activation of the form
/// `name` or `name:arg,arg`.
#[must_use]
pub fn load_plugin(activation: &str) -> Option<Box<dyn Plugin>> {
    let (name, args) = match activation.split_once(':') {
        Some((name, args)) => (name, args.split(',').map(str::to_owned).collect()),
        None => (activation, Vec::new()),
    };
    match name {
        "commands" => Some(Box::new(ChatCommandPlugin::new(args))),
        _ => None,
    }
}

/// A byte-keyed store plugins may persist session-independent data in.
pub trait KeyValueStore: Send + Sync {
    /// The value for a key, if any.
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;
    /// Stores a value under a key.
    fn set(&self, key: &[u8], value: &[u8]);
    /// Whether a key is present.
    fn exists(&self, key: &[u8]) -> bool;
    /// Removes a key, reporting whether it was present.
    fn delete(&self, key: &[u8]) -> bool;
}

/// An in-process [`KeyValueStore`].
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, key: &[u8], value: &[u8]) {
        self.entries.lock().insert(key.to_vec(), value.to_vec());
    }

    fn exists(&self, key: &[u8]) -> bool {
        self.entries.lock().contains_key(key)
    }

    fn delete(&self, key: &[u8]) -> bool {
        self.entries.lock().remove(key).is_some()
    }
}

/// A remote-administration channel to the upstream server.
pub trait RemoteAdmin: Send + Sync {
    /// Executes a console command, returning its response text.
    fn execute(&self, command: &str) -> io::Result<String>;
}
