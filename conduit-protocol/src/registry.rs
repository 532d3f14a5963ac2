//! Protocol versions, directions, states, and per-state packet tables.

use rustc_hash::FxHashMap;

use crate::packet::PacketType;

/// Which side is sending: client→server is server-bound, server→client is
/// client-bound.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Direction {
    /// Server → client.
    ClientBound,
    /// Client → server.
    ServerBound,
}

impl Direction {
    /// The other direction.
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Self::ClientBound => Self::ServerBound,
            Self::ServerBound => Self::ClientBound,
        }
    }

    const fn index(self) -> usize {
        match self {
            Self::ClientBound => 0,
            Self::ServerBound => 1,
        }
    }
}

/// The conversation phase; determines which packet-id table is in force.
///
/// A connection always starts out in [`ProtocolState::Handshake`], where the
/// client announces which state it wants to continue in.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ProtocolState {
    /// The initial state; the client sends its intention.
    Handshake,
    /// The server-list ping exchange.
    Status,
    /// Authentication, compression and encryption negotiation.
    Login,
    /// The main in-game state.
    Play,
}

impl ProtocolState {
    const fn index(self) -> usize {
        match self {
            Self::Handshake => 0,
            Self::Status => 1,
            Self::Login => 2,
            Self::Play => 3,
        }
    }
}

/// The packets of one direction and state, indexed by id and by name.
#[derive(Default)]
pub struct PacketTable {
    by_id: FxHashMap<i32, &'static PacketType>,
    by_name: FxHashMap<&'static str, &'static PacketType>,
}

impl PacketTable {
    fn insert(&mut self, packet: &'static PacketType) {
        let replaced = self.by_id.insert(packet.id, packet);
        debug_assert!(replaced.is_none(), "duplicate packet id {}", packet.id);
        let replaced = self.by_name.insert(packet.name, packet);
        debug_assert!(replaced.is_none(), "duplicate packet name {}", packet.name);
    }

    /// Looks a packet type up by id.
    #[must_use]
    pub fn by_id(&self, id: i32) -> Option<&'static PacketType> {
        self.by_id.get(&id).copied()
    }

    /// Looks a packet type up by name.
    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<&'static PacketType> {
        self.by_name.get(name).copied()
    }
}

/// One wire-protocol revision: a packet table per direction and state.
pub struct ProtocolVersion {
    /// The numeric protocol version.
    pub version: i32,
    tables: [[PacketTable; 4]; 2],
}

impl ProtocolVersion {
    pub(crate) fn new(version: i32) -> Self {
        Self {
            version,
            tables: Default::default(),
        }
    }

    pub(crate) fn register(&mut self, packet: PacketType) -> &'static PacketType {
        let packet: &'static PacketType = Box::leak(Box::new(packet));
        self.tables[packet.direction.index()][packet.state.index()].insert(packet);
        packet
    }

    /// The packet table for a direction and state.
    #[must_use]
    pub fn table(&self, direction: Direction, state: ProtocolState) -> &PacketTable {
        &self.tables[direction.index()][state.index()]
    }

    /// Convenience name lookup.
    #[must_use]
    pub fn packet(
        &self,
        direction: Direction,
        state: ProtocolState,
        name: &str,
    ) -> Option<&'static PacketType> {
        self.table(direction, state).by_name(name)
    }
}

/// Resolves a protocol version number to its tables.
///
/// Unknown versions (including the 0 a fresh upstream connection starts
/// with) resolve to the base version.
#[must_use]
pub fn protocol_version(version: i32) -> &'static ProtocolVersion {
    if version == crate::packets::PROTOCOL_47 {
        return &crate::packets::V47;
    }
    base_protocol()
}

/// The base protocol version this build ships.
#[must_use]
pub fn base_protocol() -> &'static ProtocolVersion {
    &crate::packets::V47
}
