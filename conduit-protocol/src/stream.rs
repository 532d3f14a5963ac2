//! Per-direction stream contexts and the connection state machine.
//!
//! The input and output contexts of one endpoint are created as a pair and
//! share their state and compression cells, so a transition applied through
//! either is immediately in force on its sibling (same state, opposite
//! direction). The cells are the pairing relation; neither context owns the
//! other.

use std::io::{self, Read};
use std::sync::Arc;

use crossbeam::atomic::AtomicCell;

use crate::ProtocolError;
use crate::frame_reader::FrameBody;
use crate::packet::PacketValue;
use crate::registry::{Direction, ProtocolState, ProtocolVersion};
use conduit_utils::codec::VarInt;
use conduit_utils::serial::ReadFrom;

/// A state-machine decision produced by observing one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    /// The state both streams of the pair move to.
    pub state: ProtocolState,
    /// When set, the compression threshold for both streams; negative
    /// disables compression.
    pub compression: Option<i32>,
}

impl StateChange {
    fn state(state: ProtocolState) -> Self {
        Self {
            state,
            compression: None,
        }
    }
}

/// One direction of an endpoint: which packets it carries and in which
/// state the conversation currently is.
#[derive(Clone)]
pub struct StreamContext {
    direction: Direction,
    version: &'static ProtocolVersion,
    state: Arc<AtomicCell<ProtocolState>>,
    compression: Arc<AtomicCell<Option<i32>>>,
}

impl StreamContext {
    /// Creates the paired (input, output) contexts of one endpoint.
    ///
    /// `input_direction` is the direction of packets arriving on the
    /// socket; the output context carries the opposite direction. Both
    /// start in [`ProtocolState::Handshake`] with compression disabled.
    #[must_use]
    pub fn pair(version: &'static ProtocolVersion, input_direction: Direction) -> (Self, Self) {
        let state = Arc::new(AtomicCell::new(ProtocolState::Handshake));
        let compression = Arc::new(AtomicCell::new(None));
        let input = Self {
            direction: input_direction,
            version,
            state: Arc::clone(&state),
            compression: Arc::clone(&compression),
        };
        let output = Self {
            direction: input_direction.opposite(),
            version,
            state,
            compression,
        };
        (input, output)
    }

    /// The direction of packets this stream carries.
    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// The protocol version in force.
    #[must_use]
    pub fn version(&self) -> &'static ProtocolVersion {
        self.version
    }

    /// The current conversation state.
    #[must_use]
    pub fn state(&self) -> ProtocolState {
        self.state.load()
    }

    /// The compression threshold, when compression is enabled.
    #[must_use]
    pub fn compression_threshold(&self) -> Option<i32> {
        self.compression.load()
    }

    /// Decodes one frame body into a typed packet.
    ///
    /// Reads the leading id varint, resolves the packet type from the table
    /// for this stream's direction and current state, parses the body, and
    /// captures the payload as the packet's clean-encoding cache.
    pub fn read_packet(&self, body: FrameBody) -> Result<PacketValue, ProtocolError> {
        let mut recorder = RecordingReader::new(body);
        let id = VarInt::read(&mut recorder)?.0;
        let state = self.state();
        let ty = self
            .version
            .table(self.direction, state)
            .by_id(id)
            .ok_or(ProtocolError::UnknownPacket {
                id,
                direction: self.direction,
                state,
            })?;
        let root = ty.parse_body(&mut recorder)?;

        // Drain anything the descriptors did not consume so a clean re-emit
        // reproduces the payload exactly.
        let trailing = io::copy(&mut recorder, &mut io::sink()).map_err(ProtocolError::from)?;
        if trailing > 0 {
            log::debug!("{} carried {trailing} undeclared trailing bytes", ty.name);
        }

        Ok(PacketValue::new_parsed(ty, root, recorder.into_seen()))
    }

    /// Applies the built-in transition rules to an observed packet.
    ///
    /// Call after the packet's frame is fully consumed (input side) or
    /// fully written (output side); applying earlier would mis-frame the
    /// bytes that follow.
    #[must_use]
    pub fn handle_packet(&self, packet: &PacketValue) -> Option<StateChange> {
        let state = self.state();
        let ty = packet.packet_type();
        match (state, ty.name) {
            (ProtocolState::Handshake, "Handshake") => match packet.root().int("next_state") {
                Some(1) => Some(StateChange::state(ProtocolState::Status)),
                Some(2) => Some(StateChange::state(ProtocolState::Login)),
                other => {
                    log::warn!("handshake with unsupported next_state {other:?}");
                    None
                }
            },
            (ProtocolState::Login | ProtocolState::Play, "SetCompression")
                if ty.direction == Direction::ClientBound =>
            {
                let threshold = packet.root().int("threshold").unwrap_or(-1);
                Some(StateChange {
                    state,
                    compression: Some(threshold as i32),
                })
            }
            (ProtocolState::Login, "LoginSuccess") if ty.direction == Direction::ClientBound => {
                Some(StateChange::state(ProtocolState::Play))
            }
            _ => None,
        }
    }

    /// Applies a state change to the pair.
    pub fn apply(&self, change: &StateChange) {
        let previous = self.state.swap(change.state);
        if previous != change.state {
            log::debug!("switching state {previous:?} -> {:?}", change.state);
        }
        if let Some(threshold) = change.compression {
            let threshold = (threshold >= 0).then_some(threshold);
            log::debug!("compression threshold set to {threshold:?}");
            self.compression.store(threshold);
        }
    }
}

/// A reader that remembers every byte handed out, so a packet can keep the
/// payload it was parsed from.
struct RecordingReader<R> {
    inner: R,
    seen: Vec<u8>,
}

impl<R: Read> RecordingReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            seen: Vec::new(),
        }
    }

    fn into_seen(self) -> Vec<u8> {
        self.seen
    }
}

impl<R: Read> Read for RecordingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.seen.extend_from_slice(&buf[..n]);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::base_protocol;
    use crate::value::Value;
    use conduit_utils::serial::WriteTo;
    use std::io::Cursor;

    fn body_from(payload: &[u8]) -> FrameBody {
        let mut decoder = crate::frame_reader::FrameDecoder::new();
        let mut framed = Vec::new();
        VarInt::from(payload.len()).write(&mut framed).expect("write");
        framed.extend_from_slice(payload);
        block_on(decoder.recv_from(&mut framed.as_slice())).expect("recv");
        decoder.next_frame(None).expect("decode").expect("frame")
    }

    fn block_on<F: std::future::Future>(fut: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("runtime")
            .block_on(fut)
    }

    fn handshake_payload(next_state: i32) -> Vec<u8> {
        let mut payload = vec![0x00, 47]; // id, protocol_version
        payload.push(9);
        payload.extend_from_slice(b"localhost");
        payload.extend_from_slice(&25565u16.to_be_bytes());
        payload.push(next_state as u8);
        payload
    }

    #[test]
    fn test_pairing_keeps_states_in_lockstep() {
        let (input, output) = StreamContext::pair(base_protocol(), Direction::ServerBound);
        assert_eq!(input.direction(), Direction::ServerBound);
        assert_eq!(output.direction(), Direction::ClientBound);
        assert_eq!(input.state(), ProtocolState::Handshake);

        output.apply(&StateChange {
            state: ProtocolState::Login,
            compression: Some(256),
        });
        assert_eq!(input.state(), ProtocolState::Login);
        assert_eq!(output.state(), ProtocolState::Login);
        assert_eq!(input.compression_threshold(), Some(256));
        assert_eq!(output.compression_threshold(), Some(256));

        // A negative threshold disables compression again.
        input.apply(&StateChange {
            state: ProtocolState::Login,
            compression: Some(-1),
        });
        assert_eq!(output.compression_threshold(), None);
    }

    #[test]
    fn test_handshake_switches_tables() {
        let (input, _output) = StreamContext::pair(base_protocol(), Direction::ServerBound);

        let packet = input.read_packet(body_from(&handshake_payload(2))).expect("read");
        assert_eq!(packet.name(), "Handshake");
        assert_eq!(packet.root().string("server_address"), Some("localhost"));

        let change = input.handle_packet(&packet).expect("transition");
        assert_eq!(change.state, ProtocolState::Login);
        input.apply(&change);

        // The next packet parses against the login table, not handshake.
        let mut login_start = vec![0x00, 5];
        login_start.extend_from_slice(b"steve");
        let packet = input.read_packet(body_from(&login_start)).expect("read");
        assert_eq!(packet.name(), "LoginStart");
        assert_eq!(packet.root().string("username"), Some("steve"));
    }

    #[test]
    fn test_handshake_next_state_status() {
        let (input, _output) = StreamContext::pair(base_protocol(), Direction::ServerBound);
        let packet = input.read_packet(body_from(&handshake_payload(1))).expect("read");
        let change = input.handle_packet(&packet).expect("transition");
        assert_eq!(change.state, ProtocolState::Status);
    }

    #[test]
    fn test_unknown_packet_id() {
        let (input, _output) = StreamContext::pair(base_protocol(), Direction::ServerBound);
        let err = input.read_packet(body_from(&[0x7F])).expect_err("unknown id");
        assert!(matches!(
            err,
            ProtocolError::UnknownPacket {
                id: 0x7F,
                direction: Direction::ServerBound,
                state: ProtocolState::Handshake,
            }
        ));
    }

    #[test]
    fn test_login_success_moves_pair_to_play() {
        let (input, output) = StreamContext::pair(base_protocol(), Direction::ClientBound);
        input.apply(&StateChange {
            state: ProtocolState::Login,
            compression: None,
        });

        let mut payload = vec![0x02];
        let uuid = "11111111-2222-3333-4444-555555555555";
        payload.push(uuid.len() as u8);
        payload.extend_from_slice(uuid.as_bytes());
        payload.push(5);
        payload.extend_from_slice(b"steve");

        let packet = input.read_packet(body_from(&payload)).expect("read");
        assert_eq!(packet.name(), "LoginSuccess");
        let change = input.handle_packet(&packet).expect("transition");
        assert_eq!(change.state, ProtocolState::Play);
        input.apply(&change);
        assert_eq!(output.state(), ProtocolState::Play);
    }

    #[test]
    fn test_set_compression_carries_threshold() {
        let (input, _output) = StreamContext::pair(base_protocol(), Direction::ClientBound);
        input.apply(&StateChange {
            state: ProtocolState::Login,
            compression: None,
        });

        let packet = input.read_packet(body_from(&[0x03, 0xAC, 0x02])).expect("read");
        assert_eq!(packet.name(), "SetCompression");
        let change = input.handle_packet(&packet).expect("transition");
        assert_eq!(change.state, ProtocolState::Login);
        assert_eq!(change.compression, Some(300));
    }

    #[test]
    fn test_clean_packet_reemits_cached_payload() {
        let (input, _output) = StreamContext::pair(base_protocol(), Direction::ClientBound);
        input.apply(&StateChange {
            state: ProtocolState::Play,
            compression: None,
        });

        let mut payload = vec![0x02]; // ChatMessage
        let raw = r#"{"text":"hi"}"#;
        payload.push(raw.len() as u8);
        payload.extend_from_slice(raw.as_bytes());
        payload.push(1); // position

        let packet = input.read_packet(body_from(&payload)).expect("read");
        assert!(!packet.is_dirty());
        assert_eq!(packet.emit().expect("emit"), payload);

        // The second emit is bit-identical to the first.
        assert_eq!(packet.emit().expect("emit"), payload);
    }

    #[test]
    fn test_mutation_dirties_ancestors_and_reencodes() {
        let (input, _output) = StreamContext::pair(base_protocol(), Direction::ClientBound);
        input.apply(&StateChange {
            state: ProtocolState::Login,
            compression: None,
        });

        let mut payload = vec![0x02]; // LoginSuccess
        let uuid = "11111111-2222-3333-4444-555555555555";
        payload.push(uuid.len() as u8);
        payload.extend_from_slice(uuid.as_bytes());
        payload.push(5);
        payload.extend_from_slice(b"steve");

        let mut packet = input.read_packet(body_from(&payload)).expect("read");
        packet.set("username", Value::from("alexa"));
        assert!(packet.is_dirty());

        let reencoded = packet.emit().expect("emit");
        assert_ne!(reencoded, payload);

        // The re-encoded payload parses back to the mutated value.
        let mut cursor = Cursor::new(&reencoded[1..]);
        let ty = packet.packet_type();
        let root = ty.parse_body(&mut cursor).expect("reparse");
        assert_eq!(root.string("username"), Some("alexa"));
    }

    #[test]
    fn test_nested_mutation_dirties_chain() {
        let (input, _output) = StreamContext::pair(base_protocol(), Direction::ClientBound);
        input.apply(&StateChange {
            state: ProtocolState::Play,
            compression: None,
        });

        // PlayerListItem action=2 (update latency), one player.
        let mut payload = vec![0x38, 2, 1];
        payload.extend_from_slice(&[0x22; 16]);
        payload.push(42); // ping

        let mut packet = input.read_packet(body_from(&payload)).expect("read");
        assert!(!packet.is_dirty());

        let data = packet
            .root_mut()
            .get_mut("players")
            .and_then(Value::as_array_mut)
            .and_then(|a| a.get_mut(0))
            .and_then(Value::as_compound_mut)
            .and_then(|p| p.get_mut("data"))
            .and_then(Value::as_compound_mut)
            .expect("data");
        data.set("ping", Value::VarInt(7));

        assert!(packet.is_dirty());
        let reencoded = packet.emit().expect("emit");
        assert_eq!(*reencoded.last().expect("byte"), 7);
    }
}
