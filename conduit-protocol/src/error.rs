use std::io;

use thiserror::Error;

use crate::registry::{Direction, ProtocolState};

/// An error that can occur while framing or decoding packets.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Not enough bytes buffered to finish the current frame. This is a
    /// control signal, not a failure: the reader rewinds to the last frame
    /// boundary and waits for more bytes.
    #[error("partial frame, more bytes needed")]
    PartialFrame,
    /// A varint ran past its maximum of five bytes.
    #[error("malformed varint longer than 5 bytes")]
    MalformedVarInt,
    /// The ring buffer is full and cannot accept more bytes.
    #[error("buffer overflow")]
    BufferOverflow,
    /// A read ran past the end of the available data.
    #[error("buffer underflow")]
    BufferUnderflow,
    /// A frame declared a length beyond the allowed maximum.
    #[error("frame of {0} bytes exceeds maximum length")]
    FrameTooLarge(usize),
    /// The packet id is not present in the table for the stream's
    /// direction and state.
    #[error("unknown packet id {id:#04x} for {direction:?}/{state:?}")]
    UnknownPacket {
        /// The id read off the wire.
        id: i32,
        /// The direction of the stream the packet arrived on.
        direction: Direction,
        /// The state the stream was in.
        state: ProtocolState,
    },
    /// A switch selector produced a key with no matching arm.
    #[error("no variant for key {key} in field `{field}`")]
    UnknownVariant {
        /// The name of the switch field.
        field: &'static str,
        /// The selector result.
        key: i64,
    },
    /// Failed to decompress a frame body.
    #[error("failed to decompress frame: {0}")]
    Decompression(String),
    /// Failed to compress a frame body.
    #[error("failed to compress frame: {0}")]
    Compression(String),
    /// A field value did not match its descriptor.
    #[error("malformed packet field: {0}")]
    Malformed(String),
    /// The connection has closed.
    #[error("the connection has closed")]
    ConnectionClosed,
    /// An error occurred when sending a packet.
    #[error("send failed: {0}")]
    Send(String),
    /// An underlying I/O error.
    #[error(transparent)]
    Io(io::Error),
}

impl From<io::Error> for ProtocolError {
    fn from(value: io::Error) -> Self {
        if value.kind() == io::ErrorKind::UnexpectedEof {
            Self::BufferUnderflow
        } else {
            Self::Io(value)
        }
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(value: serde_json::Error) -> Self {
        Self::Malformed(value.to_string())
    }
}
