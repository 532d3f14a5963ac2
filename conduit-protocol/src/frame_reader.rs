//! Frame decoding: varint length framing over a ring buffer, with optional
//! per-frame zlib compression and AES-128 CFB8 decryption.

use std::io::{self, Cursor, Read};

use flate2::read::ZlibDecoder;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::ProtocolError;
use crate::crypto::{Aes128Cfb8Dec, decrypt_in_place, decryptor};
use crate::ring::RingBuffer;

/// The maximum size of a frame on the wire.
pub const MAX_FRAME_SIZE: usize = 2_097_152;
/// The maximum decompressed size of a frame body.
pub const MAX_FRAME_DATA_SIZE: usize = 8_388_608;
/// Default input ring capacity.
pub const INPUT_BUFFER_SIZE: usize = 64 * 1024;
/// The larger input ring variant, for connections that relay bulk frames.
pub const LARGE_INPUT_BUFFER_SIZE: usize = 1024 * 1024;

/// The payload of one frame.
///
/// Compressed bodies decompress incrementally as they are read, so a large
/// frame is never forced entirely into memory before its fields parse.
pub enum FrameBody {
    /// An uncompressed body.
    Plain(Cursor<Vec<u8>>),
    /// A zlib-compressed body with its declared decompressed length.
    Compressed {
        /// Streaming decompressor over the compressed bytes.
        decoder: Box<ZlibDecoder<Cursor<Vec<u8>>>>,
        /// The decompressed length announced in the frame header.
        declared_len: usize,
    },
}

impl FrameBody {
    fn plain(payload: Vec<u8>) -> Self {
        Self::Plain(Cursor::new(payload))
    }

    fn compressed(payload: Vec<u8>, declared_len: usize) -> Self {
        Self::Compressed {
            decoder: Box::new(ZlibDecoder::new(Cursor::new(payload))),
            declared_len,
        }
    }

    /// The decompressed body length when known up front.
    #[must_use]
    pub fn declared_len(&self) -> Option<usize> {
        match self {
            Self::Plain(_) => None,
            Self::Compressed { declared_len, .. } => Some(*declared_len),
        }
    }
}

impl Read for FrameBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Plain(cursor) => Read::read(cursor, buf),
            Self::Compressed { decoder, .. } => decoder.read(buf),
        }
    }
}

/// Decoder for one direction of a connection.
///
/// Socket bytes land in the ring buffer (decrypted in place when a cipher is
/// active); [`Self::next_frame`] then carves whole frames out of the ring,
/// tolerating partial reads by rewinding to the last frame boundary.
pub struct FrameDecoder {
    ring: RingBuffer,
    cipher: Option<Aes128Cfb8Dec>,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Creates a decoder with the default input capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(INPUT_BUFFER_SIZE)
    }

    /// Creates a decoder with a custom ring capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ring: RingBuffer::new(capacity),
            cipher: None,
        }
    }

    /// NOTE: Encryption can only be set; a stream cannot go back to being
    /// unencrypted.
    ///
    /// # Panics
    /// - If the stream is already decrypting data.
    pub fn set_encryption(&mut self, key: &[u8; 16]) {
        if self.cipher.is_some() {
            panic!("Cannot upgrade a stream that already has a cipher!");
        }
        self.cipher = Some(decryptor(key));
    }

    /// Reads bytes from the socket into the ring buffer, decrypting the
    /// received span in place when a cipher is active.
    ///
    /// Returns the number of bytes read; 0 signals EOF.
    ///
    /// # Errors
    /// - [`ProtocolError::BufferOverflow`] when called while the ring is full.
    pub async fn recv_from<R: AsyncRead + Unpin>(
        &mut self,
        sock: &mut R,
    ) -> Result<usize, ProtocolError> {
        if self.ring.is_full() {
            return Err(ProtocolError::BufferOverflow);
        }
        let n = {
            let window = self.ring.writable_window();
            let n = sock.read(window).await.map_err(ProtocolError::Io)?;
            if n > 0 {
                if let Some(cipher) = &mut self.cipher {
                    decrypt_in_place(cipher, &mut window[..n]);
                }
            }
            n
        };
        self.ring.commit(n);
        Ok(n)
    }

    /// Carves the next whole frame out of the ring buffer.
    ///
    /// Returns `Ok(None)` when the buffered bytes end mid-frame; the read
    /// position is rewound to the frame boundary so the frame re-parses once
    /// more bytes arrive.
    pub fn next_frame(
        &mut self,
        compression: Option<i32>,
    ) -> Result<Option<FrameBody>, ProtocolError> {
        let mark = self.ring.mark();
        match self.read_frame(compression) {
            Ok(body) => Ok(Some(body)),
            Err(ProtocolError::PartialFrame) => {
                self.ring.rewind(mark);
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    fn read_frame(&mut self, compression: Option<i32>) -> Result<FrameBody, ProtocolError> {
        let (length, _) = self.ring.read_varint()?;
        let mut length = usize::try_from(length)
            .map_err(|_| ProtocolError::Malformed(format!("negative frame length {length}")))?;
        if length > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge(length));
        }

        if compression.is_some() {
            let (declared_len, varint_len) = self.ring.read_varint()?;
            let declared_len = usize::try_from(declared_len).map_err(|_| {
                ProtocolError::Malformed(format!("negative data length {declared_len}"))
            })?;
            if varint_len > length {
                return Err(ProtocolError::Malformed(
                    "frame length shorter than its data-length header".into(),
                ));
            }
            length -= varint_len;
            if declared_len > MAX_FRAME_DATA_SIZE {
                return Err(ProtocolError::FrameTooLarge(declared_len));
            }

            let payload = self.ring.take(length)?.into_owned();
            if declared_len == 0 {
                Ok(FrameBody::plain(payload))
            } else {
                Ok(FrameBody::compressed(payload, declared_len))
            }
        } else {
            let payload = self.ring.take(length)?.into_owned();
            Ok(FrameBody::plain(payload))
        }
    }
}
