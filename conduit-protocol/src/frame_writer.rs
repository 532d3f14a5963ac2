//! Frame encoding: varint length framing, threshold-gated zlib compression,
//! in-place encryption, and a buffered output ring flushed to the socket.

use std::io::Write;

use flate2::{Compression, write::ZlibEncoder};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::ProtocolError;
use crate::crypto::{Aes128Cfb8Enc, encrypt_in_place, encryptor};
use crate::frame_reader::MAX_FRAME_DATA_SIZE;
use crate::ring::RingBuffer;

/// Default output ring capacity.
pub const OUTPUT_BUFFER_SIZE: usize = 1024 * 1024;

/// Encoder for one direction of a connection.
///
/// Frames are always written to the ring whole; a frame that does not fit
/// after one flush attempt is a [`ProtocolError::BufferOverflow`].
pub struct FrameEncoder {
    ring: RingBuffer,
    cipher: Option<Aes128Cfb8Enc>,
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameEncoder {
    /// Creates an encoder with the default output capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(OUTPUT_BUFFER_SIZE)
    }

    /// Creates an encoder with a custom ring capacity.
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
    /// - If the stream is already encrypting data.
    pub fn set_encryption(&mut self, key: &[u8; 16]) {
        if self.cipher.is_some() {
            panic!("Cannot upgrade a stream that already has a cipher!");
        }
        self.cipher = Some(encryptor(key));
    }

    fn encode_frame(payload: &[u8], compression: Option<i32>) -> Result<Vec<u8>, ProtocolError> {
        use conduit_utils::codec::VarInt;
        use conduit_utils::serial::WriteTo;

        if payload.len() > MAX_FRAME_DATA_SIZE {
            return Err(ProtocolError::FrameTooLarge(payload.len()));
        }

        let mut frame = Vec::with_capacity(payload.len() + 2 * VarInt::MAX_SIZE);
        match compression {
            Some(threshold) if payload.len() >= threshold as usize => {
                let mut body = Vec::with_capacity(payload.len() / 2 + VarInt::MAX_SIZE);
                VarInt::from(payload.len()).write(&mut body)?;
                let mut compressor = ZlibEncoder::new(&mut body, Compression::default());
                compressor
                    .write_all(payload)
                    .map_err(|e| ProtocolError::Compression(e.to_string()))?;
                compressor
                    .finish()
                    .map_err(|e| ProtocolError::Compression(e.to_string()))?;

                VarInt::from(body.len()).write(&mut frame)?;
                frame.extend_from_slice(&body);
            }
            Some(_) => {
                // Below the threshold: a zero data length marks the body raw.
                VarInt::from(payload.len() + 1).write(&mut frame)?;
                VarInt(0).write(&mut frame)?;
                frame.extend_from_slice(payload);
            }
            None => {
                VarInt::from(payload.len()).write(&mut frame)?;
                frame.extend_from_slice(payload);
            }
        }
        Ok(frame)
    }

    /// Frames, optionally compresses, encrypts, and buffers one payload,
    /// flushing once to the socket when the ring is short on space.
    pub async fn send<W: AsyncWrite + Unpin>(
        &mut self,
        sock: &mut W,
        payload: &[u8],
        compression: Option<i32>,
    ) -> Result<(), ProtocolError> {
        let mut frame = Self::encode_frame(payload, compression)?;
        if let Some(cipher) = &mut self.cipher {
            encrypt_in_place(cipher, &mut frame);
        }

        if frame.len() > self.ring.bytes_free() {
            self.flush(sock).await?;
        }
        self.ring.extend(&frame)
    }

    /// Drains the output ring to the socket.
    pub async fn flush<W: AsyncWrite + Unpin>(
        &mut self,
        sock: &mut W,
    ) -> Result<(), ProtocolError> {
        let used = self.ring.bytes_used();
        if used == 0 {
            return Ok(());
        }
        let data = self.ring.take(used)?.into_owned();
        sock.write_all(&data).await.map_err(ProtocolError::Io)?;
        sock.flush().await.map_err(ProtocolError::Io)?;
        Ok(())
    }

    /// The number of buffered bytes awaiting a flush.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.ring.bytes_used()
    }
}
