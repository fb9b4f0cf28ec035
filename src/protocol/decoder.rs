//! Frame decoder for undelimited JSON streams
//!
//! The server sends bare JSON objects back to back with no length prefix and no
//! delimiter. A frame is complete the moment the accumulated bytes parse as one
//! well-formed JSON value. Bytes that follow a complete value stay buffered for
//! the next call.

use bytes::{Buf, Bytes, BytesMut};
use serde_json::Value;

use super::message::{Envelope, Message};
use crate::error::{LinkError, LinkResult};

/// Accumulates raw socket bytes and yields complete messages.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Append bytes read from the socket.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Number of bytes buffered but not yet decoded.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Whether the buffer holds nothing but whitespace.
    pub fn is_idle(&self) -> bool {
        self.buffer.iter().all(u8::is_ascii_whitespace)
    }

    /// Remove and return everything buffered.
    pub fn take_pending(&mut self) -> Bytes {
        self.buffer.split().freeze()
    }

    /// Try to decode the next complete message.
    ///
    /// Returns `Ok(None)` while the buffered bytes are an incomplete value.
    /// A complete value that is not a message envelope is consumed and reported
    /// as [`LinkError::MalformedMessage`]. Bytes that can never become valid JSON
    /// are discarded and reported as [`LinkError::Framing`].
    pub fn next_message(&mut self) -> LinkResult<Option<Message>> {
        let (next, consumed) = {
            let mut values =
                serde_json::Deserializer::from_slice(&self.buffer).into_iter::<Value>();
            let next = values.next();
            (next, values.byte_offset())
        };

        match next {
            None => {
                // Only whitespace left
                self.buffer.clear();
                Ok(None)
            }
            Some(Ok(value)) => {
                self.buffer.advance(consumed);
                let envelope: Envelope = serde_json::from_value(value.clone()).map_err(|err| {
                    LinkError::MalformedMessage(format!("{err}: {value}"))
                })?;
                Ok(Some(envelope.message))
            }
            Some(Err(err)) if err.is_eof() => Ok(None),
            Some(Err(err)) => {
                let garbage = String::from_utf8_lossy(&self.buffer).into_owned();
                self.buffer.clear();
                Err(LinkError::Framing(format!("{err} in {garbage:?}")))
            }
        }
    }

    /// Signal end of stream.
    ///
    /// A partially received message at this point can never complete.
    pub fn finish(&mut self) -> LinkResult<()> {
        if self.is_idle() {
            self.buffer.clear();
            Ok(())
        } else {
            let pending_bytes = self.buffer.len();
            self.buffer.clear();
            Err(LinkError::Disconnected { pending_bytes })
        }
    }
}
