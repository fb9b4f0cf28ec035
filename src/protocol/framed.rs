//! Framed message stream
//!
//! Pairs a byte stream (a `TcpStream` in production, an in-memory duplex in
//! tests) with a [`FrameDecoder`] and a read deadline. The deadline can be
//! overridden for a single wait through [`FramedStream::scoped_timeout`], which
//! restores the previous value when the guard is dropped.

use bytes::{Bytes, BytesMut};
use futures::FutureExt;
use std::ops::{Deref, DerefMut};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace, warn};

use super::decoder::FrameDecoder;
use super::message::{Envelope, Message};
use crate::error::{LinkError, LinkResult};

const READ_CHUNK: usize = 4096;

/// A byte stream carrying undelimited JSON messages.
#[derive(Debug)]
pub struct FramedStream<S> {
    io: S,
    decoder: FrameDecoder,
    read_timeout: Duration,
    read_buf: Vec<u8>,
}

impl<S> FramedStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap `io` with the given default read deadline.
    pub fn new(io: S, read_timeout: Duration) -> Self {
        Self {
            io,
            decoder: FrameDecoder::new(),
            read_timeout,
            read_buf: vec![0; READ_CHUNK],
        }
    }

    /// Current read deadline for a single message.
    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Override the read deadline until the returned guard is dropped.
    pub fn scoped_timeout(&mut self, timeout: Duration) -> ScopedReadTimeout<'_, S> {
        let previous = std::mem::replace(&mut self.read_timeout, timeout);
        ScopedReadTimeout {
            stream: self,
            previous,
        }
    }

    /// Serialize and send one message.
    pub async fn send(&mut self, envelope: &Envelope) -> LinkResult<()> {
        let bytes = envelope.to_bytes()?;
        debug!(
            op = %envelope.message.op,
            id = ?envelope.message.transmission_id,
            bytes = bytes.len(),
            "Sending message"
        );
        self.io.write_all(&bytes).await?;
        self.io.flush().await?;
        Ok(())
    }

    /// Receive one complete message within the current read deadline.
    ///
    /// `Ok(None)` means the deadline elapsed. Bytes of a message that was still
    /// arriving stay buffered and are discarded by the next [`drain_stale`].
    ///
    /// [`drain_stale`]: FramedStream::drain_stale
    pub async fn recv(&mut self) -> LinkResult<Option<Message>> {
        let deadline = self.read_timeout;
        match tokio::time::timeout(deadline, self.read_message()).await {
            Ok(result) => result.map(Some),
            Err(_) => {
                trace!(?deadline, pending = self.decoder.pending(), "Read deadline elapsed");
                Ok(None)
            }
        }
    }

    async fn read_message(&mut self) -> LinkResult<Message> {
        loop {
            if let Some(message) = self.decoder.next_message()? {
                debug!(op = %message.op, id = ?message.transmission_id, "Received message");
                return Ok(message);
            }

            let n = self.io.read(&mut self.read_buf).await?;
            if n == 0 {
                self.decoder.finish()?;
                return Err(LinkError::Disconnected { pending_bytes: 0 });
            }
            self.decoder.feed(&self.read_buf[..n]);
        }
    }

    /// Discard anything already received but not yet consumed.
    ///
    /// Polls the socket without blocking, so only bytes that have already
    /// arrived are taken. Returns the discarded bytes, if any.
    pub fn drain_stale(&mut self) -> LinkResult<Option<Bytes>> {
        let mut stale = BytesMut::new();
        stale.extend_from_slice(&self.decoder.take_pending());

        loop {
            match self.io.read(&mut self.read_buf).now_or_never() {
                Some(Ok(0)) | None => break,
                Some(Ok(n)) => stale.extend_from_slice(&self.read_buf[..n]),
                Some(Err(err)) => return Err(err.into()),
            }
        }

        if stale.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }

        warn!(
            bytes = stale.len(),
            data = %String::from_utf8_lossy(&stale),
            "Found old bytes in input"
        );
        Ok(Some(stale.freeze()))
    }

    /// Shut down the write half, signalling the peer.
    pub async fn shutdown(&mut self) -> std::io::Result<()> {
        self.io.shutdown().await
    }

    /// Access the underlying stream.
    pub fn get_ref(&self) -> &S {
        &self.io
    }
}

/// Read-deadline override that restores the previous deadline on drop.
#[derive(Debug)]
pub struct ScopedReadTimeout<'a, S> {
    stream: &'a mut FramedStream<S>,
    previous: Duration,
}

impl<S> Deref for ScopedReadTimeout<'_, S> {
    type Target = FramedStream<S>;

    fn deref(&self) -> &Self::Target {
        self.stream
    }
}

impl<S> DerefMut for ScopedReadTimeout<'_, S> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.stream
    }
}

impl<S> Drop for ScopedReadTimeout<'_, S> {
    fn drop(&mut self) {
        self.stream.read_timeout = self.previous;
    }
}
