//! Transmission correlator
//!
//! Stamps each outbound request with the next transmission id and matches the
//! inbound response carrying that id. Only one request is ever outstanding; the
//! bounded skip of mismatched ids absorbs the occasional stray or duplicate frame
//! the server emits, it is not pipelining.

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::warn;

use super::framed::FramedStream;
use super::message::{Envelope, Message, Parameters, TransmissionId};
use super::parse_failure::ParseFailure;
use crate::error::{LinkError, LinkResult};

/// Mismatched responses tolerated before a request is abandoned.
pub const DEFAULT_MAX_CORRELATION_ATTEMPTS: u32 = 5;

/// Issues transmission ids and matches responses to them.
#[derive(Debug, Clone)]
pub struct Correlator {
    last_id: TransmissionId,
    max_attempts: u32,
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CORRELATION_ATTEMPTS)
    }
}

impl Correlator {
    /// Create a correlator; `max_attempts` is clamped to at least one.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            last_id: TransmissionId::default(),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Id of the most recently issued request (0 before the first).
    pub fn last_id(&self) -> TransmissionId {
        self.last_id
    }

    /// Mismatch budget per request.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Advance the counter and build the request envelope.
    pub fn next_request(&mut self, op: &str, parameters: Parameters) -> Envelope {
        self.last_id = self.last_id.next();
        Envelope::new(Message::request(self.last_id, op, parameters))
    }

    /// Receive until the response to `request` arrives.
    ///
    /// A `parse_fail` reply is returned as [`LinkError::RemoteParse`] right away.
    /// Messages carrying another id are skipped; once `max_attempts` of them have
    /// been seen the request fails with [`LinkError::CorrelationExhausted`].
    pub async fn await_match<S>(
        &self,
        stream: &mut FramedStream<S>,
        request: &Envelope,
    ) -> LinkResult<Message>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let expected = request.message.transmission_id.ok_or_else(|| {
            LinkError::MalformedMessage(format!("request without transmission id: {request}"))
        })?;
        let mut attempts = 0;

        loop {
            let message = stream
                .recv()
                .await?
                .ok_or_else(|| LinkError::ResponseTimeout {
                    operation: request.message.op.clone(),
                    timeout: stream.read_timeout(),
                })?;

            if message.is_parse_failure() {
                return Err(LinkError::RemoteParse {
                    failure: ParseFailure::from_parameters(&message.parameters),
                    original: request.to_string(),
                });
            }

            if message.transmission_id == Some(expected) {
                return Ok(message);
            }

            attempts += 1;
            warn!(
                %expected,
                received = ?message.transmission_id,
                op = %message.op,
                attempt = attempts,
                "Received response from wrong transmission_id"
            );
            if attempts >= self.max_attempts {
                return Err(LinkError::CorrelationExhausted {
                    expected,
                    attempts,
                    last_seen: message.to_string(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ParseFailureCode;
    use serde_json::json;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncWriteExt, DuplexStream};

    fn frame(id: u64, op: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "message": {"transmission_id": [id], "op": op, "parameters": {"status": [0], "id": id}}
        }))
        .unwrap()
    }

    async fn stream_with(frames: &[Vec<u8>]) -> (FramedStream<DuplexStream>, DuplexStream) {
        let (client, mut server) = duplex(64 * 1024);
        for f in frames {
            server.write_all(f).await.unwrap();
        }
        (FramedStream::new(client, Duration::from_millis(200)), server)
    }

    #[test]
    fn test_ids_increase_monotonically() {
        let mut correlator = Correlator::default();
        let first = correlator.next_request("a", Parameters::new());
        let second = correlator.next_request("b", Parameters::new());
        assert_eq!(first.message.transmission_id, Some(TransmissionId(1)));
        assert_eq!(second.message.transmission_id, Some(TransmissionId(2)));
        assert_eq!(correlator.last_id(), TransmissionId(2));
    }

    #[tokio::test]
    async fn test_matching_response_is_returned() {
        let mut correlator = Correlator::default();
        let request = correlator.next_request("poll_wave_m", Parameters::new());
        let (mut stream, _server) = stream_with(&[frame(1, "poll_wave_m")]).await;

        let response = correlator.await_match(&mut stream, &request).await.unwrap();
        assert_eq!(response.parameters["id"], json!(1));
    }

    #[tokio::test]
    async fn test_stale_frames_below_bound_are_skipped() {
        let mut correlator = Correlator::default();
        for _ in 0..9 {
            correlator.next_request("noop", Parameters::new());
        }
        let request = correlator.next_request("poll_wave_m", Parameters::new());

        let mut frames: Vec<_> = (6..10).map(|id| frame(id, "noop")).collect();
        frames.push(frame(10, "poll_wave_m"));
        let (mut stream, _server) = stream_with(&frames).await;

        let response = correlator.await_match(&mut stream, &request).await.unwrap();
        assert_eq!(response.transmission_id, Some(TransmissionId(10)));
    }

    #[tokio::test]
    async fn test_stale_frames_at_bound_exhaust() {
        let mut correlator = Correlator::default();
        for _ in 0..9 {
            correlator.next_request("noop", Parameters::new());
        }
        let request = correlator.next_request("poll_wave_m", Parameters::new());

        let mut frames: Vec<_> = (5..10).map(|id| frame(id, "noop")).collect();
        frames.push(frame(10, "poll_wave_m"));
        let (mut stream, _server) = stream_with(&frames).await;

        match correlator.await_match(&mut stream, &request).await {
            Err(LinkError::CorrelationExhausted { expected, attempts, .. }) => {
                assert_eq!(expected, TransmissionId(10));
                assert_eq!(attempts, DEFAULT_MAX_CORRELATION_ATTEMPTS);
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_parse_fail_is_not_retried() {
        let mut correlator = Correlator::default();
        let request = correlator.next_request("bogus", Parameters::new());
        let reply = serde_json::to_vec(&json!({
            "message": {"transmission_id": [1], "op": "parse_fail", "parameters": {"protocol_error": [7]}}
        }))
        .unwrap();
        let (mut stream, _server) = stream_with(&[reply]).await;

        match correlator.await_match(&mut stream, &request).await {
            Err(LinkError::RemoteParse { failure, original }) => {
                assert_eq!(failure.code, ParseFailureCode::UnknownOp);
                assert!(original.contains("bogus"));
            }
            other => panic!("expected remote parse error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_silence_is_a_response_timeout() {
        let mut correlator = Correlator::default();
        let request = correlator.next_request("status", Parameters::new());
        let (mut stream, _server) = stream_with(&[]).await;

        assert!(matches!(
            correlator.await_match(&mut stream, &request).await,
            Err(LinkError::ResponseTimeout { .. })
        ));
    }

    #[test]
    fn test_attempt_bound_is_clamped() {
        assert_eq!(Correlator::new(0).max_attempts(), 1);
    }
}
