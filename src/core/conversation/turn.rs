//! The conversation turn state machine
//!
//! One turn drains an audio source into the network stream, waits for the
//! end-of-utterance boundary, then plays the response into the sink:
//!
//! ```text
//! Idle → Sending → AwaitingBoundary → Playing → Closed
//! ```
//!
//! The boundary is a first-class event, not a skipped element: the loop draws
//! exactly one event, asserts it is `EndOfUtterance`, and treats anything
//! else as a protocol violation. Source, sink and stream are owned by the
//! turn and are closed on every exit path, success or failure: the source by
//! its pump task, then the sink, in that order.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use super::{ConversationEvent, ConversationStream, StreamError};
use crate::core::audio::{AudioError, AudioSink, AudioSource};
use crate::core::progress::{ProgressObserver, ProgressReporter};
use crate::errors::{ClientError, ClientResult};

/// Outbound chunks buffered between the capture pump and the network send.
/// Bounded so a stalled network call exerts backpressure on capture.
const OUTBOUND_QUEUE_CHUNKS: usize = 32;

/// Phases of one conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Sending,
    AwaitingBoundary,
    Playing,
    Closed,
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnState::Idle => write!(f, "idle"),
            TurnState::Sending => write!(f, "sending"),
            TurnState::AwaitingBoundary => write!(f, "awaiting-boundary"),
            TurnState::Playing => write!(f, "playing"),
            TurnState::Closed => write!(f, "closed"),
        }
    }
}

/// Everything one turn owns: fresh instances, never shared across turns.
pub struct Turn {
    pub source: Box<dyn AudioSource>,
    pub sink: Box<dyn AudioSink>,
    pub stream: Box<dyn ConversationStream>,
}

/// Byte accounting for a completed turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnSummary {
    /// Bytes read from the source and handed to the network
    pub sent_bytes: u64,
    /// Response audio bytes received
    pub received_bytes: u64,
    /// Response chunks written to the sink
    pub played_chunks: u64,
}

/// Executes conversation turns against a progress reporter.
pub struct ConversationLoop {
    reporter: Arc<dyn ProgressReporter>,
}

impl ConversationLoop {
    pub fn new(reporter: Arc<dyn ProgressReporter>) -> Self {
        Self { reporter }
    }

    /// Run one full turn to completion.
    ///
    /// On return — ok or error — the source, sink and stream are closed.
    pub async fn run_turn(&self, turn: Turn) -> ClientResult<TurnSummary> {
        let Turn {
            source,
            mut sink,
            stream,
        } = turn;
        let turn_id = Uuid::new_v4();
        transition(turn_id, TurnState::Idle, TurnState::Sending);

        let (tx, rx) = mpsc::channel::<Bytes>(OUTBOUND_QUEUE_CHUNKS);
        let pump = tokio::spawn(pump_source(source, tx));

        // drive() consumes the receiver, so the pump always unblocks and
        // closes the source once drive returns, whatever the outcome.
        let outcome = self.drive(turn_id, stream, rx, &mut sink).await;

        let pump_result = match pump.await {
            Ok(result) => result.map_err(ClientError::Audio),
            Err(e) => Err(ClientError::Internal(format!("capture task failed: {e}"))),
        };
        let close_result = sink.close().await.map_err(ClientError::Audio);
        debug!(%turn_id, state = %TurnState::Closed, "turn resources released");

        let (received_bytes, played_chunks) = outcome?;
        let sent_bytes = pump_result?;
        close_result?;

        let summary = TurnSummary {
            sent_bytes,
            received_bytes,
            played_chunks,
        };
        info!(
            %turn_id,
            sent_bytes,
            received_bytes,
            played_chunks,
            "turn complete"
        );
        Ok(summary)
    }

    /// Sending through Playing; returns (received_bytes, played_chunks).
    async fn drive(
        &self,
        turn_id: Uuid,
        stream: Box<dyn ConversationStream>,
        rx: mpsc::Receiver<Bytes>,
        sink: &mut Box<dyn AudioSink>,
    ) -> ClientResult<(u64, u64)> {
        let outbound = ProgressObserver::new("Recording", OutboundChunks { rx }, self.reporter.clone());
        let mut events = stream.converse(Box::pin(outbound)).await?;

        transition(turn_id, TurnState::Sending, TurnState::AwaitingBoundary);
        match events.next().await {
            None => return Err(StreamError::ClosedBeforeBoundary.into()),
            Some(Err(e)) => return Err(e.into()),
            Some(Ok(ConversationEvent::EndOfUtterance)) => {}
            Some(Ok(ConversationEvent::AudioData(_))) => {
                return Err(ClientError::ProtocolViolation(
                    "first inbound event was audio data, expected end of utterance".to_string(),
                ));
            }
        }

        transition(turn_id, TurnState::AwaitingBoundary, TurnState::Playing);
        let chunks = events.map(|event| match event {
            Ok(ConversationEvent::AudioData(chunk)) => Ok(chunk),
            Ok(ConversationEvent::EndOfUtterance) => Err(ClientError::ProtocolViolation(
                "duplicate end of utterance after audio data".to_string(),
            )),
            Err(e) => Err(ClientError::Stream(e)),
        });
        let mut playing = ProgressObserver::new("Playing", chunks, self.reporter.clone());

        let mut played_chunks = 0u64;
        while let Some(item) = playing.next().await {
            sink.write_chunk(item?).await?;
            played_chunks += 1;
        }

        Ok((playing.total_bytes(), played_chunks))
    }
}

fn transition(turn_id: Uuid, from: TurnState, to: TurnState) {
    debug!(%turn_id, from = %from, to = %to, "turn transition");
}

/// Drains the source into the outbound queue, then closes it.
///
/// Returns the number of bytes read. A dropped receiver ends the pump early
/// without error: the turn is being torn down and the teardown's own error,
/// if any, takes precedence.
async fn pump_source(
    mut source: Box<dyn AudioSource>,
    tx: mpsc::Sender<Bytes>,
) -> Result<u64, AudioError> {
    let mut sent_bytes = 0u64;
    let result = loop {
        match source.read_chunk().await {
            Ok(Some(chunk)) => {
                sent_bytes += chunk.len() as u64;
                if tx.send(chunk).await.is_err() {
                    debug!("outbound queue dropped, stopping capture");
                    break Ok(());
                }
            }
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        }
    };
    let close_result = source.close().await;
    match (result, close_result) {
        (Err(e), _) => Err(e),
        (Ok(()), Err(e)) => Err(e),
        (Ok(()), Ok(())) => Ok(sent_bytes),
    }
}

/// Stream adapter over the bounded outbound queue.
struct OutboundChunks {
    rx: mpsc::Receiver<Bytes>,
}

impl Stream for OutboundChunks {
    type Item = Bytes;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    #[test]
    fn test_turn_state_display() {
        assert_eq!(TurnState::Sending.to_string(), "sending");
        assert_eq!(TurnState::AwaitingBoundary.to_string(), "awaiting-boundary");
        assert_eq!(TurnState::Closed.to_string(), "closed");
    }

    struct ScriptedSource {
        chunks: Vec<Bytes>,
        closed: u32,
    }

    #[async_trait]
    impl AudioSource for ScriptedSource {
        async fn read_chunk(&mut self) -> Result<Option<Bytes>, AudioError> {
            if self.chunks.is_empty() {
                Ok(None)
            } else {
                Ok(Some(self.chunks.remove(0)))
            }
        }

        async fn close(&mut self) -> Result<(), AudioError> {
            self.closed += 1;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_pump_drains_source_in_order_and_closes_it() {
        let source = ScriptedSource {
            chunks: vec![Bytes::from_static(b"aa"), Bytes::from_static(b"bbb")],
            closed: 0,
        };
        let (tx, mut rx) = mpsc::channel(8);

        let sent = pump_source(Box::new(source), tx).await.unwrap();
        assert_eq!(sent, 5);
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"aa"));
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"bbb"));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_pump_stops_quietly_when_receiver_dropped() {
        let source = ScriptedSource {
            chunks: vec![Bytes::from_static(b"x"); 4],
            closed: 0,
        };
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        // No error: teardown owns the turn's outcome
        let sent = pump_source(Box::new(source), tx).await.unwrap();
        assert_eq!(sent, 1);
    }
}
