//! Bidirectional conversation streaming
//!
//! One conversation turn is a single duplex gRPC exchange: the client streams
//! the user's PCM audio out while response frames arrive on the same call.
//! The service acknowledges the end of the user's utterance with a boundary
//! event before any response audio; [`turn::ConversationLoop`] enforces that
//! choreography as an explicit state machine.

pub mod driver;
pub mod grpc;
pub mod messages;
pub mod turn;

pub use driver::{BatchDriver, Driver, InteractiveDriver, OperatorPrompt, StdinPrompt, TurnFactory};
pub use grpc::GrpcConversation;
pub use messages::{ConverseRequest, ConverseResponse, DecodeError};
pub use turn::{ConversationLoop, Turn, TurnState, TurnSummary};

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use thiserror::Error;

/// Outbound audio chunk sequence handed to the network layer.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Bytes> + Send>>;

/// Inbound event sequence produced by the network layer.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<ConversationEvent, StreamError>> + Send>>;

/// A decoded inbound protocol event.
///
/// Exactly one `EndOfUtterance` occurs per turn, always before any
/// `AudioData`; the loop treats anything else as a protocol violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationEvent {
    /// The remote side has finished consuming the user's utterance;
    /// playback may begin.
    EndOfUtterance,
    /// One chunk of synthesized response audio, played in arrival order.
    AudioData(Bytes),
}

/// Network and protocol-level streaming failures, fatal to the current turn.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("authentication rejected: {0}")]
    AuthenticationRejected(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("remote error {code}: {message}")]
    Remote { code: i32, message: String },

    #[error("stream closed before end of utterance")]
    ClosedBeforeBoundary,
}

impl StreamError {
    /// Map a gRPC status onto the client error taxonomy.
    pub fn from_status(status: tonic::Status) -> Self {
        let message = status.message().to_string();
        match status.code() {
            tonic::Code::Unauthenticated | tonic::Code::PermissionDenied => {
                StreamError::AuthenticationRejected(format!("{:?}: {}", status.code(), message))
            }
            tonic::Code::Unavailable => {
                StreamError::ConnectionFailed(format!("service unavailable: {message}"))
            }
            tonic::Code::Internal | tonic::Code::DataLoss => StreamError::MalformedFrame(message),
            code => StreamError::Transport(format!("{code:?}: {message}")),
        }
    }
}

/// One bidirectional network exchange.
///
/// `converse` transmits the outbound sequence chunk-by-chunk as the remote
/// side permits and lazily yields decoded inbound events. The first event is
/// always `EndOfUtterance` under this client's service contract; abnormal
/// termination surfaces as a `StreamError` when the next event is drawn.
/// A stream instance serves exactly one turn.
#[async_trait]
pub trait ConversationStream: Send {
    async fn converse(self: Box<Self>, outbound: ChunkStream) -> Result<EventStream, StreamError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let err = StreamError::from_status(tonic::Status::unauthenticated("bad token"));
        assert!(matches!(err, StreamError::AuthenticationRejected(_)));

        let err = StreamError::from_status(tonic::Status::unavailable("down"));
        assert!(matches!(err, StreamError::ConnectionFailed(_)));

        let err = StreamError::from_status(tonic::Status::deadline_exceeded("slow"));
        assert!(matches!(err, StreamError::Transport(_)));

        let err = StreamError::from_status(tonic::Status::internal("garbled"));
        assert!(matches!(err, StreamError::MalformedFrame(_)));
    }

    #[test]
    fn test_event_equality() {
        assert_eq!(
            ConversationEvent::AudioData(Bytes::from_static(b"pcm")),
            ConversationEvent::AudioData(Bytes::from_static(b"pcm"))
        );
        assert_ne!(
            ConversationEvent::EndOfUtterance,
            ConversationEvent::AudioData(Bytes::new())
        );
    }
}
