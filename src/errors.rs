//! Top-level error taxonomy for the client.
//!
//! Each subsystem defines its own error enum (`AudioError`, `StreamError`,
//! `AuthError`, `ConfigError`); this module rolls them up into the single
//! `ClientError` surfaced by a conversation turn. No error is retried: every
//! variant aborts the current turn with all resources closed.

use thiserror::Error;

use crate::auth::AuthError;
use crate::config::ConfigError;
use crate::core::audio::AudioError;
use crate::core::conversation::StreamError;

/// Errors surfaced by a conversation turn or by session setup.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Audio device or file failure, fatal to the current turn
    #[error("audio I/O error: {0}")]
    Audio(#[from] AudioError),

    /// Network or protocol-level streaming failure
    #[error("stream error: {0}")]
    Stream(#[from] StreamError),

    /// The remote side violated the turn choreography, e.g. the first
    /// inbound event was not end-of-utterance
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Credential loading failed before the turn started
    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Invalid client configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Unexpected internal failure (task join, poisoned state)
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_violation_display() {
        let err = ClientError::ProtocolViolation("expected end of utterance".to_string());
        assert!(err.to_string().contains("protocol violation"));
        assert!(err.to_string().contains("end of utterance"));
    }

    #[test]
    fn test_audio_error_conversion() {
        let audio = AudioError::NoInputDevice;
        let err: ClientError = audio.into();
        assert!(matches!(err, ClientError::Audio(_)));
    }
}
