//! Audio source and sink abstractions
//!
//! Sources produce fixed-format PCM chunks (from a capture device or a file)
//! and sinks consume them in order (to a playback device or a WAV file). The
//! format contract is negotiated once per session via [`AudioFormat`]; chunks
//! themselves are plain byte buffers.
//!
//! Closing either side is idempotent: resources are released exactly once and
//! a second close is a no-op.

mod device;
mod file;

pub use device::{DeviceSink, DeviceSource};
pub use file::{FileSink, FileSource};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub use crate::config::AudioFormat;

/// Errors from audio devices and files.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("no audio input device found")]
    NoInputDevice,

    #[error("no audio output device found")]
    NoOutputDevice,

    #[error("no supported audio configuration: {0}")]
    UnsupportedConfig(String),

    #[error("audio stream failed: {0}")]
    StreamFailed(String),

    #[error("file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV container error: {0}")]
    Wav(String),

    #[error("chunk length {0} is not sample-aligned")]
    UnalignedChunk(usize),

    #[error("audio source is closed")]
    SourceClosed,

    #[error("audio sink is closed")]
    SinkClosed,
}

impl From<hound::Error> for AudioError {
    fn from(e: hound::Error) -> Self {
        match e {
            hound::Error::IoError(io) => AudioError::Io(io),
            other => AudioError::Wav(other.to_string()),
        }
    }
}

/// Produces a sequence of PCM chunks until exhausted or closed.
///
/// `read_chunk` awaits until a chunk is available; `Ok(None)` marks
/// exhaustion (end of file, or a closed capture device). Implementations for
/// live capture are unbounded and only terminate via `close`.
#[async_trait]
pub trait AudioSource: Send {
    /// Read the next chunk, or `None` when the source is exhausted.
    async fn read_chunk(&mut self) -> Result<Option<Bytes>, AudioError>;

    /// Release the underlying device or file. Idempotent.
    async fn close(&mut self) -> Result<(), AudioError>;
}

/// Consumes PCM chunks in order, blocking on device or file backpressure.
///
/// `close` flushes buffered data and finalizes any file container before
/// releasing resources. Idempotent.
#[async_trait]
pub trait AudioSink: Send {
    /// Write one chunk; awaits until the underlying device/file accepts it.
    async fn write_chunk(&mut self, chunk: Bytes) -> Result<(), AudioError>;

    /// Flush, finalize and release. Idempotent.
    async fn close(&mut self) -> Result<(), AudioError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hound_error_maps_io() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err: AudioError = hound::Error::IoError(io).into();
        assert!(matches!(err, AudioError::Io(_)));
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            AudioError::NoInputDevice.to_string(),
            "no audio input device found"
        );
        assert!(
            AudioError::StreamFailed("underrun".to_string())
                .to_string()
                .contains("underrun")
        );
    }
}
