//! File-backed audio source and sink
//!
//! `FileSource` reads fixed-size PCM frames sequentially until end of file,
//! optionally throttled to the nominal byte rate of the format so a
//! pre-recorded query fed into a live-expecting pipeline paces like a
//! microphone. `FileSink` writes a WAV container via hound; the length
//! headers are only finalized on close, so an interrupted turn leaves an
//! invalid file behind (accepted limitation).

use std::io::BufWriter;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use hound::{WavSpec, WavWriter};
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::time::Instant;
use tracing::debug;

use super::{AudioError, AudioFormat, AudioSink, AudioSource};

/// Reads PCM chunks from a file, optionally rate-limited to real time.
pub struct FileSource {
    file: Option<File>,
    format: AudioFormat,
    pacing: bool,
    next_read_at: Option<Instant>,
}

impl FileSource {
    /// Open the given file for reading. The file is consumed raw, header
    /// included, matching what the service expects for a recorded query.
    pub async fn open(path: &Path, format: AudioFormat, pacing: bool) -> Result<Self, AudioError> {
        let file = File::open(path).await?;
        debug!(path = %path.display(), pacing, "opened file source");
        Ok(Self {
            file: Some(file),
            format,
            pacing,
            next_read_at: None,
        })
    }

    /// Duration the given byte count represents at the nominal rate.
    fn chunk_duration(&self, len: usize) -> Duration {
        let bps = self.format.bytes_per_second().max(1);
        Duration::from_nanos(len as u64 * 1_000_000_000 / bps)
    }
}

#[async_trait]
impl AudioSource for FileSource {
    async fn read_chunk(&mut self) -> Result<Option<Bytes>, AudioError> {
        let Some(file) = self.file.as_mut() else {
            return Err(AudioError::SourceClosed);
        };

        if self.pacing {
            if let Some(deadline) = self.next_read_at {
                tokio::time::sleep_until(deadline).await;
            }
        }

        let mut buf = vec![0u8; self.format.chunk_bytes];
        let mut filled = 0;
        while filled < buf.len() {
            let n = file.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        if filled == 0 {
            return Ok(None);
        }
        buf.truncate(filled);

        if self.pacing {
            let pace = self.chunk_duration(filled);
            let base = self.next_read_at.unwrap_or_else(Instant::now);
            self.next_read_at = Some(base.max(Instant::now()) + pace);
        }

        Ok(Some(Bytes::from(buf)))
    }

    async fn close(&mut self) -> Result<(), AudioError> {
        // Dropping the handle releases the descriptor; second close is a no-op.
        self.file.take();
        Ok(())
    }
}

/// Writes PCM chunks into a WAV container, finalized on close.
pub struct FileSink {
    writer: Option<WavWriter<BufWriter<std::fs::File>>>,
}

impl FileSink {
    /// Create the output file and write a provisional WAV header.
    pub fn create(path: &Path, format: AudioFormat) -> Result<Self, AudioError> {
        let spec = WavSpec {
            channels: format.channels,
            sample_rate: format.sample_rate,
            bits_per_sample: format.bits_per_sample,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = WavWriter::create(path, spec)?;
        debug!(path = %path.display(), "created file sink");
        Ok(Self {
            writer: Some(writer),
        })
    }
}

#[async_trait]
impl AudioSink for FileSink {
    async fn write_chunk(&mut self, chunk: Bytes) -> Result<(), AudioError> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(AudioError::SinkClosed);
        };
        // s16le frames only; a trailing byte would silently truncate
        if chunk.len() % 2 != 0 {
            return Err(AudioError::UnalignedChunk(chunk.len()));
        }
        for sample in chunk.chunks_exact(2) {
            writer.write_sample(i16::from_le_bytes([sample[0], sample[1]]))?;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), AudioError> {
        // Taking the writer out makes a second close a no-op; finalize
        // rewrites the RIFF length fields so the container becomes valid.
        if let Some(writer) = self.writer.take() {
            writer.finalize()?;
        }
        Ok(())
    }
}
