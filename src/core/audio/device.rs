//! Live capture and playback via cpal
//!
//! cpal streams are not `Send`, so each device lives on a dedicated thread
//! that owns the stream for its whole lifetime. Capture callbacks assemble
//! whole chunks and hand them to the async side over a bounded channel;
//! playback callbacks drain a shared byte queue with a high-water mark so a
//! fast producer blocks instead of buffering unboundedly.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, StreamConfig};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{AudioError, AudioFormat, AudioSink, AudioSource};

/// Capture chunks buffered between the device thread and the reader.
const CAPTURE_QUEUE_CHUNKS: usize = 100;

/// Playback buffer high-water mark, in chunks.
const PLAYBACK_HIGH_WATER_CHUNKS: usize = 8;

/// How long `close` waits for buffered playback to drain.
const PLAYBACK_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

fn stream_config(format: &AudioFormat) -> StreamConfig {
    StreamConfig {
        channels: format.channels,
        sample_rate: SampleRate(format.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    }
}

/// Convert any cpal sample to i16 for the wire format.
fn sample_to_i16<T: cpal::Sample<Float = f32>>(sample: T) -> i16 {
    let f: f32 = sample.to_float_sample();
    (f.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Unbounded microphone capture; terminates only via `close`.
pub struct DeviceSource {
    rx: Option<mpsc::Receiver<Bytes>>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl DeviceSource {
    /// Open the default input device at the session format.
    pub async fn open(format: AudioFormat) -> Result<Self, AudioError> {
        tokio::task::spawn_blocking(move || Self::open_blocking(format))
            .await
            .map_err(|e| AudioError::StreamFailed(e.to_string()))?
    }

    fn open_blocking(format: AudioFormat) -> Result<Self, AudioError> {
        let (tx, rx) = mpsc::channel::<Bytes>(CAPTURE_QUEUE_CHUNKS);
        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel::<Result<(), AudioError>>(1);
        let stop = Arc::new(AtomicBool::new(false));
        let stop_thread = stop.clone();

        let thread = std::thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || capture_thread(format, tx, ready_tx, stop_thread))
            .map_err(|e| AudioError::StreamFailed(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                rx: Some(rx),
                stop,
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => Err(AudioError::StreamFailed(
                "capture thread exited before reporting readiness".to_string(),
            )),
        }
    }

    async fn join_thread(&mut self) {
        if let Some(handle) = self.thread.take() {
            let _ = tokio::task::spawn_blocking(move || handle.join()).await;
        }
    }
}

#[async_trait]
impl AudioSource for DeviceSource {
    async fn read_chunk(&mut self) -> Result<Option<Bytes>, AudioError> {
        let Some(rx) = self.rx.as_mut() else {
            return Err(AudioError::SourceClosed);
        };
        // None means the capture thread dropped its sender, i.e. the
        // device stream died or close was requested concurrently.
        Ok(rx.recv().await)
    }

    async fn close(&mut self) -> Result<(), AudioError> {
        if self.rx.take().is_some() {
            self.stop.store(true, Ordering::Release);
            self.join_thread().await;
            debug!("capture device closed");
        }
        Ok(())
    }
}

fn capture_thread(
    format: AudioFormat,
    tx: mpsc::Sender<Bytes>,
    ready_tx: std::sync::mpsc::SyncSender<Result<(), AudioError>>,
    stop: Arc<AtomicBool>,
) {
    let stream = match build_capture_stream(&format, tx) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };
    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(AudioError::StreamFailed(e.to_string())));
        return;
    }
    let _ = ready_tx.send(Ok(()));

    while !stop.load(Ordering::Acquire) {
        std::thread::park_timeout(Duration::from_millis(50));
    }
    // Dropping the stream stops the capture callbacks; dropping the sender
    // (moved into the callback) ends the reader side.
}

fn build_capture_stream(
    format: &AudioFormat,
    tx: mpsc::Sender<Bytes>,
) -> Result<cpal::Stream, AudioError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or(AudioError::NoInputDevice)?;
    debug!(device = ?device.name(), "using audio input device");

    let sample_format = device
        .default_input_config()
        .map_err(|e| AudioError::UnsupportedConfig(e.to_string()))?
        .sample_format();
    let config = stream_config(format);
    let chunk_bytes = format.chunk_bytes;

    match sample_format {
        SampleFormat::I16 => build_capture_stream_typed::<i16>(&device, &config, chunk_bytes, tx),
        SampleFormat::U16 => build_capture_stream_typed::<u16>(&device, &config, chunk_bytes, tx),
        SampleFormat::F32 => build_capture_stream_typed::<f32>(&device, &config, chunk_bytes, tx),
        other => Err(AudioError::UnsupportedConfig(format!(
            "unsupported sample format {other:?}"
        ))),
    }
}

fn build_capture_stream_typed<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    chunk_bytes: usize,
    tx: mpsc::Sender<Bytes>,
) -> Result<cpal::Stream, AudioError>
where
    T: cpal::Sample<Float = f32> + cpal::SizedSample + Send + 'static,
{
    let err_fn = |err| warn!(error = %err, "capture stream error");
    let mut pending: Vec<u8> = Vec::with_capacity(chunk_bytes * 2);

    let stream = device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                for &sample in data {
                    pending.extend_from_slice(&sample_to_i16(sample).to_le_bytes());
                }
                while pending.len() >= chunk_bytes {
                    let rest = pending.split_off(chunk_bytes);
                    let chunk = Bytes::from(std::mem::replace(&mut pending, rest));
                    // The callback runs on the realtime audio thread and
                    // must never block; overruns are dropped.
                    if tx.try_send(chunk).is_err() {
                        warn!("capture queue full, dropping chunk");
                    }
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| AudioError::StreamFailed(e.to_string()))?;

    Ok(stream)
}

/// Shared playback buffer drained by the output callback.
struct PlaybackShared {
    queue: Mutex<VecDeque<u8>>,
    stop: AtomicBool,
}

/// Speaker playback that blocks writers once its buffer is full.
pub struct DeviceSink {
    shared: Option<Arc<PlaybackShared>>,
    high_water_bytes: usize,
    thread: Option<JoinHandle<()>>,
}

impl DeviceSink {
    /// Open the default output device at the session format.
    pub async fn open(format: AudioFormat) -> Result<Self, AudioError> {
        tokio::task::spawn_blocking(move || Self::open_blocking(format))
            .await
            .map_err(|e| AudioError::StreamFailed(e.to_string()))?
    }

    fn open_blocking(format: AudioFormat) -> Result<Self, AudioError> {
        let shared = Arc::new(PlaybackShared {
            queue: Mutex::new(VecDeque::new()),
            stop: AtomicBool::new(false),
        });
        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel::<Result<(), AudioError>>(1);
        let shared_thread = shared.clone();

        let thread = std::thread::Builder::new()
            .name("audio-playback".to_string())
            .spawn(move || playback_thread(format, shared_thread, ready_tx))
            .map_err(|e| AudioError::StreamFailed(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                shared: Some(shared),
                high_water_bytes: format.chunk_bytes * PLAYBACK_HIGH_WATER_CHUNKS,
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => Err(AudioError::StreamFailed(
                "playback thread exited before reporting readiness".to_string(),
            )),
        }
    }

    async fn join_thread(&mut self) {
        if let Some(handle) = self.thread.take() {
            let _ = tokio::task::spawn_blocking(move || handle.join()).await;
        }
    }
}

#[async_trait]
impl AudioSink for DeviceSink {
    async fn write_chunk(&mut self, chunk: Bytes) -> Result<(), AudioError> {
        let Some(shared) = self.shared.as_ref() else {
            return Err(AudioError::SinkClosed);
        };
        // The playback callback pops byte pairs; an odd chunk would desync
        // every sample after it
        if chunk.len() % 2 != 0 {
            return Err(AudioError::UnalignedChunk(chunk.len()));
        }
        // Backpressure: hold the chunk until the callback has drained below
        // the high-water mark.
        loop {
            {
                let mut queue = shared.queue.lock();
                if queue.len() <= self.high_water_bytes {
                    queue.extend(chunk.iter());
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn close(&mut self) -> Result<(), AudioError> {
        let Some(shared) = self.shared.take() else {
            return Ok(());
        };
        // Let buffered audio finish playing, bounded so close cannot hang
        // on a dead device.
        let deadline = tokio::time::Instant::now() + PLAYBACK_DRAIN_TIMEOUT;
        while !shared.queue.lock().is_empty() {
            if tokio::time::Instant::now() >= deadline {
                warn!("playback buffer did not drain before close timeout");
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        shared.stop.store(true, Ordering::Release);
        self.join_thread().await;
        debug!("playback device closed");
        Ok(())
    }
}

fn playback_thread(
    format: AudioFormat,
    shared: Arc<PlaybackShared>,
    ready_tx: std::sync::mpsc::SyncSender<Result<(), AudioError>>,
) {
    let stream = match build_playback_stream(&format, shared.clone()) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };
    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(AudioError::StreamFailed(e.to_string())));
        return;
    }
    let _ = ready_tx.send(Ok(()));

    while !shared.stop.load(Ordering::Acquire) {
        std::thread::park_timeout(Duration::from_millis(50));
    }
}

fn build_playback_stream(
    format: &AudioFormat,
    shared: Arc<PlaybackShared>,
) -> Result<cpal::Stream, AudioError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or(AudioError::NoOutputDevice)?;
    debug!(device = ?device.name(), "using audio output device");

    let sample_format = device
        .default_output_config()
        .map_err(|e| AudioError::UnsupportedConfig(e.to_string()))?
        .sample_format();
    let config = stream_config(format);

    match sample_format {
        SampleFormat::I16 => build_playback_stream_typed::<i16>(&device, &config, shared),
        SampleFormat::U16 => build_playback_stream_typed::<u16>(&device, &config, shared),
        SampleFormat::F32 => build_playback_stream_typed::<f32>(&device, &config, shared),
        other => Err(AudioError::UnsupportedConfig(format!(
            "unsupported sample format {other:?}"
        ))),
    }
}

fn build_playback_stream_typed<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    shared: Arc<PlaybackShared>,
) -> Result<cpal::Stream, AudioError>
where
    T: cpal::SizedSample + cpal::FromSample<i16> + Send + 'static,
{
    let err_fn = |err| warn!(error = %err, "playback stream error");

    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let mut queue = shared.queue.lock();
                for slot in data.iter_mut() {
                    let sample = match (queue.pop_front(), queue.pop_front()) {
                        (Some(lo), Some(hi)) => i16::from_le_bytes([lo, hi]),
                        // Underrun plays silence
                        _ => 0,
                    };
                    *slot = T::from_sample(sample);
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| AudioError::StreamFailed(e.to_string()))?;

    Ok(stream)
}
