//! Mock collaborators for conversation turn tests
//!
//! In-memory stand-ins for the audio devices and the network stream so the
//! turn choreography can be exercised deterministically: a scripted stream
//! that records everything transmitted, memory-backed source/sink with close
//! counters, a recording progress reporter and a counting operator prompt.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;

use converse_client::core::conversation::driver::OperatorPrompt;
use converse_client::core::conversation::{ChunkStream, EventStream};
use converse_client::{
    AudioSink, AudioSource, ClientResult, ConversationEvent, ConversationStream, ProgressReporter,
    StreamError, Turn, TurnFactory,
};
use converse_client::core::audio::AudioError;

/// Source yielding a fixed list of chunks, counting closes.
pub struct MemorySource {
    chunks: Vec<Bytes>,
    pub closes: Arc<AtomicU32>,
}

impl MemorySource {
    pub fn new(chunks: Vec<Bytes>) -> (Self, Arc<AtomicU32>) {
        let closes = Arc::new(AtomicU32::new(0));
        (
            Self {
                chunks,
                closes: closes.clone(),
            },
            closes,
        )
    }
}

#[async_trait]
impl AudioSource for MemorySource {
    async fn read_chunk(&mut self) -> Result<Option<Bytes>, AudioError> {
        if self.chunks.is_empty() {
            Ok(None)
        } else {
            Ok(Some(self.chunks.remove(0)))
        }
    }

    async fn close(&mut self) -> Result<(), AudioError> {
        // Counted, not guarded: tests assert it stays at one
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Sink collecting written chunks, counting closes.
pub struct MemorySink {
    pub written: Arc<Mutex<Vec<Bytes>>>,
    pub closes: Arc<AtomicU32>,
}

impl MemorySink {
    pub fn new() -> (Self, Arc<Mutex<Vec<Bytes>>>, Arc<AtomicU32>) {
        let written = Arc::new(Mutex::new(Vec::new()));
        let closes = Arc::new(AtomicU32::new(0));
        (
            Self {
                written: written.clone(),
                closes: closes.clone(),
            },
            written,
            closes,
        )
    }
}

#[async_trait]
impl AudioSink for MemorySink {
    async fn write_chunk(&mut self, chunk: Bytes) -> Result<(), AudioError> {
        self.written.lock().push(chunk);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), AudioError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Scripted network stream: drains the outbound sequence to completion
/// (recording it), then replays the scripted inbound events.
pub struct ScriptedStream {
    events: Vec<Result<ConversationEvent, StreamError>>,
    pub transmitted: Arc<Mutex<Vec<Bytes>>>,
}

impl ScriptedStream {
    pub fn new(
        events: Vec<Result<ConversationEvent, StreamError>>,
    ) -> (Self, Arc<Mutex<Vec<Bytes>>>) {
        let transmitted = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                events,
                transmitted: transmitted.clone(),
            },
            transmitted,
        )
    }
}

#[async_trait]
impl ConversationStream for ScriptedStream {
    async fn converse(self: Box<Self>, mut outbound: ChunkStream) -> Result<EventStream, StreamError> {
        // The real service consumes the whole utterance before it emits the
        // boundary event; the mock mirrors that ordering.
        while let Some(chunk) = outbound.next().await {
            self.transmitted.lock().push(chunk);
        }
        Ok(Box::pin(futures::stream::iter(self.events)))
    }
}

/// Reporter recording every update and finish with its label.
#[derive(Default)]
pub struct RecordingReporter {
    pub updates: Mutex<Vec<(String, u64)>>,
    pub finishes: Mutex<Vec<(String, u64)>>,
}

impl RecordingReporter {
    pub fn finish_totals(&self, label: &str) -> Vec<u64> {
        self.finishes
            .lock()
            .iter()
            .filter(|(l, _)| l == label)
            .map(|(_, total)| *total)
            .collect()
    }
}

impl ProgressReporter for RecordingReporter {
    fn update(&self, label: &str, total: u64) {
        self.updates.lock().push((label.to_string(), total));
    }

    fn finish(&self, label: &str, total: u64) {
        self.finishes.lock().push((label.to_string(), total));
    }
}

/// Prompt allowing a fixed number of turns before signalling EOF.
pub struct CountingPrompt {
    remaining: u32,
    pub prompts: Arc<AtomicU32>,
}

impl CountingPrompt {
    pub fn new(turns: u32) -> (Self, Arc<AtomicU32>) {
        let prompts = Arc::new(AtomicU32::new(0));
        (
            Self {
                remaining: turns,
                prompts: prompts.clone(),
            },
            prompts,
        )
    }
}

#[async_trait]
impl OperatorPrompt for CountingPrompt {
    async fn wait_for_turn(&mut self) -> ClientResult<bool> {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        if self.remaining == 0 {
            return Ok(false);
        }
        self.remaining -= 1;
        Ok(true)
    }
}

/// Per-turn bookkeeping handed back by [`MockTurnFactory`].
pub struct TurnProbe {
    pub source_closes: Arc<AtomicU32>,
    pub sink_written: Arc<Mutex<Vec<Bytes>>>,
    pub sink_closes: Arc<AtomicU32>,
    pub transmitted: Arc<Mutex<Vec<Bytes>>>,
}

/// Factory producing an independent scripted turn per call.
pub struct MockTurnFactory {
    pub source_chunks: Vec<Bytes>,
    pub events: fn() -> Vec<Result<ConversationEvent, StreamError>>,
    pub probes: Arc<Mutex<Vec<TurnProbe>>>,
}

#[async_trait]
impl TurnFactory for MockTurnFactory {
    async fn make_turn(&mut self) -> ClientResult<Turn> {
        let (source, source_closes) = MemorySource::new(self.source_chunks.clone());
        let (sink, sink_written, sink_closes) = MemorySink::new();
        let (stream, transmitted) = ScriptedStream::new((self.events)());
        self.probes.lock().push(TurnProbe {
            source_closes,
            sink_written,
            sink_closes,
            transmitted,
        });
        Ok(Turn {
            source: Box::new(source),
            sink: Box::new(sink),
            stream: Box::new(stream),
        })
    }
}
