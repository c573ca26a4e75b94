//! Converse API message types
//!
//! Wire types for the assistant's bidirectional Converse service, encoded
//! and decoded by hand against the proto definitions:
//!
//! ```protobuf
//! service Converse {
//!     rpc Converse(stream ConverseRequest) returns (stream ConverseResponse);
//! }
//!
//! message ConverseRequest {
//!     oneof converse_request {
//!         ConverseConfig config = 1;
//!         bytes audio_in = 2;
//!     }
//! }
//!
//! message ConverseResponse {
//!     oneof converse_response {
//!         Status error = 1;
//!         EventType event_type = 2;   // END_OF_UTTERANCE = 1
//!         AudioOut audio_out = 3;
//!         ConverseResult result = 5;
//!     }
//! }
//! ```
//!
//! The first request of a turn carries the config; every subsequent request
//! carries raw audio. The format is fixed for the whole turn.

use bytes::Bytes;

use super::{ConversationEvent, StreamError};
use crate::config::AudioFormat;

/// LINEAR16 PCM encoding discriminant shared by both audio configs.
const ENCODING_LINEAR16: u64 = 1;

/// `EventType.END_OF_UTTERANCE`
pub const EVENT_END_OF_UTTERANCE: u64 = 1;

/// Protobuf decoding error
#[derive(Debug, Clone, thiserror::Error)]
pub enum DecodeError {
    #[error("buffer too short")]
    BufferTooShort,
    #[error("invalid varint")]
    InvalidVarint,
    #[error("unknown wire type: {0}")]
    UnknownWireType(u8),
}

/// Outbound request frame: session config first, then audio chunks.
#[derive(Debug, Clone)]
pub enum ConverseRequest {
    /// `ConverseConfig config = 1`
    Config {
        format: AudioFormat,
        volume_percent: u8,
    },
    /// `bytes audio_in = 2`
    AudioIn(Bytes),
}

impl ConverseRequest {
    /// The mandatory first frame of a turn.
    pub fn config(format: AudioFormat, volume_percent: u8) -> Self {
        ConverseRequest::Config {
            format,
            volume_percent,
        }
    }

    /// A follow-up audio frame.
    pub fn audio(chunk: Bytes) -> Self {
        ConverseRequest::AudioIn(chunk)
    }

    /// Encode to protobuf wire format.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            ConverseRequest::Config {
                format,
                volume_percent,
            } => {
                let config = encode_converse_config(format, *volume_percent);
                let mut buf = Vec::with_capacity(config.len() + 4);
                buf.push(0x0a); // field 1, wire type 2
                encode_varint(&mut buf, config.len() as u64);
                buf.extend_from_slice(&config);
                buf
            }
            ConverseRequest::AudioIn(chunk) => {
                let mut buf = Vec::with_capacity(chunk.len() + 8);
                buf.push(0x12); // field 2, wire type 2
                encode_varint(&mut buf, chunk.len() as u64);
                buf.extend_from_slice(chunk);
                buf
            }
        }
    }
}

/// `ConverseConfig { AudioInConfig audio_in_config = 1; AudioOutConfig audio_out_config = 2; }`
fn encode_converse_config(format: &AudioFormat, volume_percent: u8) -> Vec<u8> {
    let audio_in = encode_audio_config(format, None);
    let audio_out = encode_audio_config(format, Some(volume_percent));

    let mut buf = Vec::with_capacity(audio_in.len() + audio_out.len() + 8);
    buf.push(0x0a); // field 1, wire type 2
    encode_varint(&mut buf, audio_in.len() as u64);
    buf.extend_from_slice(&audio_in);
    buf.push(0x12); // field 2, wire type 2
    encode_varint(&mut buf, audio_out.len() as u64);
    buf.extend_from_slice(&audio_out);
    buf
}

/// `AudioInConfig`/`AudioOutConfig`: encoding = 1, sample_rate_hertz = 2,
/// volume_percentage = 3 (out only).
fn encode_audio_config(format: &AudioFormat, volume_percent: Option<u8>) -> Vec<u8> {
    let mut buf = Vec::with_capacity(12);
    buf.push(0x08); // field 1, wire type 0
    encode_varint(&mut buf, ENCODING_LINEAR16);
    buf.push(0x10); // field 2, wire type 0
    encode_varint(&mut buf, format.sample_rate as u64);
    if let Some(volume) = volume_percent {
        buf.push(0x18); // field 3, wire type 0
        encode_varint(&mut buf, volume as u64);
    }
    buf
}

/// `google.rpc.Status` carried in a response's error field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RpcStatus {
    pub code: i32,
    pub message: String,
}

/// Recognized text carried alongside the audio response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConverseResult {
    /// `spoken_request_text = 1`
    pub request_text: String,
    /// `spoken_response_text = 2`
    pub response_text: String,
}

/// Inbound response frame.
#[derive(Debug, Clone, Default)]
pub struct ConverseResponse {
    /// `Status error = 1`
    pub error: Option<RpcStatus>,
    /// `EventType event_type = 2`
    pub event_type: u64,
    /// `AudioOut audio_out = 3` (inner `bytes audio_data = 1`)
    pub audio_data: Option<Bytes>,
    /// `ConverseResult result = 5`
    pub result: Option<ConverseResult>,
}

impl ConverseResponse {
    /// Decode from protobuf wire format.
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        let mut response = ConverseResponse::default();
        let mut pos = 0;

        while pos < buf.len() {
            let (field_tag, tag_size) = decode_varint(&buf[pos..])?;
            pos += tag_size;

            let field_number = field_tag >> 3;
            let wire_type = field_tag & 0x07;

            match (field_number, wire_type) {
                // Field 1: error (Status)
                (1, 2) => {
                    let (body, end) = read_length_delimited(buf, pos)?;
                    response.error = Some(decode_rpc_status(body)?);
                    pos = end;
                }
                // Field 2: event_type (enum)
                (2, 0) => {
                    let (value, size) = decode_varint(&buf[pos..])?;
                    pos += size;
                    response.event_type = value;
                }
                // Field 3: audio_out (AudioOut)
                (3, 2) => {
                    let (body, end) = read_length_delimited(buf, pos)?;
                    response.audio_data = decode_audio_out(body)?;
                    pos = end;
                }
                // Field 5: result (ConverseResult)
                (5, 2) => {
                    let (body, end) = read_length_delimited(buf, pos)?;
                    response.result = Some(decode_converse_result(body)?);
                    pos = end;
                }
                // Skip unknown fields
                (_, 0) => {
                    let (_, size) = decode_varint(&buf[pos..])?;
                    pos += size;
                }
                (_, 2) => {
                    let (_, end) = read_length_delimited(buf, pos)?;
                    pos = end;
                }
                (_, 5) => pos += 4,
                (_, 1) => pos += 8,
                _ => return Err(DecodeError::UnknownWireType(wire_type as u8)),
            }
        }

        Ok(response)
    }

    /// Convert this frame into a conversation event.
    ///
    /// Result-only frames produce no event (`Ok(None)`); an error field
    /// terminates the turn.
    pub fn into_event(self) -> Result<Option<ConversationEvent>, StreamError> {
        if let Some(status) = self.error {
            return Err(StreamError::Remote {
                code: status.code,
                message: status.message,
            });
        }
        if self.event_type == EVENT_END_OF_UTTERANCE {
            return Ok(Some(ConversationEvent::EndOfUtterance));
        }
        if let Some(audio) = self.audio_data {
            return Ok(Some(ConversationEvent::AudioData(audio)));
        }
        Ok(None)
    }
}

fn decode_rpc_status(buf: &[u8]) -> Result<RpcStatus, DecodeError> {
    let mut status = RpcStatus::default();
    let mut pos = 0;
    while pos < buf.len() {
        let (field_tag, tag_size) = decode_varint(&buf[pos..])?;
        pos += tag_size;
        match (field_tag >> 3, field_tag & 0x07) {
            (1, 0) => {
                let (value, size) = decode_varint(&buf[pos..])?;
                pos += size;
                status.code = value as i32;
            }
            (2, 2) => {
                let (body, end) = read_length_delimited(buf, pos)?;
                status.message = String::from_utf8_lossy(body).to_string();
                pos = end;
            }
            (_, wire_type) => pos = skip_field(buf, pos, wire_type)?,
        }
    }
    Ok(status)
}

/// `AudioOut { bytes audio_data = 1; }`
fn decode_audio_out(buf: &[u8]) -> Result<Option<Bytes>, DecodeError> {
    let mut audio = None;
    let mut pos = 0;
    while pos < buf.len() {
        let (field_tag, tag_size) = decode_varint(&buf[pos..])?;
        pos += tag_size;
        match (field_tag >> 3, field_tag & 0x07) {
            (1, 2) => {
                let (body, end) = read_length_delimited(buf, pos)?;
                audio = Some(Bytes::copy_from_slice(body));
                pos = end;
            }
            (_, wire_type) => pos = skip_field(buf, pos, wire_type)?,
        }
    }
    Ok(audio)
}

fn decode_converse_result(buf: &[u8]) -> Result<ConverseResult, DecodeError> {
    let mut result = ConverseResult::default();
    let mut pos = 0;
    while pos < buf.len() {
        let (field_tag, tag_size) = decode_varint(&buf[pos..])?;
        pos += tag_size;
        match (field_tag >> 3, field_tag & 0x07) {
            (1, 2) => {
                let (body, end) = read_length_delimited(buf, pos)?;
                result.request_text = String::from_utf8_lossy(body).to_string();
                pos = end;
            }
            (2, 2) => {
                let (body, end) = read_length_delimited(buf, pos)?;
                result.response_text = String::from_utf8_lossy(body).to_string();
                pos = end;
            }
            (_, wire_type) => pos = skip_field(buf, pos, wire_type)?,
        }
    }
    Ok(result)
}

/// Read a length-delimited field body starting at `pos`; returns the body
/// slice and the position just past it.
fn read_length_delimited(buf: &[u8], pos: usize) -> Result<(&[u8], usize), DecodeError> {
    let (len, len_size) = decode_varint(&buf[pos..])?;
    let start = pos + len_size;
    // Checked: a hostile length varint can exceed both the buffer and usize
    let end = start
        .checked_add(len as usize)
        .filter(|&end| end <= buf.len())
        .ok_or(DecodeError::BufferTooShort)?;
    Ok((&buf[start..end], end))
}

fn skip_field(buf: &[u8], pos: usize, wire_type: u64) -> Result<usize, DecodeError> {
    match wire_type {
        0 => {
            let (_, size) = decode_varint(&buf[pos..])?;
            Ok(pos + size)
        }
        2 => {
            let (_, end) = read_length_delimited(buf, pos)?;
            Ok(end)
        }
        5 => Ok(pos + 4),
        1 => Ok(pos + 8),
        other => Err(DecodeError::UnknownWireType(other as u8)),
    }
}

/// Encode a varint to the buffer
fn encode_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Decode a varint from the buffer, returning (value, bytes_consumed)
fn decode_varint(buf: &[u8]) -> Result<(u64, usize), DecodeError> {
    let mut value: u64 = 0;
    let mut shift = 0;

    for (i, &byte) in buf.iter().enumerate() {
        value |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
        shift += 7;
        if shift >= 64 {
            return Err(DecodeError::InvalidVarint);
        }
    }

    Err(DecodeError::BufferTooShort)
}
