//! gRPC transport for the Converse service
//!
//! Implements [`ConversationStream`] over an already-connected tonic
//! `Channel` using the low-level `Grpc` client with a custom codec, since the
//! messages are hand-encoded rather than prost-generated. Authentication is a
//! bearer token attached as request metadata; channel setup, TLS and token
//! refresh all live outside this module.

use bytes::{Buf, BufMut};
use futures::StreamExt;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::Channel;
use tonic::{Request, Status};
use tracing::{debug, info};

use async_trait::async_trait;

use super::messages::{ConverseRequest, ConverseResponse};
use super::{ChunkStream, ConversationStream, EventStream, StreamError};
use crate::config::AudioFormat;

/// gRPC method path for the bidirectional Converse call.
const CONVERSE_METHOD_PATH: &str = "/google.assistant.embedded.v1alpha1.EmbeddedAssistant/Converse";

/// One-turn Converse client over a shared channel.
///
/// Channels are cheap to clone; each turn constructs a fresh instance.
pub struct GrpcConversation {
    channel: Channel,
    token: String,
    format: AudioFormat,
    volume_percent: u8,
}

impl GrpcConversation {
    pub fn new(channel: Channel, token: String, format: AudioFormat, volume_percent: u8) -> Self {
        Self {
            channel,
            token,
            format,
            volume_percent,
        }
    }

    fn metadata(&self) -> Result<tonic::metadata::MetadataMap, StreamError> {
        let mut metadata = tonic::metadata::MetadataMap::new();
        let bearer = format!("Bearer {}", self.token)
            .parse()
            .map_err(|_| StreamError::AuthenticationRejected("token is not ASCII".to_string()))?;
        metadata.insert("authorization", bearer);
        Ok(metadata)
    }
}

#[async_trait]
impl ConversationStream for GrpcConversation {
    async fn converse(self: Box<Self>, outbound: ChunkStream) -> Result<EventStream, StreamError> {
        let metadata = self.metadata()?;
        let format = self.format;
        let volume = self.volume_percent;

        // The config frame always leads; everything after is audio.
        let requests = async_stream::stream! {
            yield ConverseRequest::config(format, volume);
            let mut outbound = outbound;
            while let Some(chunk) = outbound.next().await {
                yield ConverseRequest::audio(chunk);
            }
            debug!("outbound audio exhausted");
        };

        let mut request = Request::new(requests);
        *request.metadata_mut() = metadata;

        let mut grpc = tonic::client::Grpc::new(self.channel);
        grpc.ready()
            .await
            .map_err(|e| StreamError::ConnectionFailed(format!("service not ready: {e}")))?;

        let response = grpc
            .streaming(
                request,
                PathAndQuery::from_static(CONVERSE_METHOD_PATH),
                ConverseCodec,
            )
            .await
            .map_err(StreamError::from_status)?;

        let mut frames = response.into_inner();
        let events = async_stream::stream! {
            while let Some(frame) = frames.next().await {
                match frame {
                    Ok(response) => {
                        if let Some(result) = &response.result {
                            if !result.request_text.is_empty() {
                                info!(text = %result.request_text, "recognized request");
                            }
                            if !result.response_text.is_empty() {
                                info!(text = %result.response_text, "assistant response");
                            }
                        }
                        match response.into_event() {
                            Ok(Some(event)) => yield Ok(event),
                            Ok(None) => {}
                            Err(e) => {
                                yield Err(e);
                                break;
                            }
                        }
                    }
                    Err(status) => {
                        yield Err(StreamError::from_status(status));
                        break;
                    }
                }
            }
            debug!("response stream ended");
        };

        Ok(Box::pin(events))
    }
}

/// Codec bridging the hand-encoded Converse messages into tonic framing.
#[derive(Debug, Clone, Default)]
struct ConverseCodec;

impl tonic::codec::Codec for ConverseCodec {
    type Encode = ConverseRequest;
    type Decode = ConverseResponse;
    type Encoder = ConverseEncoder;
    type Decoder = ConverseDecoder;

    fn encoder(&mut self) -> Self::Encoder {
        ConverseEncoder
    }

    fn decoder(&mut self) -> Self::Decoder {
        ConverseDecoder
    }
}

#[derive(Debug, Clone, Default)]
struct ConverseEncoder;

impl tonic::codec::Encoder for ConverseEncoder {
    type Item = ConverseRequest;
    type Error = Status;

    fn encode(
        &mut self,
        item: Self::Item,
        dst: &mut tonic::codec::EncodeBuf<'_>,
    ) -> Result<(), Self::Error> {
        let bytes = item.encode();
        dst.reserve(bytes.len());
        dst.put_slice(&bytes);
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
struct ConverseDecoder;

impl tonic::codec::Decoder for ConverseDecoder {
    type Item = ConverseResponse;
    type Error = Status;

    fn decode(
        &mut self,
        src: &mut tonic::codec::DecodeBuf<'_>,
    ) -> Result<Option<Self::Item>, Self::Error> {
        let remaining = src.remaining();
        if remaining == 0 {
            return Ok(None);
        }
        let data = src.copy_to_bytes(remaining);
        ConverseResponse::decode(&data)
            .map(Some)
            .map_err(|e| Status::internal(format!("malformed Converse frame: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client(token: &str) -> GrpcConversation {
        let channel = Channel::from_static("http://localhost:50051").connect_lazy();
        GrpcConversation::new(channel, token.to_string(), AudioFormat::default(), 50)
    }

    #[tokio::test]
    async fn test_metadata_carries_bearer_token() {
        let client = test_client("opaque-token");
        let metadata = client.metadata().unwrap();
        assert_eq!(
            metadata.get("authorization").unwrap(),
            "Bearer opaque-token"
        );
    }

    #[tokio::test]
    async fn test_non_ascii_token_rejected() {
        let client = test_client("jeton-privé");
        assert!(matches!(
            client.metadata(),
            Err(StreamError::AuthenticationRejected(_))
        ));
    }

    #[test]
    fn test_encoder_produces_wire_bytes() {
        use tonic::codec::Codec;
        let mut codec = ConverseCodec;
        let _ = codec.encoder();
        let _ = codec.decoder();

        let encoded = ConverseRequest::audio(bytes::Bytes::from_static(&[1, 2])).encode();
        assert_eq!(encoded, vec![0x12, 0x02, 0x01, 0x02]);
    }
}
