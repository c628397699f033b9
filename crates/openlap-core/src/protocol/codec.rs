//! Sentinel framing for byte-stream transports
//!
//! Splits an inbound byte stream on the `$` sentinel and quotes outbound
//! requests. Used with `tokio_util::codec::{FramedRead, FramedWrite}`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use super::{ProtocolError, MAX_FRAME_SIZE, REQUEST_PREFIX, SENTINEL};

/// Codec for `$`-terminated Control Unit frames
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec;

impl FrameCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match src.iter().position(|b| *b == SENTINEL) {
            Some(index) => {
                let frame = src.split_to(index).freeze();
                src.advance(1);
                Ok(Some(frame))
            }
            None => {
                if src.len() > MAX_FRAME_SIZE {
                    warn!(
                        len = src.len(),
                        "Discarding unterminated input exceeding maximum frame size"
                    );
                    src.clear();
                }
                Ok(None)
            }
        }
    }
}

impl Encoder<&[u8]> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, payload: &[u8], dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(payload.len() + 2);
        dst.put_u8(REQUEST_PREFIX);
        dst.put_slice(payload);
        dst.put_u8(SENTINEL);
        Ok(())
    }
}
