use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::core::{CodecError, Error};
use super::packet::PacketFrame;

/// 6P frame codec for datagram-style transports
///
/// Each buffer handed to the decoder holds exactly one 6top sub-IE content;
/// the whole buffer is consumed whether or not it parses.
#[derive(Clone, Copy, Debug, Default)]
pub struct SixpCodec;

impl SixpCodec {
    /// Creates a new frame codec
    pub fn new() -> Self {
        SixpCodec
    }
}

impl Decoder for SixpCodec {
    type Item = PacketFrame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        // Take the whole datagram
        let frame_bytes = src.split().freeze();

        PacketFrame::decode_bytes(frame_bytes)
            .map(Some)
            .map_err(Error::from)
    }
}

impl Encoder<PacketFrame> for SixpCodec {
    type Error = Error;

    fn encode(&mut self, item: PacketFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        <Self as Encoder<&PacketFrame>>::encode(self, &item, dst)
    }
}

impl<'a> Encoder<&'a PacketFrame> for SixpCodec {
    type Error = Error;

    fn encode(&mut self, item: &'a PacketFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if !item.code.matches(item.msg_type) {
            return Err(CodecError::UnsupportedCode {
                msg_type: item.msg_type as u8,
                code: item.code.value(),
            }
            .into());
        }
        item.write_to(dst);
        Ok(())
    }
}
