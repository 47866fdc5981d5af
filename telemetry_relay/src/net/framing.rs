use bytes::Bytes;
use station_protocol::{Frame, ProtocolError};
use tokio_util::codec::LengthDelimitedCodec;

/// [length (u32 BE)] [json(Frame)]
#[derive(Default, Clone)]
pub struct Framer;

impl Framer {
    pub fn codec(&self) -> LengthDelimitedCodec {
        station_protocol::frame_codec()
    }

    pub fn deframe(&self, body: &[u8]) -> Result<Frame, ProtocolError> {
        Frame::from_slice(body)
    }

    pub fn frame(&self, frame: &Frame) -> Result<Bytes, ProtocolError> {
        frame.to_bytes().map(Bytes::from)
    }
}
