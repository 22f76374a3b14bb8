use bytes::{Buf, BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

use crate::frame::Frame;
use crate::parser::parse_frame_slice;

/// `StompCodec` implements `tokio_util::codec::{Decoder, Encoder}` for the
/// STOMP wire protocol.
///
/// Responsibilities:
/// - Reassemble frames from arbitrary chunk boundaries. A frame ends at a
///   NUL byte; an LF directly after the NUL is optional and consumed when
///   present.
/// - Honour `content-length` on inbound frames so binary bodies may carry
///   NUL bytes (see `parse_frame_slice` for when NUL framing wins).
/// - Encode frames as `COMMAND\n{key:value\n}*\n{body}\0`, emitting
///   `content-length` when the body itself contains a NUL.
///
/// Decoding never fails: malformed input surfaces as a frame with an
/// unrecognized command.
#[derive(Debug, Default)]
pub struct StompCodec {
    // no state: the read buffer owned by `Framed` carries partial frames
}

impl StompCodec {
    pub fn new() -> Self {
        Self {}
    }
}

impl Decoder for StompCodec {
    type Item = Frame;
    type Error = io::Error;

    /// Decode the next complete frame from `src`.
    ///
    /// Returns `Ok(Some(frame))` once a full frame has been consumed from the
    /// buffer and `Ok(None)` while more bytes are needed. Stray LF bytes
    /// between frames are discarded.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let skip = src.iter().take_while(|&&b| b == b'\n').count();
        src.advance(skip);
        if src.is_empty() {
            return Ok(None);
        }

        match parse_frame_slice(&src[..]) {
            Some((frame, consumed)) => {
                src.advance(consumed);
                Ok(Some(frame))
            }
            None => Ok(None),
        }
    }

    /// Like `decode`, but an unterminated tail left when the transport ends
    /// is dropped instead of being reported as an error.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None => {
                if !src.is_empty() {
                    tracing::debug!(
                        bytes = src.len(),
                        "discarding incomplete frame at end of stream"
                    );
                    src.clear();
                }
                Ok(None)
            }
        }
    }
}

impl Encoder<Frame> for StompCodec {
    type Error = io::Error;

    /// Encode a `Frame` into the destination buffer provided by `Framed`.
    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(frame.command.as_bytes());
        dst.put_u8(b'\n');

        let has_cl = frame.headers.iter().any(|(k, _)| k == "content-length");
        for (k, v) in &frame.headers {
            dst.extend_from_slice(k.as_bytes());
            dst.put_u8(b':');
            dst.extend_from_slice(v.as_bytes());
            dst.put_u8(b'\n');
        }
        if !has_cl && frame.body.contains(&0) {
            dst.extend_from_slice(format!("content-length:{}\n", frame.body.len()).as_bytes());
        }

        dst.put_u8(b'\n');
        dst.extend_from_slice(&frame.body);
        dst.put_u8(0);
        Ok(())
    }
}

/// Encode a single frame into a fresh byte vector.
pub fn encode_frame(frame: Frame) -> Vec<u8> {
    let mut dst = BytesMut::new();
    // Encoding into an in-memory buffer cannot fail.
    let _ = StompCodec::new().encode(frame, &mut dst);
    dst.to_vec()
}

/// Incremental decoder for callers that receive raw chunks themselves.
///
/// Bytes are accumulated across calls to [`FrameDecoder::push`]; each call
/// returns an iterator over the frames completed so far, in arrival order.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    codec: StompCodec,
    buffer: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and iterate over every frame it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Frames<'_> {
        self.buffer.extend_from_slice(chunk);
        Frames { decoder: self }
    }

    /// Bytes held back waiting for the rest of a frame.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any partial frame, e.g. when a new connection starts.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

/// Lazy iterator returned by [`FrameDecoder::push`].
pub struct Frames<'a> {
    decoder: &'a mut FrameDecoder,
}

impl Iterator for Frames<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        let FrameDecoder { codec, buffer } = &mut *self.decoder;
        codec.decode(buffer).ok().flatten()
    }
}
