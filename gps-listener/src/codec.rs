//! tokio-util codec over a protocol's framing rule.
//!
//! Decoding yields one raw frame per item; encoding writes reply bytes
//! unchanged.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use gps_core::framing::trim_frame;
use gps_core::{Framing, GpsError, Split};

#[derive(Debug)]
pub struct FrameCodec {
    framing: Framing,
    /// Bytes discarded while resynchronising or skipping blank records.
    skipped: usize,
}

impl FrameCodec {
    pub fn new(framing: Framing) -> Self {
        FrameCodec {
            framing,
            skipped: 0,
        }
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn finish(&self, frame: BytesMut) -> Vec<u8> {
        match self.framing {
            Framing::Delimited { .. } => trim_frame(&frame).to_vec(),
            Framing::LengthPrefixed { .. } => frame.to_vec(),
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Vec<u8>;
    type Error = GpsError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Vec<u8>>, GpsError> {
        loop {
            match self.framing.split(src)? {
                Split::Frame { len } => {
                    let frame = src.split_to(len);
                    return Ok(Some(self.finish(frame)));
                }
                Split::Skip { len } => {
                    src.advance(len);
                    self.skipped += len;
                }
                Split::Incomplete => return Ok(None),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Vec<u8>>, GpsError> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        // Text devices sometimes close without a final delimiter
        if let Framing::Delimited { .. } = self.framing {
            let rest = src.split();
            if !trim_frame(&rest).is_empty() {
                return Ok(Some(self.finish(rest)));
            }
            self.skipped += rest.len();
        } else {
            self.skipped += src.len();
            src.clear();
        }
        Ok(None)
    }
}

impl Encoder<Vec<u8>> for FrameCodec {
    type Error = GpsError;

    fn encode(&mut self, item: Vec<u8>, dst: &mut BytesMut) -> Result<(), GpsError> {
        dst.reserve(item.len());
        dst.put_slice(&item);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
