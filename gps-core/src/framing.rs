//! Frame boundary rules for a TCP byte stream.
//!
//! Each protocol owns one `Framing`. The listener feeds the bytes it has
//! buffered so far into [`Framing::split`] and acts on the answer:
//!
//! - `Frame { len }`: the first `len` bytes are one complete frame
//! - `Skip { len }`:  discard `len` bytes (garbage before a header, or an
//!   empty delimiter-only record) and try again
//! - `Incomplete`:    read more bytes

use crate::types::{GpsError, Result};

/// Largest frame accepted before the stream is considered garbled.
pub const MAX_FRAME_LEN: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Fixed header, then a big-endian u16 length at `length_offset`.
    /// Total frame size is `overhead + length`.
    LengthPrefixed {
        header: &'static [u8],
        length_offset: usize,
        overhead: usize,
    },
    /// Frame ends with (and includes) `delimiter`.
    Delimited { delimiter: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Frame { len: usize },
    Skip { len: usize },
    Incomplete,
}

impl Framing {
    pub fn split(&self, buf: &[u8]) -> Result<Split> {
        match *self {
            Framing::LengthPrefixed {
                header,
                length_offset,
                overhead,
            } => split_length_prefixed(buf, header, length_offset, overhead),
            Framing::Delimited { delimiter } => split_delimited(buf, delimiter),
        }
    }
}

fn split_length_prefixed(
    buf: &[u8],
    header: &[u8],
    length_offset: usize,
    overhead: usize,
) -> Result<Split> {
    if buf.len() < header.len() {
        // A partial header is only worth waiting for if it could still match
        return Ok(if header.starts_with(buf) {
            Split::Incomplete
        } else {
            Split::Skip { len: 1 }
        });
    }

    if !buf.starts_with(header) {
        // Resync: drop everything up to the next possible header start
        let skip = buf
            .windows(header.len())
            .position(|w| w == header)
            .unwrap_or(buf.len() - (header.len() - 1));
        return Ok(Split::Skip { len: skip.max(1) });
    }

    if buf.len() < length_offset + 2 {
        return Ok(Split::Incomplete);
    }
    let declared = u16::from_be_bytes([buf[length_offset], buf[length_offset + 1]]) as usize;
    let total = overhead + declared;
    if total > MAX_FRAME_LEN {
        return Err(GpsError::FrameTooLarge {
            limit: MAX_FRAME_LEN,
        });
    }
    if buf.len() < total {
        return Ok(Split::Incomplete);
    }
    Ok(Split::Frame { len: total })
}

fn split_delimited(buf: &[u8], delimiter: u8) -> Result<Split> {
    match buf.iter().position(|&b| b == delimiter) {
        Some(idx) => {
            let body = &buf[..idx];
            if body.iter().all(|b| b.is_ascii_whitespace()) {
                Ok(Split::Skip { len: idx + 1 })
            } else {
                Ok(Split::Frame { len: idx + 1 })
            }
        }
        None if buf.len() > MAX_FRAME_LEN => Err(GpsError::FrameTooLarge {
            limit: MAX_FRAME_LEN,
        }),
        None => Ok(Split::Incomplete),
    }
}

/// Strip the delimiter and surrounding line noise from a delimited frame.
pub fn trim_frame(frame: &[u8]) -> &[u8] {
    let start = frame
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(frame.len());
    let end = frame
        .iter()
        .rposition(|b| !matches!(b, b'\r' | b'\n'))
        .map_or(start, |i| i + 1);
    &frame[start..end.max(start)]
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
