//! One inbound frame, in every representation a decoder may want.

use crate::codec::hex_tokens;
use crate::cursor::ByteCursor;
use crate::types::Location;

/// A single frame as handed to a protocol decoder.
///
/// The raw bytes are fixed once the frame boundary is known; the hex tokens
/// and text are derived from them up front.
#[derive(Debug, Clone)]
pub struct MessageInput {
    bytes: Vec<u8>,
    hex: Vec<String>,
    text: String,
}

impl MessageInput {
    pub fn new(bytes: Vec<u8>) -> Self {
        let hex = hex_tokens(&bytes);
        let text = String::from_utf8_lossy(&bytes).into_owned();
        MessageInput { bytes, hex, text }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Two uppercase hex characters per byte, indexable like `bytes()`.
    pub fn hex(&self) -> &[String] {
        &self.hex
    }

    /// Lossy text decoding; non-UTF-8 bytes become U+FFFD.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Fresh cursor at offset 0.
    pub fn cursor(&self) -> ByteCursor<'_> {
        ByteCursor::new(&self.bytes)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl From<&[u8]> for MessageInput {
    fn from(bytes: &[u8]) -> Self {
        MessageInput::new(bytes.to_vec())
    }
}

impl From<&str> for MessageInput {
    fn from(text: &str) -> Self {
        MessageInput::new(text.as_bytes().to_vec())
    }
}

/// Outcome of decoding one frame.
///
/// `reply` holds bytes the session must write back to the device before
/// reading the next frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Decoded {
    pub location: Option<Location>,
    pub reply: Option<Vec<u8>>,
}

impl Decoded {
    pub fn location(location: Location) -> Self {
        Decoded {
            location: Some(location),
            reply: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.location.is_none() && self.reply.is_none()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_representations() {
        let input = MessageInput::from(&[0x29, 0x29, 0x41][..]);
        assert_eq!(input.hex(), ["29", "29", "41"]);
        assert_eq!(input.text(), "))A");
        assert_eq!(input.len(), 3);
        assert_eq!(input.cursor().remaining(), 3);
    }

    #[test]
    fn test_lossy_text() {
        let input = MessageInput::new(vec![b'O', b'K', 0xFF]);
        assert!(input.text().starts_with("OK"));
        assert!(input.text().contains('\u{FFFD}'));
    }

    #[test]
    fn test_each_cursor_starts_at_zero() {
        let input = MessageInput::from("IMEI,1");
        let mut first = input.cursor();
        first.skip(4).unwrap();
        assert_eq!(input.cursor().position(), 0);
    }

    #[test]
    fn test_decoded_default_is_empty() {
        assert!(Decoded::default().is_empty());
        let with_reply = Decoded {
            location: None,
            reply: Some(vec![0x0D]),
        };
        assert!(!with_reply.is_empty());
    }
}
