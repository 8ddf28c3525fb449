//! Supported device protocols and the decoder behind each one.
//!
//! The set is closed: every protocol is a `Protocol` variant, and the
//! exhaustive matches below tie each variant to exactly one decoder and one
//! framing rule. New hardware means a new variant and a new module.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::framing::Framing;
use crate::message::{Decoded, MessageInput};
use crate::types::{GpsError, Result};

pub mod amwell;
pub mod freedom;
pub mod haicom;
pub mod xexun;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Fixed-offset binary frames with a login handshake.
    Amwell,
    /// `IMEI,...` text lines with decimal coordinates.
    Freedom,
    /// `$GPRS...#V...*` text records.
    Haicom,
    /// GPRMC sentences wrapped with device status and IMEI.
    Xexun,
}

impl Protocol {
    pub const ALL: [Protocol; 4] = [
        Protocol::Amwell,
        Protocol::Freedom,
        Protocol::Haicom,
        Protocol::Xexun,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Protocol::Amwell => "amwell",
            Protocol::Freedom => "freedom",
            Protocol::Haicom => "haicom",
            Protocol::Xexun => "xexun",
        }
    }

    /// How frames are delimited on the wire.
    pub fn framing(self) -> Framing {
        match self {
            Protocol::Amwell => amwell::FRAMING,
            Protocol::Freedom => freedom::FRAMING,
            Protocol::Haicom => haicom::FRAMING,
            Protocol::Xexun => xexun::FRAMING,
        }
    }

    /// True for protocols whose frames are ASCII text.
    pub fn is_text(self) -> bool {
        !matches!(self, Protocol::Amwell)
    }

    /// Decode one frame.
    pub fn parse(self, input: &MessageInput) -> Result<Decoded> {
        match self {
            Protocol::Amwell => amwell::parse(input),
            Protocol::Freedom => freedom::parse(input),
            Protocol::Haicom => haicom::parse(input),
            Protocol::Xexun => xexun::parse(input),
        }
    }

    /// Recognise a protocol from the first bytes of a connection.
    ///
    /// Signatures are checked in a fixed order so the answer never depends
    /// on anything but the bytes.
    pub fn sniff(prefix: &[u8]) -> Option<Protocol> {
        if prefix.starts_with(amwell::HEADER) {
            return Some(Protocol::Amwell);
        }
        let text = String::from_utf8_lossy(prefix);
        let text = text.trim_start();
        if text.starts_with("IMEI,") {
            Some(Protocol::Freedom)
        } else if text.starts_with("$GPRS") || text.starts_with("GPRS") {
            Some(Protocol::Haicom)
        } else if text.contains("GPRMC,") {
            Some(Protocol::Xexun)
        } else {
            None
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Protocol {
    type Err = GpsError;

    fn from_str(s: &str) -> Result<Self> {
        Protocol::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| GpsError::invalid("protocol", s))
    }
}

/// Check a regex match has exactly the capture arity a decoder relies on.
pub(crate) fn expect_arity<'t>(
    protocol: Protocol,
    captures: Option<regex::Captures<'t>>,
    arity: usize,
) -> Result<regex::Captures<'t>> {
    match captures {
        // `len()` counts the implicit whole-match group
        Some(caps) if caps.len() == arity + 1 && caps.iter().all(|g| g.is_some()) => Ok(caps),
        _ => Err(GpsError::PatternMismatch {
            protocol: protocol.name(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_roundtrip() {
        for p in Protocol::ALL {
            assert_eq!(p.name().parse::<Protocol>().unwrap(), p);
        }
        assert_eq!("XEXUN".parse::<Protocol>().unwrap(), Protocol::Xexun);
        assert!("gt06".parse::<Protocol>().is_err());
    }

    #[test]
    fn test_sniff_signatures() {
        assert_eq!(
            Protocol::sniff(&[0x29, 0x29, 0xB1, 0x00]),
            Some(Protocol::Amwell)
        );
        assert_eq!(
            Protocol::sniff(b"IMEI,123456789012345,2024"),
            Some(Protocol::Freedom)
        );
        assert_eq!(
            Protocol::sniff(b"$GPRS012497007097169,T1"),
            Some(Protocol::Haicom)
        );
        assert_eq!(
            Protocol::sniff(b"111111120009,+436763737552,GPRMC,120009.590"),
            Some(Protocol::Xexun)
        );
        assert_eq!(Protocol::sniff(b"HELLO"), None);
        assert_eq!(Protocol::sniff(&[]), None);
    }

    #[test]
    fn test_sniff_is_deterministic() {
        let prefix = b"IMEI,GPRMC,";
        let first = Protocol::sniff(prefix);
        for _ in 0..10 {
            assert_eq!(Protocol::sniff(prefix), first);
        }
        assert_eq!(first, Some(Protocol::Freedom));
    }

    #[test]
    fn test_text_flag() {
        assert!(!Protocol::Amwell.is_text());
        assert!(Protocol::Xexun.is_text());
    }
}
