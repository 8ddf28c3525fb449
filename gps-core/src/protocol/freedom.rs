//! Freedom text protocol.
//!
//! One record per line:
//!
//! ```text
//! IMEI,123456789012345,2024/01/02, 03:04:05, N, Lat:12.345600, E, Lon:098.765400, Spd:10.0
//! ```
//!
//! Coordinates are decimal degrees with a hemisphere letter; speed is knots.

use std::sync::LazyLock;

use regex::Regex;

use super::{expect_arity, Protocol};
use crate::codec::{date_time, knots_to_kph, parse_field, Hemisphere};
use crate::framing::Framing;
use crate::message::{Decoded, MessageInput};
use crate::types::{DeviceRef, Location, Result};

pub const FRAMING: Framing = Framing::Delimited { delimiter: b'\n' };

const ARITY: usize = 12;

static PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"IMEI,(\d{15}),",
        r"(\d{4})/(\d{2})/(\d{2}), ",
        r"(\d{2}):(\d{2}):(\d{2}), ",
        r"([NS]), Lat:(\d+\.\d+), ",
        r"([EW]), Lon:(\d+\.\d+), ",
        r"Spd:(\d+\.\d+)",
    ))
    .expect("freedom pattern is valid")
});

pub fn parse(input: &MessageInput) -> Result<Decoded> {
    let caps = expect_arity(Protocol::Freedom, PATTERN.captures(input.text()), ARITY)?;
    let num = |i: usize| parse_field::<u32>("freedom date/time", &caps[i]);

    let date_time = date_time(num(2)?, num(3)?, num(4)?, num(5)?, num(6)?, num(7)?)?;
    let latitude = Hemisphere::parse(&caps[8])?.apply(parse_field("latitude", &caps[9])?);
    let longitude = Hemisphere::parse(&caps[10])?.apply(parse_field("longitude", &caps[11])?);
    let speed_knots: f64 = parse_field("speed", &caps[12])?;

    let location = Location::builder(date_time, latitude, longitude)
        .device(DeviceRef::device_id(&caps[1]))
        .speed_kph(knots_to_kph(speed_knots))
        .build()?;

    Ok(Decoded::location(location))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GpsError;

    const FRAME: &str = "IMEI,123456789012345,2024/01/02, 03:04:05, N, Lat:12.345600, E, Lon:098.765400, Spd:10.0";

    #[test]
    fn test_decode_example_frame() {
        let decoded = parse(&MessageInput::from(FRAME)).unwrap();
        assert!(decoded.reply.is_none());
        let loc = decoded.location.unwrap();
        assert_eq!(loc.device.as_ref().map(DeviceRef::as_str), Some("123456789012345"));
        assert_eq!(loc.date_time.to_rfc3339(), "2024-01-02T03:04:05+00:00");
        assert!((loc.latitude - 12.3456).abs() < 1e-9);
        assert!((loc.longitude - 98.7654).abs() < 1e-9);
        assert!((loc.speed_kph - 18.52).abs() < 1e-9);
        assert!(loc.heading.is_none());
    }

    #[test]
    fn test_southern_western_hemispheres() {
        let frame = FRAME.replace(", N,", ", S,").replace(", E,", ", W,");
        let loc = parse(&MessageInput::from(frame.as_str()))
            .unwrap()
            .location
            .unwrap();
        assert!((loc.latitude + 12.3456).abs() < 1e-9);
        assert!((loc.longitude + 98.7654).abs() < 1e-9);
    }

    #[test]
    fn test_pattern_mismatch() {
        let err = parse(&MessageInput::from("IMEI,12345,garbage")).unwrap_err();
        assert!(matches!(err, GpsError::PatternMismatch { protocol: "freedom" }));
    }

    #[test]
    fn test_invalid_date_rejected() {
        let frame = FRAME.replace("2024/01/02", "2024/13/02");
        assert!(parse(&MessageInput::from(frame.as_str())).is_err());
    }
}
