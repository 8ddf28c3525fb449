//! Low-level codec helpers shared by every protocol decoder.
//!
//! - Hex string / hex token conversion
//! - XOR-fold and NMEA checksums
//! - BCD ("hex digits read as decimal") numbers
//! - Sexagesimal coordinates to signed decimal degrees
//! - Composite date/time construction, 2-digit years as 2000 + yy
//! - Knots to km/h, bit flags

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};

use crate::types::{GpsError, Result};

/// Kilometres per hour in one knot.
pub const KNOT_KPH: f64 = 1.852;

// ---------------------------------------------------------------------------
// Hex utilities
// ---------------------------------------------------------------------------

const HEX_CHARS: &[u8; 16] = b"0123456789ABCDEF";

fn hex_digit(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

/// Decode a hex string into bytes. Case-insensitive, must be even length.
pub fn hex_decode(hex: &str) -> Result<Vec<u8>> {
    let trimmed = hex.trim();
    if !trimmed.len().is_multiple_of(2) {
        return Err(GpsError::InvalidHex(hex.to_string()));
    }
    let mut bytes = Vec::with_capacity(trimmed.len() / 2);
    for chunk in trimmed.as_bytes().chunks(2) {
        match (hex_digit(chunk[0]), hex_digit(chunk[1])) {
            (Some(high), Some(low)) => bytes.push((high << 4) | low),
            _ => return Err(GpsError::InvalidHex(hex.to_string())),
        }
    }
    Ok(bytes)
}

/// Encode bytes as an uppercase hex string.
pub fn hex_encode(data: &[u8]) -> String {
    let mut s = String::with_capacity(data.len() * 2);
    for &b in data {
        s.push(HEX_CHARS[(b >> 4) as usize] as char);
        s.push(HEX_CHARS[(b & 0x0F) as usize] as char);
    }
    s
}

/// One two-character uppercase token per byte.
pub fn hex_tokens(data: &[u8]) -> Vec<String> {
    data.iter().map(|b| format!("{b:02X}")).collect()
}

// ---------------------------------------------------------------------------
// Checksums
// ---------------------------------------------------------------------------

/// Single-byte running XOR over `data`.
pub fn xor_checksum(data: &[u8]) -> u8 {
    data.iter().fold(0, |acc, &b| acc ^ b)
}

/// XOR-fold rendered as two uppercase hex digits.
pub fn xor_checksum_hex(data: &[u8]) -> String {
    format!("{:02X}", xor_checksum(data))
}

/// Verify an NMEA sentence against its declared `*CS` hex checksum.
///
/// `sentence` is everything between the `$` (if any) and the `*`.
pub fn verify_nmea_checksum(sentence: &str, declared_hex: &str) -> Result<()> {
    let declared = u8::from_str_radix(declared_hex, 16)
        .map_err(|_| GpsError::invalid("nmea checksum", declared_hex))?;
    let computed = xor_checksum(sentence.as_bytes());
    if declared != computed {
        return Err(GpsError::ChecksumMismatch { declared, computed });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Numbers
// ---------------------------------------------------------------------------

/// Read packed BCD bytes as a decimal number (`[0x02, 0x70]` -> 270).
///
/// Fails on any nibble above 9.
pub fn bcd_value(data: &[u8]) -> Result<u32> {
    let mut val: u32 = 0;
    for &b in data {
        let (high, low) = (b >> 4, b & 0x0F);
        if high > 9 || low > 9 {
            return Err(GpsError::invalid("bcd", hex_encode(data)));
        }
        val = val
            .checked_mul(100)
            .and_then(|v| v.checked_add((high * 10 + low) as u32))
            .ok_or_else(|| GpsError::invalid("bcd", hex_encode(data)))?;
    }
    Ok(val)
}

/// Parse a regex capture or field into a number, naming the field on failure.
pub fn parse_field<T: FromStr>(field: &'static str, text: &str) -> Result<T> {
    text.trim()
        .parse()
        .map_err(|_| GpsError::invalid(field, text))
}

/// Parse a hexadecimal field (`"2725"` -> 0x2725).
pub fn parse_hex_field(field: &'static str, text: &str) -> Result<u32> {
    u32::from_str_radix(text.trim(), 16).map_err(|_| GpsError::invalid(field, text))
}

/// Test bit `index` (0 = least significant) of `value`.
pub fn bit_is_set(value: u32, index: u32) -> bool {
    index < 32 && value & (1 << index) != 0
}

pub fn knots_to_kph(knots: f64) -> f64 {
    knots * KNOT_KPH
}

// ---------------------------------------------------------------------------
// Coordinates
// ---------------------------------------------------------------------------

/// Hemisphere indicator attached to a coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hemisphere {
    North,
    South,
    East,
    West,
}

impl Hemisphere {
    /// Parse `N`, `S`, `E` or `W`.
    pub fn parse(text: &str) -> Result<Self> {
        match text.trim() {
            "N" | "n" => Ok(Hemisphere::North),
            "S" | "s" => Ok(Hemisphere::South),
            "E" | "e" => Ok(Hemisphere::East),
            "W" | "w" => Ok(Hemisphere::West),
            other => Err(GpsError::invalid("hemisphere", other)),
        }
    }

    pub fn is_negative(self) -> bool {
        matches!(self, Hemisphere::South | Hemisphere::West)
    }

    /// Apply the hemisphere sign to an unsigned magnitude.
    pub fn apply(self, magnitude: f64) -> f64 {
        if self.is_negative() {
            -magnitude.abs()
        } else {
            magnitude.abs()
        }
    }
}

/// Degrees + minutes to decimal degrees, negated when `negative`.
pub fn dm_to_decimal(degrees: f64, minutes: f64, negative: bool) -> f64 {
    let value = degrees + minutes / 60.0;
    if negative {
        -value
    } else {
        value
    }
}

/// Degrees + thousandths of a minute (`minutes * 1000`) to decimal degrees.
pub fn dm_thousandths_to_decimal(degrees: u32, milli_minutes: u32, negative: bool) -> f64 {
    dm_to_decimal(degrees as f64, milli_minutes as f64 / 1000.0, negative)
}

/// NMEA `ddmm.mmmm` / `dddmm.mmmm` with a hemisphere letter.
pub fn nmea_to_decimal(text: &str, hemisphere: Hemisphere) -> Result<f64> {
    let raw: f64 = parse_field("nmea coordinate", text)?;
    if raw < 0.0 {
        return Err(GpsError::invalid("nmea coordinate", text));
    }
    let degrees = (raw / 100.0).trunc();
    let minutes = raw - degrees * 100.0;
    if minutes >= 60.0 {
        return Err(GpsError::invalid("nmea coordinate", text));
    }
    Ok(dm_to_decimal(degrees, minutes, hemisphere.is_negative()))
}

// ---------------------------------------------------------------------------
// Date / time
// ---------------------------------------------------------------------------

/// Expand a 2-digit year to `2000 + yy`; 4-digit years pass through.
pub fn full_year(year: u32) -> i32 {
    if year < 100 {
        2000 + year as i32
    } else {
        year as i32
    }
}

/// Combine separated numeric components into one UTC timestamp.
pub fn date_time(
    year: u32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
) -> Result<DateTime<Utc>> {
    date_time_millis(year, month, day, hour, minute, second, 0)
}

/// Same as [`date_time`] with a millisecond component.
pub fn date_time_millis(
    year: u32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
    millis: u32,
) -> Result<DateTime<Utc>> {
    let invalid = || {
        GpsError::invalid(
            "date/time",
            format!("{year:02}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}.{millis:03}"),
        )
    };
    NaiveDate::from_ymd_opt(full_year(year), month, day)
        .and_then(|d| d.and_hms_milli_opt(hour, minute, second, millis))
        .map(|dt| dt.and_utc())
        .ok_or_else(invalid)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};
    use proptest::prelude::*;

    /// Inverse of `dm_to_decimal`, for round-trip checks.
    fn decimal_to_dm(value: f64) -> (f64, f64, bool) {
        let magnitude = value.abs();
        let degrees = magnitude.trunc();
        (degrees, (magnitude - degrees) * 60.0, value < 0.0)
    }

    #[test]
    fn test_hex_decode() {
        assert_eq!(hex_decode("2929b1").unwrap(), vec![0x29, 0x29, 0xB1]);
        assert!(hex_decode("abc").is_err()); // odd length
        assert!(hex_decode("ZZZZ").is_err()); // invalid chars
    }

    #[test]
    fn test_hex_encode() {
        assert_eq!(hex_encode(&[0x29, 0x29, 0x0D]), "29290D");
    }

    proptest! {
        #[test]
        fn prop_hex_identity(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
            let hex = hex_encode(&bytes);
            prop_assert_eq!(hex.len(), bytes.len() * 2);
            prop_assert_eq!(hex_tokens(&bytes).concat(), hex.clone());
            prop_assert_eq!(hex_decode(&hex.to_lowercase()).unwrap(), bytes.clone());
            prop_assert_eq!(hex_decode(&hex).unwrap(), bytes);
        }

        #[test]
        fn prop_xor_checksum_deterministic(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
            let checksum = xor_checksum(&bytes);
            prop_assert_eq!(checksum, xor_checksum(&bytes));
            prop_assert_eq!(xor_checksum_hex(&bytes), format!("{checksum:02X}"));

            // Appending the checksum folds the whole run to zero
            let mut sealed = bytes;
            sealed.push(checksum);
            prop_assert_eq!(xor_checksum(&sealed), 0);
        }

        #[test]
        fn prop_dm_round_trip(value in -180.0f64..180.0) {
            let (deg, min, negative) = decimal_to_dm(value);
            let back = dm_to_decimal(deg, min, negative);
            prop_assert!((back - value).abs() < 1e-9, "{} -> {}", value, back);
            prop_assert_eq!(back < 0.0, value < 0.0);
        }

        #[test]
        fn prop_dm_thousandths_sign(
            degrees in 0u32..180,
            milli_minutes in 0u32..60_000,
            negative in any::<bool>(),
        ) {
            let value = dm_thousandths_to_decimal(degrees, milli_minutes, negative);
            let magnitude = degrees as f64 + milli_minutes as f64 / 60_000.0;
            prop_assert!((value.abs() - magnitude).abs() < 1e-9);
            prop_assert_eq!(value < 0.0, negative && magnitude > 0.0);
        }

        #[test]
        fn prop_nmea_ddmm(
            degrees in 0u32..180,
            minutes in 0.0f64..59.9999,
            west in any::<bool>(),
        ) {
            let text = format!("{degrees:03}{minutes:07.4}");
            let hemisphere = if west { Hemisphere::West } else { Hemisphere::East };
            let value = nmea_to_decimal(&text, hemisphere).unwrap();

            let written: f64 = format!("{minutes:.4}").parse().unwrap();
            let magnitude = degrees as f64 + written / 60.0;
            prop_assert!((value.abs() - magnitude).abs() < 1e-9, "{} -> {}", text, value);
            prop_assert_eq!(value < 0.0, west && magnitude > 0.0);
        }

        #[test]
        fn prop_nmea_minutes_out_of_range(degrees in 0u32..90, minutes in 60.0f64..99.99) {
            let text = format!("{degrees:02}{minutes:07.4}");
            prop_assert!(nmea_to_decimal(&text, Hemisphere::North).is_err());
        }
    }

    #[test]
    fn test_hex_tokens() {
        assert_eq!(hex_tokens(&[0x02, 0xAB]), vec!["02", "AB"]);
    }

    #[test]
    fn test_xor_checksum() {
        assert_eq!(xor_checksum(&[]), 0);
        assert_eq!(xor_checksum(&[0x29, 0x29]), 0);
        assert_eq!(xor_checksum(&[0x21, 0x00, 0x05]), 0x24);
        // Deterministic over the same bytes
        let reply = [0x29, 0x29, 0x21, 0x00, 0x05, 0x4C, 0xB1, 0x06];
        assert_eq!(xor_checksum_hex(&reply), xor_checksum_hex(&reply));
        assert_eq!(xor_checksum_hex(&reply), "DF");
    }

    #[test]
    fn test_nmea_checksum() {
        let body = "GPRMC,120009.590,A,4639.6774,N,01418.5737,E,0.00,0.00,111111,,,A";
        assert!(verify_nmea_checksum(body, "68").is_ok());
        assert!(matches!(
            verify_nmea_checksum(body, "69"),
            Err(GpsError::ChecksumMismatch {
                declared: 0x69,
                computed: 0x68
            })
        ));
        assert!(verify_nmea_checksum(body, "G1").is_err());
    }

    #[test]
    fn test_bcd_value() {
        assert_eq!(bcd_value(&[0x02, 0x70]).unwrap(), 270);
        assert_eq!(bcd_value(&[0x24]).unwrap(), 24);
        assert_eq!(bcd_value(&[]).unwrap(), 0);
        assert!(bcd_value(&[0x1A]).is_err());
    }

    #[test]
    fn test_parse_fields() {
        assert_eq!(parse_field::<u16>("sats", "04").unwrap(), 4);
        assert!(parse_field::<u16>("sats", "x").is_err());
        assert_eq!(parse_hex_field("lac", "2725").unwrap(), 0x2725);
        assert!(parse_hex_field("lac", "").is_err());
    }

    #[test]
    fn test_bit_is_set() {
        assert!(bit_is_set(0b101, 0));
        assert!(!bit_is_set(0b101, 1));
        assert!(bit_is_set(0b101, 2));
        assert!(!bit_is_set(u32::MAX, 32));
    }

    #[test]
    fn test_knots_to_kph() {
        assert_eq!(knots_to_kph(10.0), 18.52);
        assert_eq!(knots_to_kph(1.0), 1.852);
        assert_eq!(knots_to_kph(0.0), 0.0);
    }

    #[test]
    fn test_hemisphere_sign() {
        assert_eq!(Hemisphere::parse("S").unwrap().apply(12.5), -12.5);
        assert_eq!(Hemisphere::parse("E").unwrap().apply(12.5), 12.5);
        assert_eq!(Hemisphere::parse("W").unwrap().apply(-12.5), -12.5);
        assert!(Hemisphere::parse("X").is_err());
    }

    #[test]
    fn test_dm_thousandths() {
        let v = dm_thousandths_to_decimal(22, 32123, false);
        assert!((v - 22.535_383_333).abs() < 1e-6);
        assert!(dm_thousandths_to_decimal(22, 32123, true) < 0.0);
    }

    #[test]
    fn test_nmea_to_decimal() {
        let lat = nmea_to_decimal("4639.6774", Hemisphere::North).unwrap();
        assert!((lat - 46.661_29).abs() < 1e-6);
        let lon = nmea_to_decimal("01418.5737", Hemisphere::West).unwrap();
        assert!((lon + 14.309_561_666).abs() < 1e-6);
        assert!(nmea_to_decimal("4675.0000", Hemisphere::North).is_err());
        assert!(nmea_to_decimal("abc", Hemisphere::North).is_err());
    }

    #[test]
    fn test_date_time_two_digit_year() {
        let dt = date_time(24, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-01-02T03:04:05+00:00");
        let dt = date_time(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(dt.year(), 2024);
    }

    #[test]
    fn test_date_time_millis() {
        let dt = date_time_millis(11, 11, 11, 12, 0, 9, 590).unwrap();
        assert_eq!(dt.nanosecond(), 590_000_000);
        assert_eq!(dt.second(), 9);
    }

    #[test]
    fn test_date_time_invalid() {
        assert!(date_time(24, 13, 1, 0, 0, 0).is_err());
        assert!(date_time(24, 2, 30, 0, 0, 0).is_err());
        assert!(date_time(24, 1, 1, 24, 0, 0).is_err());
    }
}
