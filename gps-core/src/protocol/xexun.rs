//! Xexun protocol: a GPRMC sentence wrapped in device status fields.
//!
//! ```text
//! 111111120009,+436763737552,GPRMC,120009.590,A,4639.6774,N,01418.5737,E,0.00,0.00,111111,,,A*68,F,, imei:359853000144328,04,481.2,F:4.15V,0,139,2689,232,03,2725,0576
//! ```
//!
//! The GPRMC part carries time, position, speed (knots), course and date
//! (`ddmmyy`), guarded by the usual NMEA checksum. The tail after `imei:`
//! optionally carries satellites, altitude and the serving cell.

use std::sync::LazyLock;

use regex::Regex;

use super::{expect_arity, Protocol};
use crate::codec::{
    date_time_millis, knots_to_kph, nmea_to_decimal, parse_field, parse_hex_field,
    verify_nmea_checksum, Hemisphere,
};
use crate::framing::Framing;
use crate::message::{Decoded, MessageInput};
use crate::types::{CellTower, DeviceRef, Location, LocationBuilder, Result};

pub const FRAMING: Framing = Framing::Delimited { delimiter: b'\n' };

const ARITY: usize = 19;
const EXTENDED_ARITY: usize = 13;

static PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"GPRMC,(\d{2})(\d{2})(\d{2})\.(\d{3}),", // hh mm ss.sss
        r"([AV]),",                               // receiver status
        r"(\d{4}\.\d{4}),([NS]),",                // latitude
        r"(\d{5}\.\d{4}),([EW]),",                // longitude
        r"(.*?),(.*?),",                          // speed (knots), course
        r"(\d{2})(\d{2})(\d{2})",                 // dd mm yy
        r"(.*?)\*([0-9A-Fa-f]{2}),",              // rest of sentence, checksum
        r"(\w)",                                  // signal: F = full, L = low
        r"(.*?imei:)(\d{15})",
    ))
    .expect("xexun pattern is valid")
});

static EXTENDED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(.*?imei:)(\d{15}),",
        r"(\d+),",          // satellites
        r"(.*?),",          // altitude
        r"(F:)(.*?)V,",     // battery voltage
        r"(1|0),",          // charging
        r"(.*?),(.*?),",    // length, crc
        r"(\d+),",          // mcc
        r"([0-9A-Fa-f]+),", // mnc (hex)
        r"(.*?),",          // lac (hex)
        r"([0-9A-Fa-f]+)",  // cell id (hex)
    ))
    .expect("xexun extended pattern is valid")
});

pub fn parse(input: &MessageInput) -> Result<Decoded> {
    let text = input.text();
    let caps = expect_arity(Protocol::Xexun, PATTERN.captures(text), ARITY)?;

    // Checksum covers "GPRMC" up to (not including) the '*'
    let sentence_start = caps.get(0).map_or(0, |m| m.start());
    let sentence_end = caps.get(15).map_or(sentence_start, |m| m.end());
    verify_nmea_checksum(&text[sentence_start..sentence_end], &caps[16])?;

    let num = |i: usize, field: &'static str| parse_field::<u32>(field, &caps[i]);
    let date_time = date_time_millis(
        num(14, "year")?,
        num(13, "month")?,
        num(12, "day")?,
        num(1, "hour")?,
        num(2, "minute")?,
        num(3, "second")?,
        num(4, "millisecond")?,
    )?;

    let latitude = nmea_to_decimal(&caps[6], Hemisphere::parse(&caps[7])?)?;
    let longitude = nmea_to_decimal(&caps[8], Hemisphere::parse(&caps[9])?)?;
    let speed_knots: f64 = parse_field("speed", &caps[10])?;

    let mut builder = Location::builder(date_time, latitude, longitude)
        .device(DeviceRef::imei(&caps[19])?)
        .speed_kph(knots_to_kph(speed_knots))
        .valid(&caps[17] == "F");
    if !caps[11].trim().is_empty() {
        builder = builder.heading(parse_field("course", &caps[11])?);
    }
    let builder = extended(text, builder.clone()).unwrap_or(builder);

    Ok(Decoded::location(builder.build()?))
}

/// Apply the optional `imei:` tail. `None` leaves the primary fields alone.
fn extended(text: &str, builder: LocationBuilder) -> Option<LocationBuilder> {
    let caps = expect_arity(Protocol::Xexun, EXTENDED.captures(text), EXTENDED_ARITY).ok()?;

    let satellites: u16 = parse_field("satellites", &caps[3]).ok()?;
    let altitude: f64 = parse_field("altitude", &caps[4]).ok()?;
    let cell = CellTower {
        mcc: parse_field("mcc", &caps[10]).ok()?,
        mnc: u16::try_from(parse_hex_field("mnc", &caps[11]).ok()?).ok()?,
        lac: parse_hex_field("lac", &caps[12]).ok()?,
        cell_id: parse_hex_field("cell id", &caps[13]).ok()?,
    };

    Some(builder.satellites(satellites).altitude(altitude).cell(cell))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
