//! Haicom text protocol.
//!
//! ```text
//! $GPRS012497007097169,T100001,150618,230031,5402267400332464,0004,2014,000001,,,1,00#V040*
//!      imei            version yymmdd hhmmss F DD MMmmm DDD MMmmm speed hdg status ...  battery
//! ```
//!
//! The single flag digit `F` carries the fix and the hemispheres:
//! bit 0 = valid fix, bit 1 = east, bit 2 = north. Speed and heading are in
//! tenths.

use std::sync::LazyLock;

use regex::Regex;

use super::{expect_arity, Protocol};
use crate::codec::{bit_is_set, date_time, dm_thousandths_to_decimal, parse_field};
use crate::framing::Framing;
use crate::message::{Decoded, MessageInput};
use crate::types::{DeviceRef, GpsError, Location, Result};

pub const FRAMING: Framing = Framing::Delimited { delimiter: b'*' };

const ARITY: usize = 21;

const FLAG_VALID: u32 = 0;
const FLAG_EAST: u32 = 1;
const FLAG_NORTH: u32 = 2;

static PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"GPRS(\d{15}),",                         // imei
        r"(.*?),",                                // version
        r"(\d{2})(\d{2})(\d{2}),",                // yy mm dd
        r"(\d{2})(\d{2})(\d{2}),",                // hh mm ss
        r"(\d)",                                  // flags
        r"(\d{2})(\d{5})",                        // latitude
        r"(\d{3})(\d{5}),",                       // longitude
        r"(\d+),",                                // speed
        r"(\d+),",                                // heading
        r"(\d+),",                                // status
        r"(.*?),(.*?),(.*?),(.*?)",               // gprs count, power saving, switch, voltage
        r"#V(\d+)",                               // battery
    ))
    .expect("haicom pattern is valid")
});

pub fn parse(input: &MessageInput) -> Result<Decoded> {
    let caps = expect_arity(Protocol::Haicom, PATTERN.captures(input.text()), ARITY)?;
    let num = |i: usize, field: &'static str| parse_field::<u32>(field, &caps[i]);

    let date_time = date_time(
        num(3, "year")?,
        num(4, "month")?,
        num(5, "day")?,
        num(6, "hour")?,
        num(7, "minute")?,
        num(8, "second")?,
    )?;

    let flags = num(9, "flags")?;
    let latitude = coordinate(
        "latitude minutes",
        num(10, "latitude degrees")?,
        num(11, "latitude minutes")?,
        !bit_is_set(flags, FLAG_NORTH),
    )?;
    let longitude = coordinate(
        "longitude minutes",
        num(12, "longitude degrees")?,
        num(13, "longitude minutes")?,
        !bit_is_set(flags, FLAG_EAST),
    )?;

    let speed = num(14, "speed")? as f64 / 10.0;
    let heading = num(15, "heading")? as f64 / 10.0;

    let location = Location::builder(date_time, latitude, longitude)
        .device(DeviceRef::imei(&caps[1])?)
        .speed_kph(speed)
        .heading(heading)
        .valid(bit_is_set(flags, FLAG_VALID))
        .build()?;

    Ok(Decoded::location(location))
}

fn coordinate(
    field: &'static str,
    degrees: u32,
    milli_minutes: u32,
    negative: bool,
) -> Result<f64> {
    if milli_minutes >= 60_000 {
        return Err(GpsError::invalid(field, format!("{milli_minutes:05}")));
    }
    Ok(dm_thousandths_to_decimal(degrees, milli_minutes, negative))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
