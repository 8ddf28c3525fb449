//! Amwell fixed-offset binary protocol.
//!
//! Frame layout (offsets in bytes):
//!
//! ```text
//!  0  29 29        header
//!  2  cmd          0xB1 = login
//!  3  len (u16 BE) bytes after the length field
//!  5  terminal id  4 bytes
//!  9  YY MM DD hh mm ss   BCD
//! 15  latitude     4 bytes BCD DDDMMmmm, bit 0x80 of the first byte = south
//! 19  longitude    4 bytes BCD DDDMMmmm, bit 0x80 of the first byte = west
//! 23  speed        2 bytes BCD, km/h
//! 25  heading      2 bytes BCD, degrees
//! ..  (status bytes, ignored)
//! -2  checksum     XOR of every preceding byte
//! -1  0D
//! ```
//!
//! A login frame is answered with
//! `29 29 21 00 05 <checksum> <cmd> 06 <xor> 0D`. The location is decoded
//! from every frame, login frames included.

use crate::codec::{bcd_value, date_time, dm_thousandths_to_decimal, hex_encode, xor_checksum};
use crate::cursor::ByteCursor;
use crate::framing::Framing;
use crate::message::{Decoded, MessageInput};
use crate::types::{DeviceRef, GpsError, Location, Result};

pub const HEADER: &[u8] = &[0x29, 0x29];

pub const FRAMING: Framing = Framing::LengthPrefixed {
    header: HEADER,
    length_offset: 3,
    overhead: 5,
};

/// Command byte of a login frame.
pub const LOGIN: u8 = 0xB1;

const REPLY_COMMAND: u8 = 0x21;
const REPLY_LENGTH: u16 = 5;
const REPLY_DATA: u8 = 0x06;
const END: u8 = 0x0D;

/// Header, command and length.
const HEAD_LEN: usize = 5;
/// Head plus trailing checksum and end byte.
const MIN_LEN: usize = HEAD_LEN + 2;

pub fn parse(input: &MessageInput) -> Result<Decoded> {
    let bytes = input.bytes();
    if bytes.len() < MIN_LEN {
        return Err(GpsError::FrameTruncated {
            offset: 0,
            wanted: MIN_LEN,
            len: bytes.len(),
        });
    }

    let checksum_at = bytes.len() - 2;
    let declared = bytes[checksum_at];
    let computed = xor_checksum(&bytes[..checksum_at]);
    if declared != computed {
        return Err(GpsError::ChecksumMismatch { declared, computed });
    }

    let command = bytes[2];
    let reply = (command == LOGIN).then(|| login_reply(command, declared));

    let location = match decode_location(&bytes[..checksum_at]) {
        Ok(location) => Some(location),
        // The handshake still has to go out even if the payload is junk
        Err(_) if reply.is_some() => None,
        Err(e) => return Err(e),
    };

    Ok(Decoded { location, reply })
}

/// Build the login acknowledgement for a received command and checksum.
pub fn login_reply(command: u8, checksum: u8) -> Vec<u8> {
    let mut reply = Vec::with_capacity(10);
    reply.extend_from_slice(HEADER);
    reply.push(REPLY_COMMAND);
    reply.extend_from_slice(&REPLY_LENGTH.to_be_bytes());
    reply.push(checksum);
    reply.push(command);
    reply.push(REPLY_DATA);
    reply.push(xor_checksum(&reply));
    reply.push(END);
    reply
}

fn decode_location(body: &[u8]) -> Result<Location> {
    let mut cur = ByteCursor::new(body);

    // 9-byte preamble: header, command, length, terminal id
    cur.skip(HEAD_LEN)?;
    let terminal = cur.read(4)?;

    let [yy, mo, dd, hh, mi, ss] = cur.read_array::<6>()?;
    let date_time = date_time(
        bcd_value(&[yy])?,
        bcd_value(&[mo])?,
        bcd_value(&[dd])?,
        bcd_value(&[hh])?,
        bcd_value(&[mi])?,
        bcd_value(&[ss])?,
    )?;

    let latitude = coordinate(cur.read_array()?)?;
    let longitude = coordinate(cur.read_array()?)?;
    let speed = bcd_value(cur.read(2)?)?;
    let heading = bcd_value(cur.read(2)?)?;

    Location::builder(date_time, latitude, longitude)
        .device(DeviceRef::device_id(hex_encode(terminal)))
        .speed_kph(speed as f64)
        .heading(heading as f64)
        .build()
}

/// `DDDMMmmm` BCD with the sign in the top bit of the first byte.
fn coordinate(raw: [u8; 4]) -> Result<f64> {
    let negative = raw[0] & 0x80 != 0;
    let mut digits = raw;
    digits[0] &= 0x7F;
    let value = bcd_value(&digits)?;

    let degrees = value / 100_000;
    let milli_minutes = value % 100_000;
    if milli_minutes >= 60_000 {
        return Err(GpsError::invalid("amwell coordinate", hex_encode(&raw)));
    }
    Ok(dm_thousandths_to_decimal(degrees, milli_minutes, negative))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::hex_decode;
    use proptest::prelude::*;

    const LOGIN_FRAME: &str = "2929B1001812345678240102030405022321239140345600600270060D";
    const POSITION_FRAME: &str = "292980001812345678240102030405822321231140345600600270370D";

    fn input(hex: &str) -> MessageInput {
        MessageInput::new(hex_decode(hex).unwrap())
    }

    #[test]
    fn test_login_reply_bytes() {
        let decoded = parse(&input(LOGIN_FRAME)).unwrap();
        let reply = decoded.reply.expect("login frame must be answered");
        assert_eq!(hex_encode(&reply), "292921000506B106950D");
    }

    #[test]
    fn test_login_frame_also_decodes_location() {
        let loc = parse(&input(LOGIN_FRAME)).unwrap().location.unwrap();
        assert_eq!(loc.date_time.to_rfc3339(), "2024-01-02T03:04:05+00:00");
        assert!((loc.latitude - 22.535_383_333).abs() < 1e-6);
        assert!((loc.longitude + 114.0576).abs() < 1e-6);
        assert_eq!(loc.speed_kph, 60.0);
        assert_eq!(loc.heading, Some(270.0));
        assert_eq!(loc.device, Some(DeviceRef::DeviceId("12345678".into())));
    }

    #[test]
    fn test_position_frame_has_no_reply() {
        let decoded = parse(&input(POSITION_FRAME)).unwrap();
        assert!(decoded.reply.is_none());
        let loc = decoded.location.unwrap();
        // Sign bit set on latitude only
        assert!((loc.latitude + 22.535_383_333).abs() < 1e-6);
        assert!((loc.longitude - 114.0576).abs() < 1e-6);
    }

    #[test]
    fn test_corrupted_checksum_rejected() {
        let mut bytes = hex_decode(LOGIN_FRAME).unwrap();
        let at = bytes.len() - 2;
        bytes[at] ^= 0xFF;
        let err = parse(&MessageInput::new(bytes)).unwrap_err();
        assert!(matches!(err, GpsError::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_corrupted_payload_rejected() {
        let mut bytes = hex_decode(POSITION_FRAME).unwrap();
        bytes[16] ^= 0x01;
        assert!(matches!(
            parse(&MessageInput::new(bytes)),
            Err(GpsError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_truncated_frame() {
        // Header + command + length only, checksum and end byte missing
        assert!(matches!(
            parse(&input("2929800018")),
            Err(GpsError::FrameTruncated { .. })
        ));

        // Well-formed envelope around a payload that stops after the date
        let mut bytes = hex_decode("292980000C12345678240102030405").unwrap();
        bytes.push(xor_checksum(&bytes));
        bytes.push(0x0D);
        assert!(matches!(
            parse(&MessageInput::new(bytes)),
            Err(GpsError::FrameTruncated { .. })
        ));
    }

    #[test]
    fn test_truncated_login_still_replies() {
        let mut bytes = hex_decode("2929B1000612345678").unwrap();
        bytes.push(xor_checksum(&bytes));
        bytes.push(0x0D);
        let decoded = parse(&MessageInput::new(bytes)).unwrap();
        assert!(decoded.location.is_none());
        assert!(decoded.reply.is_some());
    }

    #[test]
    fn test_non_bcd_coordinate_rejected() {
        assert!(coordinate([0x0A, 0x00, 0x00, 0x00]).is_err());
        // 75 minutes is not a valid minute value
        assert!(coordinate([0x02, 0x27, 0x50, 0x00]).is_err());
    }

    #[test]
    fn test_login_reply_checksum_deterministic() {
        assert_eq!(login_reply(LOGIN, 0x06), login_reply(LOGIN, 0x06));
        let reply = login_reply(LOGIN, 0x4C);
        assert_eq!(reply[reply.len() - 2], xor_checksum(&reply[..reply.len() - 2]));
        assert_eq!(*reply.last().unwrap(), 0x0D);
    }

    /// `DDDMMmmm` as packed BCD, top bit of the first byte as the sign.
    fn encode_coordinate(degrees: u32, milli_minutes: u32, negative: bool) -> [u8; 4] {
        let digits = hex_decode(&format!("{:08}", degrees * 100_000 + milli_minutes)).unwrap();
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&digits);
        if negative {
            raw[0] |= 0x80;
        }
        raw
    }

    proptest! {
        #[test]
        fn prop_coordinate_sign_bit(
            degrees in 0u32..180,
            milli_minutes in 0u32..60_000,
            negative in any::<bool>(),
        ) {
            let value = coordinate(encode_coordinate(degrees, milli_minutes, negative)).unwrap();
            prop_assert_eq!(value, dm_thousandths_to_decimal(degrees, milli_minutes, negative));
            let magnitude = degrees as f64 + milli_minutes as f64 / 60_000.0;
            prop_assert!((value.abs() - magnitude).abs() < 1e-9);
            prop_assert_eq!(value < 0.0, negative && magnitude > 0.0);
        }

        #[test]
        fn prop_coordinate_minutes_out_of_range(
            degrees in 0u32..180,
            milli_minutes in 60_000u32..100_000,
            negative in any::<bool>(),
        ) {
            prop_assert!(coordinate(encode_coordinate(degrees, milli_minutes, negative)).is_err());
        }
    }
}
