//! Bit-packed join framing used by older processor firmware
//!
//! Every frame starts with a header byte whose top bits select the shape,
//! followed by a byte with the high bit clear. Join numbers are 1-based on the
//! API and 0-based on the wire: `((byte0 & mask) << 7 | byte1) + 1`.
//!
//! | shape   | byte0 pattern | length              | value                                  |
//! |---------|---------------|---------------------|----------------------------------------|
//! | digital | `10vjjjjj`    | 2                   | inverted bit 5 of byte0                |
//! | analog  | `11vv0jjj`    | 4                   | `(byte0 & 0x30) << 10 \| b2 << 7 \| b3` |
//! | serial  | `11001jjj`    | until `0xFF`        | bytes between the header and `0xFF`    |

use crate::error::{HubError, Result};
use crate::protocol::{Frame, Join};
use bytes::{Buf, BufMut, BytesMut};

const DIGITAL_MASK: u8 = 0b1100_0000;
const DIGITAL_TAG: u8 = 0b1000_0000;
const DIGITAL_JOIN_BITS: u8 = 0b0001_1111;
const DIGITAL_OFF_BIT: u8 = 0b0010_0000;

const ANALOG_MASK: u8 = 0b1100_1000;
const ANALOG_TAG: u8 = 0b1100_0000;
const ANALOG_VALUE_BITS: u8 = 0b0011_0000;

const SERIAL_MASK: u8 = 0b1111_1000;
const SERIAL_TAG: u8 = 0b1100_1000;
const SERIAL_END: u8 = 0xFF;

const WIDE_JOIN_BITS: u8 = 0b0000_0111;
const LOW_SEVEN: u8 = 0b0111_1111;
const HIGH_BIT: u8 = 0b1000_0000;

/// Highest digital join the header can address
pub const MAX_DIGITAL_JOIN: u16 = ((DIGITAL_JOIN_BITS as u16) << 7 | LOW_SEVEN as u16) + 1;

/// Highest analog or serial join the header can address
pub const MAX_WIDE_JOIN: u16 = ((WIDE_JOIN_BITS as u16) << 7 | LOW_SEVEN as u16) + 1;

/// Longest serial payload buffered while waiting for the terminator
const MAX_SERIAL_LEN: usize = 4 * 1024;

fn join_number(byte0: u8, join_bits: u8, byte1: u8) -> u16 {
    (u16::from(byte0 & join_bits) << 7 | u16::from(byte1)) + 1
}

fn check_join(join: u16, max: u16) -> Result<u16> {
    if join == 0 || join > max {
        return Err(HubError::OutOfRange {
            name: "join",
            value: join,
            max,
        });
    }
    Ok(join - 1)
}

/// Drop bytes until the next plausible header, reporting what was skipped
fn resync(src: &mut BytesMut) -> Frame {
    let skip = src[1..]
        .iter()
        .position(|b| b & HIGH_BIT != 0 && *b != SERIAL_END)
        .map_or(src.len(), |p| p + 1);
    let skipped = src.split_to(skip);
    Frame::Malformed(format!("skipped {} unframed bytes: {:02x?}", skip, &skipped[..]))
}

/// Decode one join frame from the front of `src`
pub(crate) fn decode_join(src: &mut BytesMut) -> Option<Frame> {
    if src.is_empty() {
        return None;
    }
    if src[0] & HIGH_BIT == 0 || src[0] == SERIAL_END {
        return Some(resync(src));
    }
    if src.len() < 2 {
        return None;
    }

    let byte0 = src[0];
    let byte1 = src[1];
    if byte1 & HIGH_BIT != 0 {
        return Some(resync(src));
    }

    if byte0 & DIGITAL_MASK == DIGITAL_TAG {
        src.advance(2);
        return Some(Frame::Join(Join::Digital {
            join: join_number(byte0, DIGITAL_JOIN_BITS, byte1),
            value: byte0 & DIGITAL_OFF_BIT == 0,
        }));
    }

    if byte0 & ANALOG_MASK == ANALOG_TAG {
        if src.len() < 4 {
            return None;
        }
        let value = u16::from(byte0 & ANALOG_VALUE_BITS) << 10
            | u16::from(src[2] & LOW_SEVEN) << 7
            | u16::from(src[3] & LOW_SEVEN);
        src.advance(4);
        return Some(Frame::Join(Join::Analog {
            join: join_number(byte0, WIDE_JOIN_BITS, byte1),
            value,
        }));
    }

    if byte0 & SERIAL_MASK == SERIAL_TAG {
        let Some(end) = src[2..].iter().position(|b| *b == SERIAL_END) else {
            if src.len() > MAX_SERIAL_LEN {
                return Some(resync(src));
            }
            return None;
        };
        let frame = src.split_to(2 + end + 1);
        let value = String::from_utf8_lossy(&frame[2..2 + end]).into_owned();
        return Some(Frame::Join(Join::Serial {
            join: join_number(byte0, WIDE_JOIN_BITS, byte1),
            value,
        }));
    }

    Some(resync(src))
}

/// Encode one join frame onto `dst`
pub(crate) fn encode_join(join: &Join, dst: &mut BytesMut) -> Result<()> {
    match join {
        Join::Digital { join, value } => {
            let wire = check_join(*join, MAX_DIGITAL_JOIN)?;
            let off = if *value { 0 } else { DIGITAL_OFF_BIT };
            dst.put_u8(DIGITAL_TAG | off | (wire >> 7) as u8 & DIGITAL_JOIN_BITS);
            dst.put_u8(wire as u8 & LOW_SEVEN);
        }
        Join::Analog { join, value } => {
            let wire = check_join(*join, MAX_WIDE_JOIN)?;
            dst.put_u8(
                ANALOG_TAG
                    | (value >> 10) as u8 & ANALOG_VALUE_BITS
                    | (wire >> 7) as u8 & WIDE_JOIN_BITS,
            );
            dst.put_u8(wire as u8 & LOW_SEVEN);
            dst.put_u8((value >> 7) as u8 & LOW_SEVEN);
            dst.put_u8(*value as u8 & LOW_SEVEN);
        }
        Join::Serial { join, value } => {
            let wire = check_join(*join, MAX_WIDE_JOIN)?;
            dst.reserve(value.len() + 3);
            dst.put_u8(SERIAL_TAG | (wire >> 7) as u8 & WIDE_JOIN_BITS);
            dst.put_u8(wire as u8 & LOW_SEVEN);
            dst.put_slice(value.as_bytes());
            dst.put_u8(SERIAL_END);
        }
    }
    Ok(())
}
