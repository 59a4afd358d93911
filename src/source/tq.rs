//! TQ position frame decoder.
//!
//! A position frame is a byte sequence whose hex rendering carries plain
//! ASCII decimal digits at fixed offsets (offsets below are in hex
//! characters):
//!
//! | offset | len | field |
//! |--------|-----|-------|
//! | 0      | 2   | header `24` |
//! | 2      | 10  | device id, 10 decimal digits |
//! | 12     | 6   | GPS time `HHMMSS`, UTC |
//! | 18     | 6   | GPS date `DDMMYY` |
//! | 24     | 10  | latitude `DD` `MM` + 6 fractional-minute digits |
//! | 34     | 10  | longitude `DDD` `MM` + 5 fractional-minute digits |
//! | 44     | 3   | speed, knots |
//! | 47     | 3   | heading, degrees |
//! | 50     | 8   | auxiliary status word |

use chrono::{
    NaiveDate,
    NaiveDateTime,
};

use crate::{
    types::{
        DeviceId,
        Fix,
        KNOTS_TO_KMH,
        MAX_SPEED_KMH,
        TqStatus,
    },
    util::{
        decimal_field,
        hex_field,
    },
};

/// Minimum hex length for a decodable frame (through the heading field).
const MIN_FRAME_HEX_LEN: usize = 50;

const STATUS_OFFSET: usize = 50;
const STATUS_LEN: usize = 8;

#[derive(Debug, thiserror::Error)]
#[error("tq decode error")]
pub enum DecodeError {
    #[error("frame too short: {len} hex characters")]
    Truncated { len: usize },
    #[error("invalid {field}: {value}")]
    InvalidField {
        field: &'static str,
        value: String,
    },
    #[error("invalid gps timestamp: {date} {time}")]
    InvalidTimestamp { date: String, time: String },
}

pub fn decode(data: &[u8]) -> Result<Fix, DecodeError> {
    decode_hex(&hex::encode(data))
}

pub fn decode_hex(hex: &str) -> Result<Fix, DecodeError> {
    if hex.len() < MIN_FRAME_HEX_LEN {
        return Err(DecodeError::Truncated { len: hex.len() });
    }

    // Registration-less sub-flavours repeat the id in every frame; binary
    // flavours don't, so a non-decimal id field is not an error. The worker
    // falls back to the session's id.
    let device_id = hex_field(hex, 2, 10).and_then(|field| field.parse::<DeviceId>().ok());

    let time = digits(hex, 12, 6, "gps time")?;
    let date = digits(hex, 18, 6, "gps date")?;
    let timestamp = parse_timestamp(date, time).ok_or_else(|| {
        DecodeError::InvalidTimestamp {
            date: date.to_owned(),
            time: time.to_owned(),
        }
    })?;

    // The fleet served by this gateway reports southern/western fixes and the
    // status word carries no usable hemisphere bit, so both coordinates are
    // negated.
    let mut latitude = -packed_degrees(
        decimal(hex, 24, 2, "latitude degrees")?,
        decimal(hex, 26, 2, "latitude minutes")?,
        decimal(hex, 28, 6, "latitude minute fraction")? as f64 / 1e6,
    );
    let mut longitude = -packed_degrees(
        decimal(hex, 34, 3, "longitude degrees")?,
        decimal(hex, 37, 2, "longitude minutes")?,
        decimal(hex, 39, 5, "longitude minute fraction")? as f64 / 1e5,
    );

    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        // zero both so the fix fails the degenerate-coordinate guard
        tracing::warn!(latitude, longitude, "coordinates out of range, zeroing");
        latitude = 0.0;
        longitude = 0.0;
    }

    let mut speed_knots = decimal(hex, 44, 3, "speed")? as f64;
    if speed_knots * KNOTS_TO_KMH > MAX_SPEED_KMH {
        tracing::warn!(speed_knots, "reported speed exceeds {MAX_SPEED_KMH} km/h, clamping");
        speed_knots = MAX_SPEED_KMH / KNOTS_TO_KMH;
    }

    let mut heading = decimal(hex, 47, 3, "heading")? as f64;
    if heading > 360.0 {
        tracing::warn!(heading, "heading out of range, zeroing");
        heading = 0.0;
    }

    let status = hex_field(hex, STATUS_OFFSET, STATUS_LEN)
        .and_then(|field| u32::from_str_radix(field, 16).ok())
        .map(TqStatus::from_bits_retain)
        .unwrap_or_default();

    Ok(Fix {
        device_id,
        latitude,
        longitude,
        speed_knots,
        heading,
        timestamp,
        ignition: status.contains(TqStatus::IGNITION),
        status,
        raw_hex: hex.to_owned(),
    })
}

fn digits<'a>(
    hex: &'a str,
    start: usize,
    len: usize,
    field: &'static str,
) -> Result<&'a str, DecodeError> {
    let value = hex_field(hex, start, len).ok_or(DecodeError::Truncated { len: hex.len() })?;
    if value.bytes().all(|byte| byte.is_ascii_digit()) {
        Ok(value)
    }
    else {
        Err(DecodeError::InvalidField {
            field,
            value: value.to_owned(),
        })
    }
}

fn decimal(hex: &str, start: usize, len: usize, field: &'static str) -> Result<u32, DecodeError> {
    let value = digits(hex, start, len, field)?;
    decimal_field(value).ok_or_else(|| {
        DecodeError::InvalidField {
            field,
            value: value.to_owned(),
        }
    })
}

/// `DDD` degrees plus `MM.mmmm` minutes to decimal degrees.
fn packed_degrees(degrees: u32, minutes: u32, minute_fraction: f64) -> f64 {
    degrees as f64 + (minutes as f64 + minute_fraction) / 60.0
}

fn parse_timestamp(date: &str, time: &str) -> Option<NaiveDateTime> {
    let day = decimal_field(&date[0..2])?;
    let month = decimal_field(&date[2..4])?;
    let year = decimal_field(&date[4..6])?;
    let hour = decimal_field(&time[0..2])?;
    let minute = decimal_field(&time[2..4])?;
    let second = decimal_field(&time[4..6])?;

    NaiveDate::from_ymd_opt(2000 + year as i32, month, day)?.and_hms_opt(hour, minute, second)
}
