//! Decoder for the ASCII `*…#` variant some trackers fall back to.
//!
//! The record is comma-separated with `DDMM.MMMM` coordinates and hemisphere
//! letters. These frames are audited only; the gateway never uplinks them.

use crate::types::DeviceId;

#[derive(Debug, thiserror::Error)]
#[error("nmea decode error")]
pub enum DecodeError {
    #[error("record not delimited by * and #")]
    NotDelimited,
    #[error("too few fields: {count}")]
    TooFewFields { count: usize },
    #[error("invalid coordinate: {value}{hemisphere}")]
    InvalidCoordinate { value: String, hemisphere: String },
}

/// A decoded `*…#` record. Kept separate from [`Fix`][crate::types::Fix]:
/// these records carry no GPS timestamp and never enter the filter pipeline.
#[derive(Clone, Debug)]
pub struct NmeaReport {
    /// The identifier as transmitted (usually the 10-digit long form).
    pub device_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub speed_kmh: f64,
    pub heading: f64,
}

impl NmeaReport {
    /// The trailing 5 digits of the transmitted identifier.
    pub fn short_id(&self) -> &str {
        let split = self.device_id.len().saturating_sub(5);
        self.device_id.get(split..).unwrap_or(&self.device_id)
    }

    /// The long identifier, when the record carried one.
    pub fn long_id(&self) -> Option<DeviceId> {
        self.device_id.parse().ok()
    }
}

pub fn decode(text: &str) -> Result<NmeaReport, DecodeError> {
    let text = text.trim();
    let body = text
        .strip_prefix('*')
        .and_then(|rest| rest.strip_suffix('#'))
        .ok_or(DecodeError::NotDelimited)?;

    let fields = body.split(',').collect::<Vec<_>>();
    if fields.len() < 9 {
        return Err(DecodeError::TooFewFields {
            count: fields.len(),
        });
    }

    let device_id = fields[1].to_owned();
    let latitude = coordinate(fields[5], fields[6])?;
    let longitude = coordinate(fields[7], fields[8])?;

    // speed and heading are optional trailing fields
    let speed_kmh = fields
        .get(9)
        .and_then(|value| value.parse().ok())
        .unwrap_or(0.0);
    let heading = fields
        .get(10)
        .and_then(|value| value.parse().ok())
        .unwrap_or(0.0);

    Ok(NmeaReport {
        device_id,
        latitude,
        longitude,
        speed_kmh,
        heading,
    })
}

/// `DDMM.MMMM` plus hemisphere letter to signed decimal degrees.
fn coordinate(value: &str, hemisphere: &str) -> Result<f64, DecodeError> {
    let err = || {
        DecodeError::InvalidCoordinate {
            value: value.to_owned(),
            hemisphere: hemisphere.to_owned(),
        }
    };

    let packed = value.parse::<f64>().map_err(|_| err())?;
    let degrees = (packed / 100.0).floor();
    let minutes = packed - degrees * 100.0;
    let decimal = degrees + minutes / 60.0;

    match hemisphere {
        "N" | "E" => Ok(decimal),
        "S" | "W" => Ok(-decimal),
        _ => Err(err()),
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::{
        DecodeError,
        decode,
    };

    const EXAMPLE: &str = "*HQ,2076668133,V1,174421,A,3438.4010,S,05833.6031,W,0,0,030925#";

    #[test]
    fn it_decodes_the_example_record() {
        let report = decode(EXAMPLE).unwrap();

        assert_eq!(report.device_id, "2076668133");
        assert_eq!(report.short_id(), "68133");
        assert_eq!(report.long_id().unwrap().to_string(), "2076668133");

        // 34° 38.4010' S / 58° 33.6031' W
        assert_relative_eq!(report.latitude, -34.640_016_7, epsilon = 1e-6);
        assert_relative_eq!(report.longitude, -58.560_051_7, epsilon = 1e-6);
        assert_eq!(report.speed_kmh, 0.0);
        assert_eq!(report.heading, 0.0);
    }

    #[test]
    fn missing_optional_fields_default_to_zero() {
        let report = decode("*HQ,2076668133,V1,174421,A,3438.4010,S,05833.6031,W#").unwrap();
        assert_eq!(report.speed_kmh, 0.0);
        assert_eq!(report.heading, 0.0);
    }

    #[test]
    fn it_rejects_undelimited_records() {
        assert!(matches!(
            decode("HQ,2076668133,V1"),
            Err(DecodeError::NotDelimited)
        ));
    }

    #[test]
    fn it_rejects_truncated_records() {
        assert!(matches!(
            decode("*HQ,2076668133,V1,174421#"),
            Err(DecodeError::TooFewFields { count: 4 })
        ));
    }

    #[test]
    fn it_rejects_bad_hemispheres() {
        assert!(matches!(
            decode("*HQ,2076668133,V1,174421,A,3438.4010,X,05833.6031,W#"),
            Err(DecodeError::InvalidCoordinate { .. })
        ));
    }
}
