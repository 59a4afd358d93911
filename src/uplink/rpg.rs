//! RPG uplink frame encoder.
//!
//! An accepted fix is rendered as
//! `>RGP<DDMMYYHHMMSS><lat><lon><speed><heading><status>000001;&01;ID=<id>;#0001*<CK><`
//! where the coordinates are unsigned `DDMM.MMMM` / `DDDMM.MMMM` blocks with a
//! leading `-` for the southern/western hemispheres, speed is whole km/h and
//! the trailer is the XOR checksum over `>`…`*` inclusive.

use std::fmt::Display;

use crate::{
    types::{
        Fix,
        ShortDeviceId,
    },
    util::checksum::rpg_checksum,
};

/// Protocol-level constants of this uplink: event `01`, message number `0001`,
/// and the fixed age/quality block `000001` after the status digit.
const EVENT: &str = "01";
const MESSAGE_NUMBER: &str = "0001";
const AGE_AND_QUALITY: &str = "000001";

/// A sealed RPG frame, ready to leave as one datagram.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UplinkFrame {
    frame: String,
}

impl UplinkFrame {
    pub fn as_str(&self) -> &str {
        &self.frame
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.frame.as_bytes()
    }
}

impl Display for UplinkFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.frame)
    }
}

/// Encodes an accepted fix. The caller must only pass fixes the trajectory
/// filter accepted; rejected fixes never reach the uplink.
pub fn encode(fix: &Fix, device_id: ShortDeviceId) -> UplinkFrame {
    let timestamp = fix.timestamp.format("%d%m%y%H%M%S");

    let latitude = packed_coordinate(fix.latitude, 2);
    let longitude = packed_coordinate(fix.longitude, 3);

    let speed = fix.speed_kmh().trunc() as u32;
    let heading = fix.heading.trunc() as u32;
    let status = if fix.has_position() { '1' } else { '0' };

    let mut frame = format!(
        ">RGP{timestamp}{latitude}{longitude}{speed:03}{heading:03}{status}{AGE_AND_QUALITY};\
         &{EVENT};ID={device_id};#{MESSAGE_NUMBER}*"
    );
    let checksum = rpg_checksum(&frame).expect("frame has both delimiters");
    frame.push_str(&checksum);
    frame.push('<');

    UplinkFrame { frame }
}

/// Decimal degrees to the unsigned `D…DMM.MMMM` block, `-`-prefixed for the
/// southern/western hemispheres.
fn packed_coordinate(decimal_degrees: f64, degree_width: usize) -> String {
    let magnitude = decimal_degrees.abs();
    let degrees = magnitude.trunc() as u32;
    let minutes = (magnitude - degrees as f64) * 60.0;
    let sign = if decimal_degrees < 0.0 { "-" } else { "" };
    format!("{sign}{degrees:0degree_width$}{minutes:07.4}")
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{
        encode,
        packed_coordinate,
    };
    use crate::{
        types::{
            DeviceId,
            Fix,
            TqStatus,
        },
        util::checksum::rpg_checksum,
    };

    fn fix(latitude: f64, longitude: f64, speed_knots: f64, heading: f64) -> Fix {
        Fix {
            device_id: None,
            latitude,
            longitude,
            speed_knots,
            heading,
            timestamp: NaiveDate::from_ymd_opt(2025, 8, 21)
                .unwrap()
                .and_hms_opt(14, 50, 11)
                .unwrap(),
            ignition: false,
            status: TqStatus::default(),
            raw_hex: String::new(),
        }
    }

    #[test]
    fn it_packs_coordinates() {
        assert_eq!(packed_coordinate(-34.283_22, 2), "-3416.9932");
        assert_eq!(packed_coordinate(-58.917_663_3, 3), "-05855.0598");
        assert_eq!(packed_coordinate(34.5, 2), "3430.0000");
        assert_eq!(packed_coordinate(2.1, 3), "00206.0000");
    }

    #[test]
    fn it_encodes_a_stationary_fix() {
        // 34° 16.9932' S / 58° 55.0598' W, stopped, heading 30
        let device_id = "0000138312".parse::<DeviceId>().unwrap();
        let frame = encode(&fix(-34.283_22, -58.917_663_3, 0.0, 30.0), device_id.short());

        assert_eq!(
            frame.as_str(),
            ">RGP210825145011-3416.9932-05855.05980000301000001;&01;ID=38312;#0001*63<"
        );
    }

    #[test]
    fn it_encodes_the_captured_fix() {
        // the S/W fix decoded from the captured TQ frame; 2 kn truncates to 3 km/h
        let device_id = "2076668133".parse::<DeviceId>().unwrap();
        let mut fix = fix(-34.652_258_4, -58.533_800_3, 2.0, 297.0);
        fix.timestamp = NaiveDate::from_ymd_opt(2025, 9, 3)
            .unwrap()
            .and_hms_opt(17, 44, 21)
            .unwrap();

        let frame = encode(&fix, device_id.short());
        assert_eq!(
            frame.as_str(),
            ">RGP030925174421-3439.1355-05832.02800032971000001;&01;ID=68133;#0001*6E<"
        );
    }

    #[test]
    fn every_emitted_frame_satisfies_its_own_checksum() {
        let device_id = "2076668133".parse::<DeviceId>().unwrap();
        for (latitude, longitude, speed, heading) in [
            (-34.6522, -58.5338, 0.0, 0.0),
            (-34.0001, -58.9999, 67.5, 359.0),
            (12.25, 3.5, 10.0, 90.0),
        ] {
            let frame = encode(&fix(latitude, longitude, speed, heading), device_id.short());
            let body = frame.as_str();
            let trailer = &body[body.len() - 3..body.len() - 1];
            assert_eq!(rpg_checksum(body).as_deref(), Some(trailer));
        }
    }

    #[test]
    fn a_degenerate_fix_is_marked_inactive() {
        let device_id = "2076668133".parse::<DeviceId>().unwrap();
        let frame = encode(&fix(0.0, 0.0, 0.0, 0.0), device_id.short());
        // status digit right before the fixed 000001 block
        assert!(frame.as_str().contains("0000000000001;&"));
    }
}
