//! Per-device trajectory filtering.
//!
//! The tracker keeps the last accepted fix of every device and rejects
//! implausible candidates with distance/time/speed heuristics, while keeping
//! legitimate low-speed dwellings. Filter state is keyed by the long device
//! id so that interleaved sessions from different devices cannot
//! cross-contaminate each other; for frames of the same device, the later
//! arrival wins.

use std::{
    collections::HashMap,
    fmt::Display,
};

use crate::types::{
    DeviceId,
    Fix,
};

/// Mean Earth radius in metres.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A jump larger than this within [`SUDDEN_JUMP_MAX_SECS`] is discarded.
const SUDDEN_JUMP_MIN_M: f64 = 300.0;
const SUDDEN_JUMP_MAX_SECS: f64 = 10.0;

/// A jump larger than this within [`EXCESSIVE_JUMP_MAX_SECS`] is discarded.
const EXCESSIVE_JUMP_MIN_M: f64 = 1000.0;
const EXCESSIVE_JUMP_MAX_SECS: f64 = 300.0;

/// Tolerated gap between computed and reported speed, above
/// [`INCOHERENT_SPEED_MIN_M`] of movement.
const INCOHERENT_SPEED_MAX_KMH: f64 = 20.0;
const INCOHERENT_SPEED_MIN_M: f64 = 100.0;

/// A "stationary" report (< 1 km/h) that moved more than this is discarded,
/// unless the pair qualifies as a real stop.
const STATIONARY_JUMP_MIN_M: f64 = 300.0;

/// Real stop: both fixes slow and close together.
const REAL_STOP_MAX_KMH: f64 = 5.0;
const REAL_STOP_MAX_M: f64 = 100.0;

#[derive(Clone, Debug, PartialEq)]
pub enum Verdict {
    Accepted,
    Rejected(RejectReason),
}

#[derive(Clone, Debug, PartialEq)]
pub enum RejectReason {
    /// Both coordinates are (near) zero — unfixed receiver.
    NoPosition,
    SuddenJump { distance_m: f64, dt_secs: f64 },
    ExcessiveJump { distance_m: f64, dt_secs: f64 },
    IncoherentSpeed { computed_kmh: f64, reported_kmh: f64 },
    StationaryJump { distance_m: f64 },
}

impl Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoPosition => write!(f, "invalid gps coordinates (0,0)"),
            Self::SuddenJump { distance_m, dt_secs } => {
                write!(f, "sudden jump: {distance_m:.1}m in {dt_secs:.1}s")
            }
            Self::ExcessiveJump { distance_m, dt_secs } => {
                write!(
                    f,
                    "excessive jump: {distance_m:.1}m in {:.1}min",
                    dt_secs / 60.0
                )
            }
            Self::IncoherentSpeed {
                computed_kmh,
                reported_kmh,
            } => {
                write!(
                    f,
                    "incoherent speed: computed={computed_kmh:.1} vs reported={reported_kmh:.1} km/h"
                )
            }
            Self::StationaryJump { distance_m } => {
                write!(f, "stationary jump: {distance_m:.1}m while reporting stopped")
            }
        }
    }
}

/// Last accepted fix per device.
#[derive(Debug, Default)]
pub struct Tracker {
    last_accepted: HashMap<DeviceId, Fix>,
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_accepted(&self, device_id: DeviceId) -> Option<&Fix> {
        self.last_accepted.get(&device_id)
    }

    /// Judges `fix` against the device's last accepted fix. On acceptance the
    /// stored fix is replaced, so the next candidate is always judged against
    /// this one.
    pub fn evaluate(&mut self, device_id: DeviceId, fix: &Fix) -> Verdict {
        match self.judge(device_id, fix) {
            Some(reason) => Verdict::Rejected(reason),
            None => {
                self.last_accepted.insert(device_id, fix.clone());
                Verdict::Accepted
            }
        }
    }

    fn judge(&self, device_id: DeviceId, fix: &Fix) -> Option<RejectReason> {
        if !fix.has_position() {
            return Some(RejectReason::NoPosition);
        }

        // no trajectory memory yet: accept the first fix as the anchor
        let last = self.last_accepted.get(&device_id)?;

        let distance_m = haversine_m(last.latitude, last.longitude, fix.latitude, fix.longitude);
        let dt_secs = (fix.timestamp - last.timestamp).num_milliseconds().abs() as f64 / 1000.0;

        let reported_kmh = fix.speed_kmh();
        let computed_kmh = if dt_secs > 0.0 {
            distance_m / dt_secs * 3.6
        }
        else {
            0.0
        };

        if distance_m > SUDDEN_JUMP_MIN_M && dt_secs < SUDDEN_JUMP_MAX_SECS {
            return Some(RejectReason::SuddenJump { distance_m, dt_secs });
        }

        if distance_m > EXCESSIVE_JUMP_MIN_M && dt_secs < EXCESSIVE_JUMP_MAX_SECS {
            return Some(RejectReason::ExcessiveJump { distance_m, dt_secs });
        }

        if (computed_kmh - reported_kmh).abs() > INCOHERENT_SPEED_MAX_KMH
            && distance_m > INCOHERENT_SPEED_MIN_M
        {
            return Some(RejectReason::IncoherentSpeed {
                computed_kmh,
                reported_kmh,
            });
        }

        let is_real_stop = reported_kmh < REAL_STOP_MAX_KMH
            && last.speed_kmh() < REAL_STOP_MAX_KMH
            && distance_m < REAL_STOP_MAX_M;

        if reported_kmh < 1.0 && distance_m > STATIONARY_JUMP_MIN_M && !is_real_stop {
            return Some(RejectReason::StationaryJump { distance_m });
        }

        None
    }
}

/// Great-circle distance in metres.
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();

    let a = (dlat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (dlon / 2.0).sin().powi(2);

    2.0 * a.sqrt().asin() * EARTH_RADIUS_M
}
