use std::{
    fmt::{
        Debug,
        Display,
    },
    str::FromStr,
};

use bitflags::bitflags;
use chrono::NaiveDateTime;

/// Knots to km/h.
pub const KNOTS_TO_KMH: f64 = 1.852;

/// Reported speeds above this are clamped (tracker firmware glitch guard).
pub const MAX_SPEED_KMH: f64 = 250.0;

/// The 10-digit decimal identifier a tracker declares during registration and
/// repeats in every position frame.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId {
    id: u64,
}

impl DeviceId {
    pub fn from_u64(id: u64) -> Option<Self> {
        (id < 10_000_000_000).then(|| Self { id })
    }

    /// The trailing 5 digits, used as the `ID=` field of RPG frames.
    pub fn short(&self) -> ShortDeviceId {
        ShortDeviceId {
            id: (self.id % 100_000) as u32,
        }
    }
}

impl Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:010}", self.id)
    }
}

impl Debug for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DeviceId({self})")
    }
}

impl FromStr for DeviceId {
    type Err = DeviceIdFromStrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || {
            DeviceIdFromStrError {
                input: s.to_owned(),
            }
        };
        if s.len() != 10 || !s.bytes().all(|byte| byte.is_ascii_digit()) {
            return Err(err());
        }
        let id = s.parse::<u64>().map_err(|_| err())?;
        Self::from_u64(id).ok_or_else(err)
    }
}

#[derive(Clone, Debug, thiserror::Error)]
#[error("invalid device id: {input}")]
pub struct DeviceIdFromStrError {
    pub input: String,
}

/// The short form of a [`DeviceId`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShortDeviceId {
    id: u32,
}

impl Display for ShortDeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:05}", self.id)
    }
}

impl Debug for ShortDeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ShortDeviceId({self})")
    }
}

bitflags! {
    /// Auxiliary status word of a TQ position frame.
    ///
    /// Only the ACC line has a known meaning; the other bits are carried
    /// opaquely for auditing.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct TqStatus: u32 {
        const IGNITION = 0x0000_0002;

        const _ = !0;
    }
}

/// One decoded position report, ready for filtering.
///
/// `device_id` is `None` when the frame did not carry the 10-digit long
/// identifier; the connection worker resolves it against the session before
/// the fix reaches the trajectory filter.
#[derive(Clone, Debug)]
pub struct Fix {
    pub device_id: Option<DeviceId>,
    /// Signed decimal degrees, southern hemisphere negative.
    pub latitude: f64,
    /// Signed decimal degrees, western hemisphere negative.
    pub longitude: f64,
    pub speed_knots: f64,
    /// Degrees, 0–360.
    pub heading: f64,
    /// GPS timestamp, UTC.
    pub timestamp: NaiveDateTime,
    pub ignition: bool,
    pub status: TqStatus,
    /// Hex rendering of the inbound frame, kept for the audit trail.
    pub raw_hex: String,
}

impl Fix {
    pub fn speed_kmh(&self) -> f64 {
        (self.speed_knots * KNOTS_TO_KMH).min(MAX_SPEED_KMH)
    }

    /// An unfixed receiver reports both coordinates as zero.
    pub fn has_position(&self) -> bool {
        self.latitude.abs() >= 1e-6 || self.longitude.abs() >= 1e-6
    }

    pub fn gps_date(&self) -> String {
        self.timestamp.format("%d/%m/%y").to_string()
    }

    pub fn gps_time(&self) -> String {
        self.timestamp.format("%H:%M:%S").to_string()
    }
}
