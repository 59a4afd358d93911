//! # TQ → RPG telemetry gateway
//!
//! A TCP ingestion service for GPS vehicle trackers speaking the TQ binary
//! protocol family (plus an ASCII `*…#` variant). Decoded position reports
//! are quality-filtered against each device's trajectory, appended to a CSV
//! log, re-encoded as `>RGP…<` frames and relayed by UDP to the downstream
//! collector.

pub mod geocode;
pub mod output;
pub mod server;
pub mod source;
pub mod tracker;
pub mod types;
pub mod uplink;
pub mod util;

#[derive(Debug, thiserror::Error)]
#[error("tq-gateway error")]
pub enum Error {
    Io(#[from] std::io::Error),
    Csv(#[from] csv::Error),
    Http(#[from] reqwest::Error),
    Tq(#[from] source::tq::DecodeError),
    Nmea(#[from] source::nmea::DecodeError),
    DeviceId(#[from] types::DeviceIdFromStrError),
}
