//! Durable outputs: the CSV fix log, the pipe-separated RPG decision audit,
//! and the plain-text logs for UDP sends and filtered NMEA frames.
//!
//! All writers append whole lines under a mutex, so concurrent workers
//! interleave at line granularity.

use std::{
    fs::{
        File,
        OpenOptions,
    },
    io::Write,
    path::Path,
    sync::Mutex,
};

use chrono::Local;

use crate::types::{
    DeviceId,
    Fix,
};

const CSV_HEADER: [&str; 9] = [
    "ID",
    "LAT",
    "LON",
    "HEADING",
    "SPEED_KMH",
    "SPEED_KNOTS",
    "GPS_DATE",
    "GPS_TIME",
    "RECV_TIMESTAMP",
];

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn open_append(path: &Path) -> Result<(File, bool), std::io::Error> {
    let created = !path.exists();
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok((file, created))
}

/// Append-only CSV log of accepted fixes.
pub struct FixLog {
    writer: Mutex<csv::Writer<File>>,
}

impl FixLog {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, crate::Error> {
        let path = path.as_ref();
        let (file, created) = open_append(path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        if created {
            writer.write_record(CSV_HEADER)?;
            writer.flush()?;
            tracing::info!(path = %path.display(), "created fix log");
        }
        else {
            tracing::info!(path = %path.display(), "appending to existing fix log");
        }

        Ok(Self {
            writer: Mutex::new(writer),
        })
    }

    pub fn append(&self, device_id: DeviceId, fix: &Fix) -> Result<(), crate::Error> {
        let received = Local::now().format(TIMESTAMP_FORMAT).to_string();

        let mut writer = self.writer.lock().expect("fix log poisoned");
        writer.write_record([
            device_id.to_string(),
            format!("{:.6}", fix.latitude),
            format!("{:.6}", fix.longitude),
            format!("{:.1}", fix.heading),
            format!("{:.1}", fix.speed_kmh()),
            format!("{:.1}", fix.speed_knots),
            fix.gps_date(),
            fix.gps_time(),
            received,
        ])?;
        writer.flush()?;
        Ok(())
    }
}

/// Pipe-separated audit trail of every RPG uplink decision:
/// `timestamp | inbound_hex | outbound_rpg_or_empty | status`.
#[derive(Debug)]
pub struct AuditLog {
    file: Mutex<File>,
}

impl AuditLog {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, std::io::Error> {
        let path = path.as_ref();
        let (mut file, created) = open_append(path)?;

        if created {
            let now = Local::now().format(TIMESTAMP_FORMAT);
            writeln!(file, "# RPG uplink decisions - {now}")?;
            writeln!(file, "# TIMESTAMP | INBOUND_HEX | OUTBOUND_RPG | STATUS")?;
            tracing::info!(path = %path.display(), "created rpg audit log");
        }

        Ok(Self {
            file: Mutex::new(file),
        })
    }

    pub fn record(
        &self,
        inbound_hex: &str,
        outbound: &str,
        status: &str,
    ) -> Result<(), std::io::Error> {
        let now = Local::now().format(TIMESTAMP_FORMAT);
        let mut file = self.file.lock().expect("audit log poisoned");
        writeln!(file, "{now} | {inbound_hex} | {outbound} | {status}")
    }
}

/// Timestamped single-line log, used for the UDP send trail and the filtered
/// NMEA frames.
#[derive(Debug)]
pub struct LineLog {
    file: Mutex<File>,
}

impl LineLog {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, std::io::Error> {
        let (file, _) = open_append(path.as_ref())?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    pub fn append(&self, line: &str) -> Result<(), std::io::Error> {
        let now = Local::now().format(TIMESTAMP_FORMAT);
        let mut file = self.file.lock().expect("line log poisoned");
        writeln!(file, "{now}: {line}")
    }
}
