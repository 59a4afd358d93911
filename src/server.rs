//! TCP ingestion: the listener, one worker per tracker connection, and the
//! process-wide gateway state the workers share.
//!
//! Workers never take the process down: decode failures are audited per
//! frame, read errors and peer closes terminate only the worker, and uplink
//! or file errors are logged and dropped.

use std::{
    collections::BTreeSet,
    net::SocketAddr,
    path::PathBuf,
    sync::{
        Arc,
        Mutex,
        atomic::{
            AtomicU64,
            Ordering,
        },
    },
};

use bytes::BytesMut;
use tokio::{
    io::{
        AsyncReadExt,
        AsyncWriteExt,
    },
    net::{
        TcpListener,
        TcpStream,
    },
};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::{
    geocode::Geocoder,
    output::{
        AuditLog,
        FixLog,
        LineLog,
    },
    source::{
        self,
        FrameClass,
        nmea,
        tq,
    },
    tracker::{
        Tracker,
        Verdict,
    },
    types::DeviceId,
    uplink::{
        UplinkSender,
        rpg,
    },
};

/// Trackers send one self-delimited record per segment, well under this.
const READ_BUFFER_SIZE: usize = 1024;

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub uplink_host: String,
    pub uplink_port: u16,
    pub geocoding_enabled: bool,
    pub geocoding_url: String,
    pub csv_path: PathBuf,
    pub audit_path: PathBuf,
    pub udp_log_path: PathBuf,
    pub nmea_log_path: PathBuf,
}

/// Point-in-time view for the interactive `status`/`clients` commands.
#[derive(Clone, Debug)]
pub struct Status {
    pub current_device_id: Option<DeviceId>,
    pub connected_clients: Vec<SocketAddr>,
    pub total: u64,
    pub accepted: u64,
    pub filtered: u64,
    pub geocoding_enabled: bool,
    pub geocoding_cache_size: usize,
}

/// Process-wide state shared by every connection worker.
pub struct Gateway {
    geocoder: Geocoder,
    uplink: UplinkSender,
    fix_log: FixLog,
    audit: AuditLog,
    udp_log: LineLog,
    nmea_log: LineLog,

    tracker: Mutex<Tracker>,
    /// Device id of the most recent session; frames without an embedded id
    /// are attributed to it.
    session: Mutex<Option<DeviceId>>,
    clients: Mutex<BTreeSet<SocketAddr>>,

    total: AtomicU64,
    accepted: AtomicU64,
    filtered: AtomicU64,
}

impl Gateway {
    pub async fn new(config: &GatewayConfig) -> Result<Self, crate::Error> {
        Ok(Self {
            geocoder: Geocoder::new(&config.geocoding_url, config.geocoding_enabled),
            uplink: UplinkSender::bind(&config.uplink_host, config.uplink_port).await?,
            fix_log: FixLog::create(&config.csv_path)?,
            audit: AuditLog::create(&config.audit_path)?,
            udp_log: LineLog::create(&config.udp_log_path)?,
            nmea_log: LineLog::create(&config.nmea_log_path)?,
            tracker: Mutex::new(Tracker::new()),
            session: Mutex::new(None),
            clients: Mutex::new(BTreeSet::new()),
            total: AtomicU64::new(0),
            accepted: AtomicU64::new(0),
            filtered: AtomicU64::new(0),
        })
    }

    pub fn geocoder(&self) -> &Geocoder {
        &self.geocoder
    }

    pub fn uplink_target(&self) -> &str {
        self.uplink.target()
    }

    pub fn current_device_id(&self) -> Option<DeviceId> {
        *self.session.lock().expect("session poisoned")
    }

    pub async fn status(&self) -> Status {
        Status {
            current_device_id: self.current_device_id(),
            connected_clients: self
                .clients
                .lock()
                .expect("clients poisoned")
                .iter()
                .copied()
                .collect(),
            total: self.total.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            geocoding_enabled: self.geocoder.is_enabled(),
            geocoding_cache_size: self.geocoder.cache_size().await,
        }
    }

    /// Accepts connections until cancelled, spawning one worker per client.
    pub async fn serve(
        self: &Arc<Self>,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) {
        tracing::info!("waiting for tracker connections");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                result = listener.accept() => {
                    match result {
                        Ok((connection, address)) => {
                            let span = tracing::info_span!("connection", %address);
                            let gateway = Arc::clone(self);
                            let shutdown = shutdown.clone();
                            tokio::spawn(
                                async move {
                                    tracing::info!("new connection");
                                    println!("🔗 new connection from {address}");
                                    gateway.handle_connection(connection, address, shutdown).await;
                                    tracing::info!("connection closed");
                                    println!("🔌 connection closed: {address}");
                                }
                                .instrument(span),
                            );
                        }
                        Err(error) => {
                            // transient accept failures must not kill the listener
                            tracing::error!(?error, "accept failed");
                        }
                    }
                }
            }
        }
    }

    async fn handle_connection(
        &self,
        mut connection: TcpStream,
        address: SocketAddr,
        shutdown: CancellationToken,
    ) {
        self.clients
            .lock()
            .expect("clients poisoned")
            .insert(address);

        let mut buffer = BytesMut::with_capacity(READ_BUFFER_SIZE);

        loop {
            buffer.clear();

            tokio::select! {
                _ = shutdown.cancelled() => break,
                result = connection.read_buf(&mut buffer) => {
                    match result {
                        Ok(0) => break,
                        Ok(_) => {
                            if let Some(reply) = self.process_frame(&buffer).await {
                                if let Err(error) = connection.write_all(reply).await {
                                    tracing::error!(?error, "failed to send registration ack");
                                    break;
                                }
                            }
                        }
                        Err(error) => {
                            tracing::error!(?error, "read error");
                            break;
                        }
                    }
                }
            }
        }

        self.clients
            .lock()
            .expect("clients poisoned")
            .remove(&address);
    }

    /// Runs one inbound frame through the classify → decode → filter →
    /// uplink pipeline. Returns bytes to write back to the tracker, if any.
    async fn process_frame(&self, data: &[u8]) -> Option<&'static [u8]> {
        let count = self.total.fetch_add(1, Ordering::Relaxed) + 1;
        let raw_hex = hex::encode(data);
        tracing::info!(count, frame = %raw_hex, "inbound frame");

        match source::classify(data) {
            FrameClass::Nmea => {
                self.handle_nmea(data, &raw_hex);
                None
            }
            FrameClass::Registration => {
                self.handle_registration(&raw_hex);
                Some(source::REGISTRATION_ACK)
            }
            class @ (FrameClass::Position | FrameClass::Unknown) => {
                self.handle_position(data, &raw_hex, class).await;
                None
            }
        }
    }

    /// NMEA-like records are audited and dropped; they never reach the
    /// uplink.
    fn handle_nmea(&self, data: &[u8], raw_hex: &str) {
        let text = String::from_utf8_lossy(data);
        let text = text.trim();

        match nmea::decode(text) {
            Ok(report) => {
                tracing::info!(
                    device_id = %report.device_id,
                    latitude = report.latitude,
                    longitude = report.longitude,
                    "nmea record filtered"
                );
            }
            Err(error) => {
                tracing::warn!(?error, "malformed nmea record filtered");
            }
        }
        println!("⛔ nmea record filtered: {text}");

        if let Err(error) = self.nmea_log.append(text) {
            tracing::error!(?error, "failed to write nmea log");
        }
        if let Err(error) = self.audit.record(raw_hex, "", "IGNORED_NMEA") {
            tracing::error!(?error, "failed to write audit log");
        }
    }

    fn handle_registration(&self, raw_hex: &str) {
        // the long id is only present in sub-flavours that embed it as
        // decimal digits; the binary flavour registers anonymously and the
        // session id arrives with the first position frame
        let device_id = raw_hex
            .get(2..12)
            .and_then(|field| field.parse::<DeviceId>().ok());

        if let Some(device_id) = device_id {
            *self.session.lock().expect("session poisoned") = Some(device_id);
            tracing::info!(%device_id, "registration");
            println!("🆔 device registered: {device_id}");
        }
        else {
            tracing::info!("registration without embedded device id");
            println!("🆔 device registered, waiting for position frame to learn its id");
        }
    }

    async fn handle_position(&self, data: &[u8], raw_hex: &str, class: FrameClass) {
        let fix = match tq::decode(data) {
            Ok(fix) => fix,
            Err(error) if class == FrameClass::Position => {
                tracing::error!(%error, "position frame decode failed");
                println!("❌ decode error: {error}");
                if let Err(error) = self.audit.record(raw_hex, "", &format!("ERROR:{error}")) {
                    tracing::error!(?error, "failed to write audit log");
                }
                return;
            }
            Err(error) => {
                // unclassified and not opportunistically decodable
                tracing::debug!(%error, frame = %raw_hex, "ignoring unclassified frame");
                return;
            }
        };

        // a frame carrying the long id (re)binds the session; the latest
        // arrival for a device wins
        let device_id = match fix.device_id {
            Some(device_id) => {
                *self.session.lock().expect("session poisoned") = Some(device_id);
                device_id
            }
            None => {
                match self.current_device_id() {
                    Some(device_id) => device_id,
                    None => {
                        tracing::warn!("position frame without device id and no session");
                        if let Err(error) = self.audit.record(raw_hex, "", "NO_DEVICE_ID") {
                            tracing::error!(?error, "failed to write audit log");
                        }
                        return;
                    }
                }
            }
        };

        let verdict = self
            .tracker
            .lock()
            .expect("tracker poisoned")
            .evaluate(device_id, &fix);

        match verdict {
            Verdict::Rejected(reason) => {
                let filtered = self.filtered.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::info!(%device_id, %reason, filtered, "fix filtered");
                println!("🚫 fix filtered: {reason}");
                if let Err(error) = self.audit.record(raw_hex, "", &reason.to_string()) {
                    tracing::error!(?error, "failed to write audit log");
                }
            }
            Verdict::Accepted => {
                self.accepted.fetch_add(1, Ordering::Relaxed);

                if let Err(error) = self.fix_log.append(device_id, &fix) {
                    tracing::error!(?error, "failed to append fix log");
                }

                let address = self.geocoder.lookup(fix.latitude, fix.longitude).await;

                let frame = rpg::encode(&fix, device_id.short());
                if let Err(error) = self.uplink.send(&frame).await {
                    // dropped datagrams are not retried; the fix stays in the csv
                    tracing::error!(?error, "udp send failed");
                }
                if let Err(error) = self.udp_log.append(frame.as_str()) {
                    tracing::error!(?error, "failed to write udp log");
                }
                if let Err(error) = self.audit.record(raw_hex, frame.as_str(), "SENT") {
                    tracing::error!(?error, "failed to write audit log");
                }

                tracing::info!(
                    %device_id,
                    latitude = fix.latitude,
                    longitude = fix.longitude,
                    speed_kmh = fix.speed_kmh(),
                    heading = fix.heading,
                    gps_date = %fix.gps_date(),
                    gps_time = %fix.gps_time(),
                    address = %address,
                    "fix accepted"
                );
                println!(
                    "📍 fix accepted: id={device_id} lat={:.6} lon={:.6} {:.1} km/h",
                    fix.latitude,
                    fix.longitude,
                    fix.speed_kmh(),
                );
                println!("🔄 rpg frame sent: {frame}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        fs,
        path::PathBuf,
        sync::Arc,
        time::Duration,
    };

    use tokio::{
        io::{
            AsyncReadExt,
            AsyncWriteExt,
        },
        net::{
            TcpListener,
            TcpStream,
            UdpSocket,
        },
    };
    use tokio_util::sync::CancellationToken;

    use super::{
        Gateway,
        GatewayConfig,
    };
    use crate::{
        geocode,
        source,
    };

    const POSITION_FRAME: &str =
        "24207666813317442103092534391355060583202802002297ffffdfff00001c6a00000000000000df54000009";
    const NMEA_FRAME: &[u8] = b"*HQ,2076668133,V1,174421,A,3438.4010,S,05833.6031,W,0,0,030925#";
    // binary login frame: terminal serial number plus message serial and crc
    const REGISTRATION_FRAME: &str = "78780d010865468050138216001613650d0a";

    struct Harness {
        gateway: Arc<Gateway>,
        receiver: UdpSocket,
        dir: PathBuf,
        shutdown: CancellationToken,
    }

    impl Harness {
        async fn start(name: &str) -> (Self, TcpStream) {
            let dir = std::env::temp_dir().join(name);
            let _ = fs::remove_dir_all(&dir);
            fs::create_dir_all(&dir).unwrap();

            let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
            let uplink_port = receiver.local_addr().unwrap().port();

            let config = GatewayConfig {
                uplink_host: "127.0.0.1".to_owned(),
                uplink_port,
                geocoding_enabled: false,
                geocoding_url: geocode::DEFAULT_ENDPOINT.to_owned(),
                csv_path: dir.join("positions.csv"),
                audit_path: dir.join("rpg.log"),
                udp_log_path: dir.join("udp.log"),
                nmea_log_path: dir.join("nmea.log"),
            };
            let gateway = Arc::new(Gateway::new(&config).await.unwrap());

            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let address = listener.local_addr().unwrap();
            let shutdown = CancellationToken::new();

            tokio::spawn({
                let gateway = Arc::clone(&gateway);
                let shutdown = shutdown.clone();
                async move {
                    gateway.serve(listener, shutdown).await;
                }
            });

            let client = TcpStream::connect(address).await.unwrap();

            (
                Self {
                    gateway,
                    receiver,
                    dir,
                    shutdown,
                },
                client,
            )
        }

        async fn recv_datagram(&self) -> String {
            let mut buffer = [0u8; 256];
            let (received, _) =
                tokio::time::timeout(Duration::from_secs(5), self.receiver.recv_from(&mut buffer))
                    .await
                    .expect("no datagram within 5s")
                    .unwrap();
            String::from_utf8(buffer[..received].to_vec()).unwrap()
        }

        async fn no_datagram(&self) {
            let mut buffer = [0u8; 256];
            let result = tokio::time::timeout(
                Duration::from_millis(200),
                self.receiver.recv_from(&mut buffer),
            )
            .await;
            assert!(result.is_err(), "unexpected datagram");
        }

        fn stop(self) {
            self.shutdown.cancel();
            let _ = fs::remove_dir_all(&self.dir);
        }
    }

    // the trackers pause between records; give the worker time to drain one
    // frame before the next so reads stay one-record-per-frame
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(150)).await;
    }

    #[tokio::test]
    async fn a_session_flows_end_to_end() {
        let (harness, mut client) = Harness::start("tq-gateway-test-e2e").await;

        // registration is acknowledged with the mandated bytes
        client
            .write_all(&hex::decode(REGISTRATION_FRAME).unwrap())
            .await
            .unwrap();
        let mut ack = [0u8; 18];
        client.read_exact(&mut ack).await.unwrap();
        assert_eq!(&ack[..], source::REGISTRATION_ACK);
        settle().await;

        // first fix of the session: accepted and relayed
        client
            .write_all(&hex::decode(POSITION_FRAME).unwrap())
            .await
            .unwrap();
        let datagram = harness.recv_datagram().await;
        assert_eq!(
            datagram,
            ">RGP030925174421-3439.1355-05832.02800032971000001;&01;ID=68133;#0001*6E<"
        );

        // nmea records are filtered: audited, never uplinked
        client.write_all(NMEA_FRAME).await.unwrap();
        settle().await;
        harness.no_datagram().await;

        // ~1.9 km jump one second later: filtered
        let jump = POSITION_FRAME
            .replace("174421", "174422")
            .replace("3439135506", "3440135506");
        client.write_all(&hex::decode(jump).unwrap()).await.unwrap();
        settle().await;
        harness.no_datagram().await;

        // dwelling a minute later: accepted again
        let dwell = POSITION_FRAME.replace("174421", "174521");
        client
            .write_all(&hex::decode(dwell).unwrap())
            .await
            .unwrap();
        let datagram = harness.recv_datagram().await;
        assert!(datagram.starts_with(">RGP030925174521-3439.1355"));
        settle().await;

        let status = harness.gateway.status().await;
        assert_eq!(status.total, 5);
        assert_eq!(status.accepted, 2);
        assert_eq!(status.filtered, 1);
        assert_eq!(status.connected_clients.len(), 1);
        assert_eq!(
            status.current_device_id.unwrap().to_string(),
            "2076668133"
        );

        // audit trail: one line per decision
        let audit = fs::read_to_string(harness.dir.join("rpg.log")).unwrap();
        assert_eq!(audit.matches("| SENT").count(), 2);
        assert_eq!(audit.matches("IGNORED_NMEA").count(), 1);
        assert_eq!(audit.matches("sudden jump").count(), 1);

        // csv: header plus one row per accepted fix
        let csv = fs::read_to_string(harness.dir.join("positions.csv")).unwrap();
        assert_eq!(csv.lines().count(), 3);

        harness.stop();
    }

    #[tokio::test]
    async fn a_position_frame_without_a_session_is_audited() {
        let (harness, mut client) = Harness::start("tq-gateway-test-no-session").await;

        // id field damaged, no registration before it
        let mut frame = POSITION_FRAME.to_owned();
        frame.replace_range(2..12, "20a6668133");
        client
            .write_all(&hex::decode(frame).unwrap())
            .await
            .unwrap();
        settle().await;
        harness.no_datagram().await;

        let audit = fs::read_to_string(harness.dir.join("rpg.log")).unwrap();
        assert_eq!(audit.matches("NO_DEVICE_ID").count(), 1);

        harness.stop();
    }

    #[tokio::test]
    async fn a_malformed_position_frame_keeps_the_worker_alive() {
        let (harness, mut client) = Harness::start("tq-gateway-test-decode-error").await;

        // '$' header but garbage where the timestamp digits belong
        let mut frame = POSITION_FRAME.to_owned();
        frame.replace_range(12..18, "abcdef");
        client
            .write_all(&hex::decode(frame).unwrap())
            .await
            .unwrap();
        settle().await;

        let audit = fs::read_to_string(harness.dir.join("rpg.log")).unwrap();
        assert_eq!(audit.matches("ERROR:").count(), 1);

        // the same connection still works afterwards
        client
            .write_all(&hex::decode(POSITION_FRAME).unwrap())
            .await
            .unwrap();
        let datagram = harness.recv_datagram().await;
        assert!(datagram.starts_with(">RGP030925174421"));

        harness.stop();
    }
}
