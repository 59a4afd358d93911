//! Downstream uplink: sealed RPG frames leave as single UDP datagrams.

pub mod rpg;

use tokio::net::UdpSocket;

use crate::uplink::rpg::UplinkFrame;

/// One long-lived unconnected socket for the lifetime of the process.
#[derive(Debug)]
pub struct UplinkSender {
    socket: UdpSocket,
    target: String,
}

impl UplinkSender {
    pub async fn bind(host: &str, port: u16) -> Result<Self, std::io::Error> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        Ok(Self {
            socket,
            target: format!("{host}:{port}"),
        })
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Sends one frame as one datagram. Errors are the caller's to log; the
    /// gateway never retries a dropped datagram.
    pub async fn send(&self, frame: &UplinkFrame) -> Result<(), std::io::Error> {
        let sent = self.socket.send_to(frame.as_bytes(), &self.target).await?;
        if sent != frame.as_bytes().len() {
            tracing::warn!(sent, frame_len = frame.as_bytes().len(), "short datagram send");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::UplinkSender;
    use crate::{
        types::{
            DeviceId,
            Fix,
            TqStatus,
        },
        uplink::rpg,
    };

    #[tokio::test]
    async fn a_frame_arrives_as_a_single_datagram() {
        let receiver = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = receiver.local_addr().unwrap().port();

        let sender = UplinkSender::bind("127.0.0.1", port).await.unwrap();

        let device_id = "2076668133".parse::<DeviceId>().unwrap();
        let fix = Fix {
            device_id: Some(device_id),
            latitude: -34.652_258_4,
            longitude: -58.533_800_3,
            speed_knots: 2.0,
            heading: 297.0,
            timestamp: NaiveDate::from_ymd_opt(2025, 9, 3)
                .unwrap()
                .and_hms_opt(17, 44, 21)
                .unwrap(),
            ignition: false,
            status: TqStatus::default(),
            raw_hex: String::new(),
        };
        let frame = rpg::encode(&fix, device_id.short());

        sender.send(&frame).await.unwrap();

        let mut buffer = [0u8; 256];
        let (received, _) = receiver.recv_from(&mut buffer).await.unwrap();
        assert_eq!(&buffer[..received], frame.as_bytes());
    }
}
