//! The two checksum algorithms used on the wire.
//!
//! Inbound binary frames of the TQ family carry a CRC-ITU trailer
//! (CRC-16/MCRF4XX: reflected 0x8408, init 0xffff). Outbound RPG frames are
//! sealed with a byte-wise XOR over the ASCII body.

use crc::{
    CRC_16_MCRF4XX,
    Crc,
};

const CRC_ITU: Crc<u16> = Crc::<u16>::new(&CRC_16_MCRF4XX);

pub fn crc_itu(data: &[u8]) -> u16 {
    CRC_ITU.checksum(data)
}

/// XOR checksum of an RPG frame, from the opening `>` up to and including the
/// `*`, rendered as two uppercase hex digits.
///
/// Returns `None` when the frame has no `>`…`*` span to seal.
pub fn rpg_checksum(frame: &str) -> Option<String> {
    let start = frame.find('>')?;
    let asterisk = frame[start..].find('*')? + start;
    let checksum = frame[start..=asterisk]
        .bytes()
        .fold(0u8, |acc, byte| acc ^ byte);
    Some(format!("{checksum:02X}"))
}

/// Frame/checksum pairs captured from the downstream collector, used by the
/// interactive `checksum` self-test.
pub const KNOWN_RPG_CHECKSUMS: &[(&str, &str)] = &[
    (
        ">RGP121116125537-3456.0510-05759.56090000283000001;&08;ID=0107;#0090*",
        "57",
    ),
    (
        ">RGP230622213474-3435.6154-05833.01920000003000001;&01;ID=1146;#0001*",
        "5F",
    ),
];
