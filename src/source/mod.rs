//! Inbound frame handling.
//!
//! The TQ family is self-delimiting with fixed-structure records and the
//! trackers in the field write one record per TCP segment, so the gateway
//! classifies and decodes whole reads. Coalesced frames would need framing to
//! be re-established by the transport layer; see [`classify`].

pub mod nmea;
pub mod tq;

/// `$` — header byte of the ASCII-digit position frame flavour.
const POSITION_HEADER: u8 = 0x24;

/// `xx` — start-of-frame marker of the binary TQ records.
const BINARY_HEADER: u8 = 0x78;

const PROTOCOL_REGISTRATION: u8 = 0x01;
const PROTOCOL_POSITION: u8 = 0x22;

/// The acknowledgment a tracker expects after its registration frame. The
/// bytes are mandated by the protocol and are reproduced verbatim from the
/// vendor's reference exchange.
pub const REGISTRATION_ACK: &[u8] = &[
    0x78, 0x78, 0x0d, 0x01, 0x08, 0x65, 0x46, 0x80, 0x50, 0x13, 0x82, 0x16, 0x00, 0xbe, 0xb9,
    0xfa, 0x0d, 0x0a,
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameClass {
    /// Binary registration frame; answered with [`REGISTRATION_ACK`].
    Registration,
    /// Position frame of the TQ family.
    Position,
    /// ASCII `*…#` record; audited but never uplinked.
    Nmea,
    /// Not recognized; position decoding is still attempted opportunistically.
    Unknown,
}

/// Classifies one inbound frame.
///
/// The `$` flavour is checked before the binary protocol byte: a `$` frame's
/// identifier digits can collide with the registration marker, so the header
/// byte has to win.
pub fn classify(data: &[u8]) -> FrameClass {
    if let Ok(text) = str::from_utf8(data) {
        let text = text.trim();
        if text.starts_with('*') && text.ends_with('#') {
            return FrameClass::Nmea;
        }
    }

    match data {
        [POSITION_HEADER, ..] => FrameClass::Position,
        [BINARY_HEADER, BINARY_HEADER, _, PROTOCOL_REGISTRATION, ..] => FrameClass::Registration,
        [BINARY_HEADER, BINARY_HEADER, _, PROTOCOL_POSITION, ..] => FrameClass::Position,
        _ => FrameClass::Unknown,
    }
}
