pub mod checksum;

use std::sync::OnceLock;

pub fn http_client() -> reqwest::Client {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

    CLIENT
        .get_or_init(|| {
            reqwest::ClientBuilder::new()
                .user_agent("tq-gateway/0.1 (gps tracking gateway)")
                .build()
                .expect("failed to create http client")
        })
        .clone()
}

/// Bounds-checked slice of a hex-rendered frame.
pub fn hex_field(hex: &str, start: usize, len: usize) -> Option<&str> {
    hex.get(start..start + len)
}

/// Parses a run of ASCII decimal digits. Many TQ fields are plain decimal
/// digits embedded in the byte stream, so they show up verbatim in the hex
/// rendering.
pub fn decimal_field(field: &str) -> Option<u32> {
    if field.is_empty() || !field.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    field.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::{
        decimal_field,
        hex_field,
    };

    #[test]
    fn it_slices_hex_fields() {
        let hex = "2420766681";
        assert_eq!(hex_field(hex, 2, 8), Some("20766681"));
        assert_eq!(hex_field(hex, 8, 8), None);
    }

    #[test]
    fn it_parses_decimal_fields() {
        assert_eq!(decimal_field("002"), Some(2));
        assert_eq!(decimal_field("297"), Some(297));
        assert_eq!(decimal_field("ff"), None);
        assert_eq!(decimal_field(""), None);
    }
}
