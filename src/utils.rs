//! Small helpers shared across modules: hex formatting and SHA-256.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::Error;

/// SHA-256 of `data`.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    openssl::sha::sha256(data)
}

pub fn u8_to_hex(data: &[u8]) -> String {
    let mut s = String::with_capacity(data.len() * 2);
    for b in data {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

#[cfg(test)]
pub fn hex_to_u8(s: &str) -> Vec<u8> {
    assert!(s.len() % 2 == 0);
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
        .collect()
}

/// Decode a base64 field from a CT log's JSON response, mapping failures to
/// [`Error::MalformedResponseBody`].
pub fn decode_base64_field(field_name: &str, value: &str) -> Result<Vec<u8>, Error> {
    BASE64
        .decode(value)
        .map_err(|e| Error::MalformedResponseBody(format!("{} is not valid base64: {}", field_name, e)))
}
