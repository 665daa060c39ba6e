//! Wire-level constants and helpers shared by the server and the
//! replica client.
//!
//! Header names are lowercase as they appear on the wire; HTTP header
//! matching is case-insensitive anyway.

use hyper::HeaderMap;
use std::collections::HashMap;

/// Marks an intra-cluster proxy hop. Presence is what matters, not the
/// value.
pub const PROXY_HEADER: &str = "proxy_header";

/// The originator's write stamp: sent on proxied PUT/DELETE requests,
/// echoed on proxy GET responses.
pub const TIMESTAMP_HEADER: &str = "timestamp_header";

/// Absolute expiration deadline in millis. Absent or malformed values
/// mean "never expires" by protocol contract.
pub const EXPIRES_HEADER: &str = "expires";

/// Parse a numeric header; `None` on absence or garbage.
pub fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

// ---------------------------------------------------------------------------
// Percent codec
// ---------------------------------------------------------------------------

fn is_unreserved(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~')
}

/// Percent-encode arbitrary key bytes for use in a query value.
pub fn percent_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &byte in bytes {
        if is_unreserved(byte) {
            out.push(byte as char);
        } else {
            out.push('%');
            out.push_str(&format!("{:02X}", byte));
        }
    }
    out
}

/// Decode percent escapes back to raw bytes. Invalid escapes pass
/// through verbatim.
pub fn percent_decode(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'%' {
            let hex = raw.get(i + 1..i + 3);
            if let Some(decoded) = hex.and_then(|pair| {
                let high = (pair[0] as char).to_digit(16)?;
                let low = (pair[1] as char).to_digit(16)?;
                Some((high * 16 + low) as u8)
            }) {
                out.push(decoded);
                i += 3;
                continue;
            }
        }
        out.push(raw[i]);
        i += 1;
    }
    out
}

/// Split a raw query string into decoded `name -> value` pairs. A
/// repeated name keeps the last value.
pub fn parse_query(query: &str) -> HashMap<String, Vec<u8>> {
    let mut out = HashMap::new();
    for pair in query.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
        let name = String::from_utf8_lossy(&percent_decode(name.as_bytes())).into_owned();
        out.insert(name, percent_decode(value.as_bytes()));
    }
    out
}
