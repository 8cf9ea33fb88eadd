//! HMAC-SHA256 request signing over `method\ndate\nresource`.
//!
//! Used in both directions: outbound calls to the Go-KMS service and inbound
//! API requests checked by the server.

use crate::error::{BlockerError, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Render a timestamp the way request dates are sent: RFC 1123 in UTC.
pub fn request_date(now: DateTime<Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S UTC").to_string()
}

fn mac_for(secret: &[u8], method: &str, date: &str, resource: &str) -> Result<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| BlockerError::Config(format!("invalid signing key: {e}")))?;
    mac.update(method.as_bytes());
    mac.update(b"\n");
    mac.update(date.as_bytes());
    mac.update(b"\n");
    mac.update(resource.as_bytes());
    Ok(mac)
}

/// Base64 HMAC-SHA256 of `method\ndate\nresource` under `secret`.
pub fn sign(secret: &[u8], method: &str, date: &str, resource: &str) -> Result<String> {
    let mac = mac_for(secret, method, date, resource)?;
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a presented base64 signature.
pub fn verify(secret: &[u8], method: &str, date: &str, resource: &str, presented: &str) -> bool {
    let Ok(tag) = STANDARD.decode(presented.trim()) else {
        return false;
    };
    match mac_for(secret, method, date, resource) {
        Ok(mac) => mac.verify_slice(&tag).is_ok(),
        Err(_) => false,
    }
}
