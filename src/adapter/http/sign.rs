//! Request signing for private exchange endpoints.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Canonical query string: parameters sorted by key, `k=v` joined with `&`.
#[must_use]
pub fn canonical_query(params: &[(String, String)]) -> String {
    let mut sorted: Vec<&(String, String)> = params.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));
    sorted
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Hex HMAC-SHA256 over `api_key + timestamp + payload`, where payload is
/// the canonical query string for GET requests or the raw JSON body for
/// POST requests.
#[must_use]
pub fn sign_request(secret: &str, api_key: &str, timestamp: i64, payload: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(api_key.as_bytes());
    mac.update(timestamp.to_string().as_bytes());
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}
