use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signs a query string with HMAC-SHA256 as required for every private call.
///
/// The venue authenticates requests by signing the full query string
/// (timestamp included) with the account's API secret and appending the
/// hex-encoded digest as a `signature` parameter.
pub fn sign_request(secret: &str, query_string: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(query_string.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}
