//! HMAC-SHA256 webhook signing and constant-time verification.
//! Exported so recipients' own verification code and this crate's
//! tests exercise the identical implementation.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Signs `"{timestamp}.{canonical_payload}"`, hex-encoded, matching the
/// wire contract recipients must reproduce.
pub fn sign(secret: &str, timestamp: i64, canonical_payload: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts a key of any length");
    mac.update(format!("{timestamp}.{canonical_payload}").as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Recomputes the signature and compares in constant time, per the
/// signature round-trip invariant.
pub fn verify(secret: &str, timestamp: i64, canonical_payload: &str, signature: &str) -> bool {
    let expected = sign(secret, timestamp, canonical_payload);
    let Ok(decoded_expected) = hex::decode(&expected) else { return false };
    let Ok(decoded_given) = hex::decode(signature) else { return false };
    decoded_expected.ct_eq(&decoded_given).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let signature = sign("shh", 1_700_000_000, r#"{"a":1}"#);
        assert!(verify("shh", 1_700_000_000, r#"{"a":1}"#, &signature));
    }

    #[test]
    fn single_bit_flip_fails_verification() {
        let mut signature = sign("shh", 1_700_000_000, r#"{"a":1}"#);
        let flipped_char = if signature.as_bytes()[0] == b'0' { '1' } else { '0' };
        signature.replace_range(0..1, &flipped_char.to_string());
        assert!(!verify("shh", 1_700_000_000, r#"{"a":1}"#, &signature));
    }

    #[test]
    fn wrong_secret_fails_verification() {
        let signature = sign("shh", 1_700_000_000, r#"{"a":1}"#);
        assert!(!verify("other", 1_700_000_000, r#"{"a":1}"#, &signature));
    }
}
