//! HMAC request signing for provider APIs and webhooks.
//!
//! Crypto-exchange requests and notifications are signed as
//! `HEX_UPPER(HMAC_SHA512(secret, timestamp + "\n" + nonce + "\n" + body))`.
//! The body is always the raw bytes on the wire; callers must sign or verify
//! before re-serializing anything.
//!
//! Card webhooks use HMAC-SHA256 over `"<t>.<body>"`, see [`card_signature`].

use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha512};

type HmacSha512 = Hmac<Sha512>;
type HmacSha256 = Hmac<Sha256>;

fn exchange_mac(secret: &[u8], timestamp: &str, nonce: &str, body: &[u8]) -> HmacSha512 {
    let mut mac = HmacSha512::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(timestamp.as_bytes());
    mac.update(b"\n");
    mac.update(nonce.as_bytes());
    mac.update(b"\n");
    mac.update(body);
    mac
}

/// Sign a crypto-exchange payload. Returns upper-case hex.
pub fn sign(secret: &[u8], timestamp: &str, nonce: &str, body: &[u8]) -> String {
    let mac = exchange_mac(secret, timestamp, nonce, body);
    hex::encode_upper(mac.finalize().into_bytes())
}

/// Verify a crypto-exchange signature in constant time.
///
/// Hex case is ignored. Undecodable signatures are compared against zeros so
/// the failure path costs the same as a mismatch.
pub fn verify(secret: &[u8], timestamp: &str, nonce: &str, body: &[u8], claimed: &str) -> bool {
    let mac = exchange_mac(secret, timestamp, nonce, body);
    let expected = hex::decode(claimed.trim()).unwrap_or_else(|_| vec![0u8; 64]);
    mac.verify_slice(&expected).is_ok()
}

/// Card webhook signature: lower-case hex HMAC-SHA256 over `"<t>.<body>"`.
pub fn card_signature(secret: &[u8], timestamp: i64, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify one `v1` card signature candidate in constant time.
pub fn verify_card_signature(secret: &[u8], timestamp: i64, body: &[u8], claimed: &str) -> bool {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    let expected = hex::decode(claimed.trim()).unwrap_or_else(|_| vec![0u8; 32]);
    mac.verify_slice(&expected).is_ok()
}

/// Plain HMAC-SHA256, lower-case hex. Used for bearer tokens.
pub fn compute_hmac(secret: &[u8], body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time check of a [`compute_hmac`] value. Hex case is ignored.
pub fn verify_hmac(secret: &[u8], body: &[u8], claimed: &str) -> bool {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(body);
    let expected = hex::decode(claimed.trim()).unwrap_or_else(|_| vec![0u8; 32]);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"exchange-api-secret";
    const BODY: &[u8] = br#"{"bizType":"PAY","bizStatus":"PAY_SUCCESS"}"#;

    #[test]
    fn signature_is_upper_hex_sha512() {
        let sig = sign(SECRET, "1700000000000", "abc123", BODY);
        assert_eq!(sig.len(), 128);
        assert!(sig
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }

    #[test]
    fn matches_manual_message_layout() {
        let mut mac = HmacSha512::new_from_slice(SECRET).unwrap();
        mac.update(b"1700000000000\nabc123\n");
        mac.update(BODY);
        let manual = hex::encode_upper(mac.finalize().into_bytes());
        assert_eq!(sign(SECRET, "1700000000000", "abc123", BODY), manual);
    }

    #[test]
    fn verify_accepts_own_signature() {
        let sig = sign(SECRET, "1700000000000", "n1", BODY);
        assert!(verify(SECRET, "1700000000000", "n1", BODY, &sig));
        assert!(verify(
            SECRET,
            "1700000000000",
            "n1",
            BODY,
            &sig.to_lowercase()
        ));
    }

    #[test]
    fn any_altered_input_is_rejected() {
        let sig = sign(SECRET, "1700000000000", "n1", BODY);
        let mut tampered = BODY.to_vec();
        tampered[3] ^= 0x01;
        assert!(!verify(SECRET, "1700000000000", "n1", &tampered, &sig));
        assert!(!verify(SECRET, "1700000000001", "n1", BODY, &sig));
        assert!(!verify(SECRET, "1700000000000", "n2", BODY, &sig));
        assert!(!verify(b"other-secret", "1700000000000", "n1", BODY, &sig));
    }

    #[test]
    fn garbage_signature_is_rejected() {
        assert!(!verify(SECRET, "1", "n", BODY, "not-hex-zz"));
        assert!(!verify(SECRET, "1", "n", BODY, ""));
    }

    #[test]
    fn card_signature_roundtrip() {
        let sig = card_signature(b"whsec_test", 1_700_000_000, BODY);
        assert!(verify_card_signature(b"whsec_test", 1_700_000_000, BODY, &sig));
        assert!(!verify_card_signature(b"whsec_test", 1_700_000_001, BODY, &sig));
        assert!(!verify_card_signature(b"whsec_other", 1_700_000_000, BODY, &sig));
    }

    #[test]
    fn token_mac_ignores_hex_case() {
        let mac = compute_hmac(b"auth", b"user-1");
        assert!(verify_hmac(b"auth", b"user-1", &mac.to_uppercase()));
        assert!(!verify_hmac(b"auth", b"user-2", &mac));
        assert!(!verify_hmac(b"auth", b"user-1", "zz"));
    }
}
