//! Shared-secret checks for operator tokens (admin, metrics) and the
//! `Authorization` header format they arrive in.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Compare a presented token with the configured one.
///
/// Both sides are hashed first so neither length nor content leaks through
/// timing.
pub fn tokens_equal(presented: &str, expected: &str) -> bool {
    let presented = Sha256::digest(presented.as_bytes());
    let expected = Sha256::digest(expected.as_bytes());
    presented.ct_eq(&expected).into()
}

/// Token from an `Authorization: Bearer <token>` value. The scheme is
/// case-insensitive; empty tokens are treated as absent.
pub fn parse_bearer(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    Some(token.trim()).filter(|t| !t.is_empty())
}
