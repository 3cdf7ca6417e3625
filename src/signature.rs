//! GitHub `X-Hub-Signature` verification (HMAC-SHA1).

use hmac::{Hmac, Mac};
use sha1::Sha1;
use subtle::ConstantTimeEq;

type HmacSha1 = Hmac<Sha1>;

pub const SIGNATURE_HEADER: &str = "X-Hub-Signature";
const SIGNATURE_PREFIX: &str = "sha1=";

fn digest(secret: &[u8], body: &[u8]) -> Option<Vec<u8>> {
    let mut mac = HmacSha1::new_from_slice(secret).ok()?;
    mac.update(body);
    Some(mac.finalize().into_bytes().to_vec())
}

/// Computes the `sha1=<hex>` signature GitHub sends for `body`.
pub fn sign(secret: &[u8], body: &[u8]) -> String {
    digest(secret, body)
        .map(|bytes| format!("{}{}", SIGNATURE_PREFIX, hex::encode(bytes)))
        .unwrap_or_default()
}

/// Checks `presented` against the HMAC-SHA1 of the raw body.
///
/// Returns `false` for any mismatch, including an empty, unprefixed or non-hex header.
pub fn verify(secret: &[u8], body: &[u8], presented: &str) -> bool {
    let Some(hex_sig) = presented.strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };
    let Ok(presented_bytes) = hex::decode(hex_sig) else {
        return false;
    };
    let Some(expected) = digest(secret, body) else {
        return false;
    };

    expected.as_slice().ct_eq(presented_bytes.as_slice()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"It's a Secret to Everybody";
    const BODY: &[u8] = b"Hello, World!";

    #[test]
    fn test_known_vector() {
        let signature = sign(SECRET, BODY);
        assert_eq!(signature, "sha1=01dc10d0c83e72ed246219cdd91669667fe2ca59");
        assert!(verify(SECRET, BODY, &signature));
    }

    #[test]
    fn test_flipping_any_body_byte_fails() {
        let signature = sign(SECRET, BODY);
        for index in 0..BODY.len() {
            let mut tampered = BODY.to_vec();
            tampered[index] ^= 0x01;
            assert!(!verify(SECRET, &tampered, &signature), "byte {index}");
        }
    }

    #[test]
    fn test_flipping_any_secret_byte_fails() {
        let signature = sign(SECRET, BODY);
        for index in 0..SECRET.len() {
            let mut tampered = SECRET.to_vec();
            tampered[index] ^= 0x01;
            assert!(!verify(&tampered, BODY, &signature), "byte {index}");
        }
    }

    #[test]
    fn test_malformed_headers_are_rejected() {
        let signature = sign(SECRET, BODY);
        let hex_only = signature.trim_start_matches("sha1=").to_string();

        assert!(!verify(SECRET, BODY, ""));
        assert!(!verify(SECRET, BODY, "sha1="));
        assert!(!verify(SECRET, BODY, &hex_only));
        assert!(!verify(SECRET, BODY, "sha1=zz"));
        assert!(!verify(SECRET, BODY, "sha1=abc"));
        assert!(!verify(SECRET, BODY, &format!("sha256={hex_only}")));
        assert!(!verify(SECRET, BODY, &signature[..signature.len() - 2]));
    }
}
