use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Compute the delivery signature for a payload.
///
/// The signed input is the decimal unix timestamp, a literal `.`, then the
/// payload bytes. The result is `sha256=` followed by lowercase hex.
pub fn compute_signature(payload: &str, secret: &str, timestamp: i64) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload.as_bytes());
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Verify a received signature against the payload and timestamp.
///
/// Comparison is constant-time. Receivers should pair this with
/// [`is_timestamp_fresh`] to reject replays.
pub fn verify_signature(payload: &str, secret: &str, timestamp: i64, signature: &str) -> bool {
    let expected = compute_signature(payload, secret, timestamp);
    constant_time_eq(expected.as_bytes(), signature.as_bytes())
}

/// Timestamp freshness check for receivers.
pub fn is_timestamp_fresh(timestamp: i64, now: i64, max_age_secs: i64) -> bool {
    timestamp <= now && now - timestamp <= max_age_secs
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_has_expected_format() {
        let sig = compute_signature(r#"{"event":"subscriber.created"}"#, "k", 1700000000);
        assert!(sig.starts_with("sha256="));
        assert_eq!(sig.len(), 71); // "sha256=" + 64 hex chars
    }

    #[test]
    fn signature_covers_timestamp_dot_payload() {
        // The MACed message must be exactly "<ts>.<payload>".
        let payload = "P";
        let mut mac = HmacSha256::new_from_slice(b"k").unwrap();
        mac.update(b"1700000000.P");
        let expected = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));

        assert_eq!(compute_signature(payload, "k", 1700000000), expected);
    }

    #[test]
    fn signature_is_deterministic() {
        let a = compute_signature("body", "secret", 1700000000);
        let b = compute_signature("body", "secret", 1700000000);
        assert_eq!(a, b);
    }

    #[test]
    fn verify_accepts_matching_signature() {
        let sig = compute_signature("body", "secret", 1700000000);
        assert!(verify_signature("body", "secret", 1700000000, &sig));
    }

    #[test]
    fn verify_rejects_tampering() {
        let sig = compute_signature("body", "secret", 1700000000);
        assert!(!verify_signature("tampered", "secret", 1700000000, &sig));
        assert!(!verify_signature("body", "other", 1700000000, &sig));
        assert!(!verify_signature("body", "secret", 1700000001, &sig));
        assert!(!verify_signature("body", "secret", 1700000000, "sha256=00"));
    }

    #[test]
    fn freshness_window() {
        assert!(is_timestamp_fresh(1000, 1000, 300));
        assert!(is_timestamp_fresh(1000, 1300, 300));
        assert!(!is_timestamp_fresh(1000, 1301, 300));
        // Timestamps from the future are not fresh.
        assert!(!is_timestamp_fresh(1301, 1300, 300));
    }
}
