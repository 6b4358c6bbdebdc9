//! # Webhook Checksum
//!
//! The aggregator signs each event with
//! `sha256(reference + id + amount_in_cents + status + timestamp + secret)`,
//! hex encoded. Field order is significant.

use sha2::{Digest, Sha256};

/// The signed fields of a transaction event.
#[derive(Debug, Clone, Copy)]
pub struct SignedFields<'a> {
    pub reference: &'a str,
    pub transaction_id: &'a str,
    pub amount_in_cents: i64,
    pub status: &'a str,
    pub timestamp: i64,
}

/// Computes the lowercase hex checksum for `fields`.
pub fn compute_checksum(fields: &SignedFields<'_>, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(fields.reference.as_bytes());
    hasher.update(fields.transaction_id.as_bytes());
    hasher.update(fields.amount_in_cents.to_string().as_bytes());
    hasher.update(fields.status.as_bytes());
    hasher.update(fields.timestamp.to_string().as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Verifies a received checksum. Case-insensitive, constant time in the
/// checksum length.
pub fn verify_checksum(fields: &SignedFields<'_>, secret: &str, checksum: &str) -> bool {
    let expected = compute_checksum(fields, secret);
    let received = checksum.trim().to_ascii_lowercase();

    if expected.len() != received.len() {
        return false;
    }

    expected
        .bytes()
        .zip(received.bytes())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test_events_secret";
    const VECTOR: &str = "c675122a6d4837d71f4d8b60600128cdd1cf13e3cc220d082c612f2d5013d437";

    fn fields() -> SignedFields<'static> {
        SignedFields {
            reference: "MP-1700000000000-4821",
            transaction_id: "tx-1234-5678",
            amount_in_cents: 300_000,
            status: "APPROVED",
            timestamp: 1_700_000_100,
        }
    }

    #[test]
    fn test_fixed_vector() {
        assert_eq!(compute_checksum(&fields(), SECRET), VECTOR);
    }

    #[test]
    fn test_verify_accepts_uppercase_hex() {
        assert!(verify_checksum(&fields(), SECRET, VECTOR));
        assert!(verify_checksum(&fields(), SECRET, &VECTOR.to_uppercase()));
    }

    #[test]
    fn test_verify_rejects_tampering() {
        let mut tampered = fields();
        tampered.amount_in_cents = 100;
        assert!(!verify_checksum(&tampered, SECRET, VECTOR));

        let mut reordered = fields();
        reordered.status = "DECLINED";
        assert!(!verify_checksum(&reordered, SECRET, VECTOR));

        assert!(!verify_checksum(&fields(), "other_secret", VECTOR));
        assert!(!verify_checksum(&fields(), SECRET, ""));
    }
}
