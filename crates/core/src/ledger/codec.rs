//! Canonical entry encoding, entry hashing and transaction ids.
//!
//! The hash covers every identifying and financial field of an entry plus its
//! link to the previous entry. Metadata is deliberately left out: it is
//! derived from the pools at write time and carries caller payloads.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use rand::TryRngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

use super::entry::LedgerEntry;
use super::error::LedgerError;

/// `previous_hash` of the first entry of every chain.
pub const GENESIS_HASH: &str = "GENESIS";

/// Separator between `key=value` pairs in the canonical encoding.
pub const FIELD_SEPARATOR: &str = "|";

/// Returns the hashed fields keyed by name, in lexicographic key order.
#[must_use]
pub fn hash_fields(entry: &LedgerEntry) -> BTreeMap<&'static str, String> {
    BTreeMap::from([
        ("id", entry.id.to_string()),
        ("organization_id", entry.organization_id.clone()),
        ("user_id", entry.user_id.clone()),
        ("type", entry.entry_type.as_str().to_string()),
        ("amount", entry.amount.to_string()),
        ("transaction_id", entry.transaction_id.clone()),
        ("reference_id", entry.reference_id.clone()),
        ("description", entry.description.clone()),
        ("created_at", format_timestamp(entry.created_at)),
        ("previous_hash", entry.previous_hash.clone()),
    ])
}

/// Renders a timestamp the way it is hashed: RFC 3339, UTC, six fractional digits.
#[must_use]
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Builds the `key=value|key=value` string that gets hashed.
#[must_use]
pub fn canonical_encoding(entry: &LedgerEntry) -> String {
    hash_fields(entry)
        .into_iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(FIELD_SEPARATOR)
}

/// Computes the lowercase hex SHA-256 digest of the canonical encoding.
///
/// The stored `hash` field is not an input.
#[must_use]
pub fn compute_hash(entry: &LedgerEntry) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_encoding(entry).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// True when the stored hash matches the entry's fields.
#[must_use]
pub fn verify_hash(entry: &LedgerEntry) -> bool {
    compute_hash(entry) == entry.hash
}

/// Generates a transaction id for the current UTC date.
///
/// # Errors
///
/// Returns [`LedgerError::Internal`] if the OS randomness source fails.
pub fn generate_transaction_id() -> Result<String, LedgerError> {
    generate_transaction_id_at(Utc::now())
}

/// Generates a transaction id stamped with the date of `at`.
///
/// # Errors
///
/// Returns [`LedgerError::Internal`] if the OS randomness source fails.
pub fn generate_transaction_id_at(at: DateTime<Utc>) -> Result<String, LedgerError> {
    let mut bytes = [0u8; 3];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| LedgerError::Internal(format!("randomness source failed: {e}")))?;
    Ok(format_transaction_id(at, bytes))
}

/// Formats `<YYYYMMDD>-<HEX6>` from a date and three random bytes.
#[must_use]
pub fn format_transaction_id(at: DateTime<Utc>, bytes: [u8; 3]) -> String {
    format!(
        "{}-{:02X}{:02X}{:02X}",
        at.format("%Y%m%d"),
        bytes[0],
        bytes[1],
        bytes[2]
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::entry::{EntryMetadata, EntryType};
    use chrono::TimeZone;
    use pointbook_shared::types::LedgerEntryId;
    use rstest::rstest;
    use uuid::Uuid;

    fn sample_entry() -> LedgerEntry {
        let created_at = Utc
            .with_ymd_and_hms(2025, 1, 2, 3, 4, 5)
            .unwrap()
            .checked_add_signed(chrono::Duration::microseconds(600_000))
            .unwrap();
        let mut entry = LedgerEntry {
            id: LedgerEntryId::from_uuid(Uuid::nil()),
            organization_id: "org-id".into(),
            user_id: "user-id".into(),
            entry_type: EntryType::Credit,
            amount: 1000,
            transaction_id: "20250102-0A1B2C".into(),
            reference_id: "ref-id".into(),
            description: "generate hash".into(),
            metadata: EntryMetadata::default(),
            previous_hash: "prev".into(),
            hash: String::new(),
            created_at,
        };
        entry.hash = compute_hash(&entry);
        entry
    }

    #[test]
    fn test_hash_fields_cover_every_canonical_field() {
        let entry = sample_entry();
        let fields = hash_fields(&entry);
        assert_eq!(fields.len(), 10);
        assert_eq!(fields["amount"], "1000");
        assert_eq!(fields["type"], "CREDIT");
        assert_eq!(fields["created_at"], "2025-01-02T03:04:05.600000Z");
        assert_eq!(fields["id"], Uuid::nil().to_string());
    }

    #[test]
    fn test_canonical_encoding_is_sorted_and_joined() {
        let encoding = canonical_encoding(&sample_entry());
        assert!(encoding.starts_with("amount=1000|created_at=2025-01-02T03:04:05.600000Z|"));
        assert!(encoding.ends_with("|type=CREDIT|user_id=user-id"));
        assert_eq!(encoding.matches(FIELD_SEPARATOR).count(), 9);
    }

    #[test]
    fn test_hash_is_sha256_of_encoding() {
        let entry = sample_entry();
        let mut hasher = Sha256::new();
        hasher.update(canonical_encoding(&entry).as_bytes());
        let expected = format!("{:x}", hasher.finalize());

        assert_eq!(entry.hash, expected);
        assert_eq!(entry.hash.len(), 64);
        assert!(verify_hash(&entry));
    }

    #[rstest]
    #[case::id(|e: &mut LedgerEntry| e.id = LedgerEntryId::new())]
    #[case::organization_id(|e: &mut LedgerEntry| e.organization_id.push('x'))]
    #[case::user_id(|e: &mut LedgerEntry| e.user_id.push('x'))]
    #[case::entry_type(|e: &mut LedgerEntry| e.entry_type = EntryType::Debit)]
    #[case::amount(|e: &mut LedgerEntry| e.amount += 1)]
    #[case::transaction_id(|e: &mut LedgerEntry| e.transaction_id = "20250102-0A1B2D".into())]
    #[case::reference_id(|e: &mut LedgerEntry| e.reference_id.push('x'))]
    #[case::description(|e: &mut LedgerEntry| e.description.clear())]
    #[case::created_at(|e: &mut LedgerEntry| e.created_at += chrono::Duration::microseconds(1))]
    #[case::previous_hash(|e: &mut LedgerEntry| e.previous_hash = GENESIS_HASH.into())]
    fn test_any_hashed_field_change_breaks_the_hash(#[case] mutate: fn(&mut LedgerEntry)) {
        let mut entry = sample_entry();
        mutate(&mut entry);
        assert!(!verify_hash(&entry));
    }

    #[test]
    fn test_metadata_is_not_hashed() {
        let mut entry = sample_entry();
        entry
            .metadata
            .extra
            .insert("note".into(), serde_json::json!("changed"));
        assert!(verify_hash(&entry));
    }

    #[test]
    fn test_transaction_id_format() {
        let at = Utc.with_ymd_and_hms(2026, 3, 9, 12, 0, 0).unwrap();
        assert_eq!(format_transaction_id(at, [0x0a, 0xff, 0x10]), "20260309-0AFF10");

        let id = generate_transaction_id_at(at).unwrap();
        let (date, random) = id.split_once('-').unwrap();
        assert_eq!(date, "20260309");
        assert_eq!(random.len(), 6);
        assert!(
            random
                .chars()
                .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c))
        );
    }
}
