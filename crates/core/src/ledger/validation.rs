//! Input validation for ledger operations.

use chrono::{DateTime, Utc};

use serde_json::{Map, Value};

use super::entry::EntryMetadata;
use super::error::LedgerError;
use super::types::AddEntryInput;

/// Longest accepted organization, user or reference id, in characters.
pub const MAX_IDENTIFIER_LEN: usize = 255;

/// Longest accepted description, in characters.
pub const MAX_DESCRIPTION_LEN: usize = 1024;

/// Validates a required identifier.
///
/// # Errors
///
/// Returns [`LedgerError::InvalidArgument`] when `value` is blank, too long,
/// contains control characters or contains a hash-encoding separator
/// (`|` or `=`).
pub fn validate_identifier(field: &str, value: &str) -> Result<(), LedgerError> {
    if value.trim().is_empty() {
        return Err(LedgerError::InvalidArgument(format!("{field} is required")));
    }
    if value.chars().count() > MAX_IDENTIFIER_LEN {
        return Err(LedgerError::InvalidArgument(format!(
            "{field} must be at most {MAX_IDENTIFIER_LEN} characters"
        )));
    }
    if value.chars().any(char::is_control) {
        return Err(LedgerError::InvalidArgument(format!(
            "{field} must not contain control characters"
        )));
    }
    if value.contains(['|', '=']) {
        return Err(LedgerError::InvalidArgument(format!(
            "{field} must not contain '|' or '='"
        )));
    }
    Ok(())
}

/// Validates caller metadata.
///
/// # Errors
///
/// Returns [`LedgerError::InvalidArgument`] when a key the engine owns is
/// present.
pub fn validate_metadata(metadata: &Map<String, Value>) -> Result<(), LedgerError> {
    match EntryMetadata::RESERVED_KEYS
        .into_iter()
        .find(|key| metadata.contains_key(*key))
    {
        Some(key) => Err(LedgerError::InvalidArgument(format!(
            "metadata key '{key}' is reserved"
        ))),
        None => Ok(()),
    }
}

/// Validates an entry amount.
///
/// # Errors
///
/// Returns [`LedgerError::InvalidArgument`] unless `amount > 0`.
pub fn validate_amount(amount: i64) -> Result<(), LedgerError> {
    if amount <= 0 {
        return Err(LedgerError::InvalidArgument(format!(
            "amount must be positive, got {amount}"
        )));
    }
    Ok(())
}

/// Validates a description; empty is allowed.
///
/// # Errors
///
/// Returns [`LedgerError::InvalidArgument`] when it is too long.
pub fn validate_description(description: &str) -> Result<(), LedgerError> {
    if description.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(LedgerError::InvalidArgument(format!(
            "description must be at most {MAX_DESCRIPTION_LEN} characters"
        )));
    }
    Ok(())
}

/// Validates a `created_at` range.
///
/// # Errors
///
/// Returns [`LedgerError::InvalidArgument`] when `from` is after `to`.
pub fn validate_range(
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
) -> Result<(), LedgerError> {
    if let (Some(from), Some(to)) = (from, to)
        && from > to
    {
        return Err(LedgerError::InvalidArgument(format!(
            "range start {from} is after range end {to}"
        )));
    }
    Ok(())
}

/// Validates everything AddEntry checks before touching the store.
///
/// # Errors
///
/// Returns the first [`LedgerError::InvalidArgument`] found.
pub fn validate_add_entry(input: &AddEntryInput) -> Result<(), LedgerError> {
    validate_identifier("organization_id", &input.organization_id)?;
    validate_identifier("user_id", &input.user_id)?;
    validate_identifier("reference_id", &input.reference_id)?;
    validate_amount(input.amount)?;
    validate_description(&input.description)?;
    validate_metadata(&input.metadata)
}
