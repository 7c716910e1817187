//! Ledger entry domain types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SubsecRound, Utc};
use pointbook_shared::types::LedgerEntryId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::codec;
use super::error::LedgerError;

/// Direction of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntryType {
    /// Earn: adds points and opens a credit pool.
    Credit,
    /// Spend: consumes credit pools oldest first.
    Debit,
}

impl EntryType {
    /// Canonical upper-case name, as used in the hash encoding.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Credit => "CREDIT",
            Self::Debit => "DEBIT",
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CREDIT" => Ok(Self::Credit),
            "DEBIT" => Ok(Self::Debit),
            _ => Err(LedgerError::InvalidArgument(format!(
                "entry type must be CREDIT or DEBIT, got {s:?}"
            ))),
        }
    }
}

/// The (organization, user) pair that owns a chain, its pools and its balance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountKey {
    /// Tenant identifier.
    pub organization_id: String,
    /// User identifier within the tenant.
    pub user_id: String,
}

impl AccountKey {
    /// Creates a key from any string-like identifiers.
    pub fn new(organization_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            organization_id: organization_id.into(),
            user_id: user_id.into(),
        }
    }

    /// Stable string used to derive per-pair lock identifiers.
    ///
    /// The unit separator cannot appear in validated identifiers, so distinct
    /// pairs never produce the same key.
    #[must_use]
    pub fn lock_key(&self) -> String {
        format!("{}\u{1f}{}", self.organization_id, self.user_id)
    }
}

impl fmt::Display for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.organization_id, self.user_id)
    }
}

/// One slice of a debit, taken from the credit that opened a pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationSource {
    /// The CREDIT entry whose pool was consumed.
    pub ledger_entry_id: LedgerEntryId,
    /// Amount taken from that pool.
    pub amount: i64,
}

/// Back-reference carried by a reversal entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevertLink {
    /// The entry being reverted.
    pub entry_id: LedgerEntryId,
    /// Its hash at the time of the reversal.
    pub entry_hash: String,
}

/// Structured entry metadata.
///
/// Known keys are typed; anything else a caller sends is kept verbatim in
/// `extra` so that older readers never drop newer keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// FIFO allocation of a DEBIT, oldest credit first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<AllocationSource>,
    /// Present only on reversal entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverts: Option<RevertLink>,
    /// Caller-supplied keys.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EntryMetadata {
    /// Keys owned by the engine; callers cannot set them.
    pub const RESERVED_KEYS: [&'static str; 2] = ["sources", "reverts"];

    /// Wraps caller metadata.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidArgument`] when `extra` carries one of
    /// [`Self::RESERVED_KEYS`].
    pub fn from_caller(extra: Map<String, Value>) -> Result<Self, LedgerError> {
        super::validation::validate_metadata(&extra)?;
        Ok(Self {
            extra,
            ..Self::default()
        })
    }

    /// Attaches debit allocation sources.
    #[must_use]
    pub fn with_sources(mut self, sources: Vec<AllocationSource>) -> Self {
        self.sources = sources;
        self
    }

    /// Marks the entry as a reversal of another entry.
    #[must_use]
    pub fn with_reverts(mut self, link: RevertLink) -> Self {
        self.reverts = Some(link);
        self
    }

    /// Encodes the metadata as a JSON object.
    pub fn to_json(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Decodes stored metadata; `null` reads as empty metadata.
    pub fn from_json(value: Value) -> Result<Self, serde_json::Error> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value)
    }
}

/// A persisted, hash-chained ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Unique identifier for this entry.
    pub id: LedgerEntryId,
    /// Owning organization.
    pub organization_id: String,
    /// Owning user.
    pub user_id: String,
    /// CREDIT or DEBIT.
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    /// Positive amount in minor units.
    pub amount: i64,
    /// System-generated `<YYYYMMDD>-<HEX6>` identifier.
    pub transaction_id: String,
    /// Client idempotency key, unique within the organization.
    pub reference_id: String,
    /// Free-text description.
    pub description: String,
    /// Allocation sources, reversal link and caller keys. Not hashed.
    pub metadata: EntryMetadata,
    /// Hash of the preceding entry of the same pair, or [`codec::GENESIS_HASH`].
    pub previous_hash: String,
    /// Digest over this entry's canonical fields.
    pub hash: String,
    /// Chain ordering key, microsecond precision.
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// The pair this entry belongs to.
    #[must_use]
    pub fn account_key(&self) -> AccountKey {
        AccountKey::new(self.organization_id.clone(), self.user_id.clone())
    }

    /// True when this entry reverts another entry.
    #[must_use]
    pub fn is_reversal(&self) -> bool {
        self.metadata.reverts.is_some()
    }
}

/// An entry before its hash has been computed.
#[derive(Debug, Clone)]
pub struct EntryDraft {
    /// Pre-assigned identifier.
    pub id: LedgerEntryId,
    /// Owning pair.
    pub key: AccountKey,
    /// CREDIT or DEBIT.
    pub entry_type: EntryType,
    /// Positive amount.
    pub amount: i64,
    /// Generated transaction id.
    pub transaction_id: String,
    /// Idempotency key.
    pub reference_id: String,
    /// Description.
    pub description: String,
    /// Metadata.
    pub metadata: EntryMetadata,
    /// Chain link.
    pub previous_hash: String,
    /// Creation time; truncated to microseconds when sealed.
    pub created_at: DateTime<Utc>,
}

impl EntryDraft {
    /// Computes the hash and returns the finished entry.
    ///
    /// `created_at` is truncated to microseconds first, so the stored value
    /// survives a round trip through `timestamptz` unchanged.
    #[must_use]
    pub fn seal(self) -> LedgerEntry {
        let mut entry = LedgerEntry {
            id: self.id,
            organization_id: self.key.organization_id,
            user_id: self.key.user_id,
            entry_type: self.entry_type,
            amount: self.amount,
            transaction_id: self.transaction_id,
            reference_id: self.reference_id,
            description: self.description,
            metadata: self.metadata,
            previous_hash: self.previous_hash,
            hash: String::new(),
            created_at: self.created_at.trunc_subsecs(6),
        };
        entry.hash = codec::compute_hash(&entry);
        entry
    }
}
