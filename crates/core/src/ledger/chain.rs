//! Hash-chain verification.

use pointbook_shared::types::LedgerEntryId;
use serde::{Deserialize, Serialize};

use super::codec::{self, GENESIS_HASH};
use super::entry::LedgerEntry;

/// Which check failed at a chain break.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum ChainBreakKind {
    /// The stored hash does not match the entry's fields.
    HashMismatch {
        /// Hash recomputed from the stored fields.
        expected: String,
        /// Hash stored on the entry.
        actual: String,
    },
    /// The entry does not point at its predecessor.
    LinkMismatch {
        /// Hash of the preceding entry, or `GENESIS`.
        expected: String,
        /// `previous_hash` stored on the entry.
        actual: String,
    },
}

/// First point where a chain stops verifying.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainBreak {
    /// Zero-based position in chain order.
    pub position: usize,
    /// The offending entry.
    pub entry_id: LedgerEntryId,
    /// What went wrong.
    #[serde(flatten)]
    pub kind: ChainBreakKind,
}

/// Outcome of walking a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainVerification {
    /// True when every entry verified.
    pub valid: bool,
    /// Entries checked before stopping.
    pub entries_checked: usize,
    /// Hash of the last verified entry, `GENESIS` for an empty chain.
    pub tail_hash: String,
    /// Set when `valid` is false.
    pub first_break: Option<ChainBreak>,
}

impl ChainVerification {
    /// True when every entry verified.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.valid
    }
}

/// Walks `entries` in chain order and stops at the first mismatch.
///
/// Each entry must hash to its stored `hash` and point at the hash of the
/// entry before it; the first entry must point at `GENESIS`.
pub fn verify_chain<'a, I>(entries: I) -> ChainVerification
where
    I: IntoIterator<Item = &'a LedgerEntry>,
{
    let mut last_hash = GENESIS_HASH.to_string();
    let mut checked = 0;

    for (position, entry) in entries.into_iter().enumerate() {
        checked = position + 1;

        let recomputed = codec::compute_hash(entry);
        let kind = if recomputed != entry.hash {
            Some(ChainBreakKind::HashMismatch {
                expected: recomputed,
                actual: entry.hash.clone(),
            })
        } else if entry.previous_hash != last_hash {
            Some(ChainBreakKind::LinkMismatch {
                expected: last_hash.clone(),
                actual: entry.previous_hash.clone(),
            })
        } else {
            None
        };

        if let Some(kind) = kind {
            return ChainVerification {
                valid: false,
                entries_checked: checked,
                tail_hash: last_hash,
                first_break: Some(ChainBreak {
                    position,
                    entry_id: entry.id,
                    kind,
                }),
            };
        }

        last_hash.clone_from(&entry.hash);
    }

    ChainVerification {
        valid: true,
        entries_checked: checked,
        tail_hash: last_hash,
        first_break: None,
    }
}
