//! Side channel for engine outcomes.

use std::fmt;

use super::chain::ChainVerification;
use super::entry::{AccountKey, LedgerEntry};
use super::error::LedgerError;

/// Engine operation names, as they appear in events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Create a CREDIT or DEBIT entry.
    AddEntry,
    /// Append a reversal.
    RevertEntry,
    /// Paged listing.
    ListEntries,
    /// Single entry read.
    GetEntry,
    /// Balance read.
    GetBalance,
    /// Chain walk.
    VerifyChain,
    /// Replay against stored state.
    Reconcile,
}

impl Operation {
    /// Snake-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AddEntry => "add_entry",
            Self::RevertEntry => "revert_entry",
            Self::ListEntries => "list_entries",
            Self::GetEntry => "get_entry",
            Self::GetBalance => "get_balance",
            Self::VerifyChain => "verify_chain",
            Self::Reconcile => "reconcile",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something the engine did.
#[derive(Debug)]
pub enum LedgerEvent<'a> {
    /// A CREDIT or DEBIT entry was committed.
    EntryAdded {
        /// The committed entry.
        entry: &'a LedgerEntry,
    },
    /// A reversal was committed.
    EntryReverted {
        /// The reverted entry.
        original: &'a LedgerEntry,
        /// The new reversal entry.
        reversal: &'a LedgerEntry,
    },
    /// A chain was walked.
    ChainVerified {
        /// Pair whose chain was walked.
        key: &'a AccountKey,
        /// Outcome.
        report: &'a ChainVerification,
    },
    /// An operation returned an error.
    OperationFailed {
        /// Which operation.
        operation: Operation,
        /// What it returned.
        error: &'a LedgerError,
    },
}

/// Receives engine events. Called inline, so implementations must not block.
pub trait LedgerObserver: Send + Sync {
    /// Handles one event.
    fn on_event(&self, event: &LedgerEvent<'_>);
}

/// Default observer: writes `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl LedgerObserver for TracingObserver {
    fn on_event(&self, event: &LedgerEvent<'_>) {
        match event {
            LedgerEvent::EntryAdded { entry } => tracing::info!(
                organization_id = %entry.organization_id,
                user_id = %entry.user_id,
                entry_id = %entry.id,
                entry_type = %entry.entry_type,
                amount = entry.amount,
                reference_id = %entry.reference_id,
                transaction_id = %entry.transaction_id,
                "ledger entry added"
            ),
            LedgerEvent::EntryReverted { original, reversal } => tracing::info!(
                organization_id = %original.organization_id,
                user_id = %original.user_id,
                original_id = %original.id,
                reversal_id = %reversal.id,
                amount = reversal.amount,
                "ledger entry reverted"
            ),
            LedgerEvent::ChainVerified { key, report } => {
                if report.is_valid() {
                    tracing::debug!(
                        account = %key,
                        entries_checked = report.entries_checked,
                        "chain verified"
                    );
                } else {
                    tracing::warn!(
                        account = %key,
                        entries_checked = report.entries_checked,
                        first_break = ?report.first_break,
                        "chain verification failed"
                    );
                }
            }
            LedgerEvent::OperationFailed { operation, error } => {
                if error.is_retryable() {
                    tracing::error!(
                        operation = %operation,
                        error_code = error.error_code(),
                        error = %error,
                        "ledger operation failed"
                    );
                } else {
                    tracing::debug!(
                        operation = %operation,
                        error_code = error.error_code(),
                        error = %error,
                        "ledger operation rejected"
                    );
                }
            }
        }
    }
}
