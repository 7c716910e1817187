//! Materialized balance per (organization, user).

use chrono::{DateTime, Utc};
use pointbook_shared::types::BalanceId;
use serde::{Deserialize, Serialize};

use super::entry::AccountKey;
use super::error::LedgerError;

/// The single persisted balance row of a pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// Unique identifier for this row.
    pub id: BalanceId,
    /// Owning organization.
    pub organization_id: String,
    /// Owning user.
    pub user_id: String,
    /// Current balance in minor units.
    pub balance: i64,
    /// When the row was created (first CREDIT).
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl Balance {
    /// Creates the row for a pair's first credit.
    #[must_use]
    pub fn open(key: &AccountKey, amount: i64, at: DateTime<Utc>) -> Self {
        Self {
            id: BalanceId::new(),
            organization_id: key.organization_id.clone(),
            user_id: key.user_id.clone(),
            balance: amount,
            created_at: at,
            updated_at: at,
        }
    }

    /// Adds `delta` (negative to subtract) and stamps `updated_at`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Internal`] on `i64` overflow.
    pub fn apply(&mut self, delta: i64, at: DateTime<Utc>) -> Result<(), LedgerError> {
        self.balance = self.balance.checked_add(delta).ok_or_else(|| {
            LedgerError::Internal(format!(
                "balance overflow applying {delta} to {}",
                self.balance
            ))
        })?;
        self.updated_at = at;
        Ok(())
    }

    /// Read-side projection.
    #[must_use]
    pub fn snapshot(&self) -> BalanceSnapshot {
        BalanceSnapshot {
            organization_id: self.organization_id.clone(),
            user_id: self.user_id.clone(),
            balance: self.balance,
            last_updated_at: Some(self.updated_at),
        }
    }
}

/// Balance as returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    /// Owning organization.
    pub organization_id: String,
    /// Owning user.
    pub user_id: String,
    /// Current balance; zero for pairs that never earned.
    pub balance: i64,
    /// `None` until the first CREDIT.
    pub last_updated_at: Option<DateTime<Utc>>,
}

impl BalanceSnapshot {
    /// Snapshot for a pair with no balance row yet.
    #[must_use]
    pub fn empty(key: &AccountKey) -> Self {
        Self {
            organization_id: key.organization_id.clone(),
            user_id: key.user_id.clone(),
            balance: 0,
            last_updated_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_adds_and_subtracts() {
        let key = AccountKey::new("org", "user");
        let opened = Utc::now();
        let mut balance = Balance::open(&key, 1000, opened);
        balance.apply(500, opened).unwrap();
        balance.apply(-700, opened).unwrap();
        assert_eq!(balance.balance, 800);
    }

    #[test]
    fn test_apply_rejects_overflow() {
        let key = AccountKey::new("org", "user");
        let mut balance = Balance::open(&key, i64::MAX, Utc::now());
        assert!(matches!(
            balance.apply(1, Utc::now()),
            Err(LedgerError::Internal(_))
        ));
        assert_eq!(balance.balance, i64::MAX);
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = BalanceSnapshot::empty(&AccountKey::new("org", "user"));
        assert_eq!(snapshot.balance, 0);
        assert!(snapshot.last_updated_at.is_none());
    }
}
