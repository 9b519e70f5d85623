//! Monthly spend accounting per originator.
//!
//! Usage is tracked per calendar month (UTC). Recording a spend in a new
//! month replaces the previous month's record, so the allowance resets at
//! each month boundary without a background job.
//!
//! Usage records live in the [`TokenStore`] next to the spending tokens
//! they are checked against, so a persistent store keeps both across
//! restarts.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;

use crate::permission::{TokenStore, TokenStoreError};

/// Calendar month in UTC, e.g. `2026-10`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Month {
    pub year: i32,
    pub month: u32,
}

impl Month {
    pub fn of(time: DateTime<Utc>) -> Self {
        Self {
            year: time.year(),
            month: time.month(),
        }
    }
}

impl std::fmt::Display for Month {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Cumulative spend of one originator in one month.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendingUsageRecord {
    pub originator: String,
    pub month: Month,
    pub spent: u64,
}

/// Tracks satoshis spent per originator in the current month.
pub struct SpendingAccountant {
    store: Arc<dyn TokenStore>,
    // Held across each read-modify-write of a usage record
    write: AsyncMutex<()>,
}

impl SpendingAccountant {
    pub fn new(store: Arc<dyn TokenStore>) -> Self {
        Self {
            store,
            write: AsyncMutex::new(()),
        }
    }

    /// Satoshis spent by `originator` in the month containing `now`.
    pub async fn spent(
        &self,
        originator: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, TokenStoreError> {
        let month = Month::of(now);
        Ok(self
            .store
            .find_usage(originator)
            .await?
            .filter(|record| record.month == month)
            .map_or(0, |record| record.spent))
    }

    /// Add `amount` to the originator's spend for the month containing `now`.
    ///
    /// Returns the new monthly total.
    pub async fn record(
        &self,
        originator: &str,
        amount: u64,
        now: DateTime<Utc>,
    ) -> Result<u64, TokenStoreError> {
        let _guard = self.write.lock().await;
        let month = Month::of(now);
        let mut record = match self.store.find_usage(originator).await? {
            Some(record) if record.month == month => record,
            previous => {
                if let Some(previous) = previous {
                    log::debug!(
                        "Spending for {} rolled over from {} to {}",
                        originator,
                        previous.month,
                        month
                    );
                }
                SpendingUsageRecord {
                    originator: originator.to_string(),
                    month,
                    spent: 0,
                }
            }
        };
        record.spent = record.spent.saturating_add(amount);
        let total = record.spent;
        self.store.save_usage(record).await?;
        Ok(total)
    }

    /// Give back a recorded spend that never reached the wallet.
    ///
    /// Only applies within the same month; a refund after rollover is dropped.
    pub async fn refund(
        &self,
        originator: &str,
        amount: u64,
        now: DateTime<Utc>,
    ) -> Result<(), TokenStoreError> {
        let _guard = self.write.lock().await;
        let month = Month::of(now);
        if let Some(mut record) = self.store.find_usage(originator).await? {
            if record.month == month {
                record.spent = record.spent.saturating_sub(amount);
                self.store.save_usage(record).await?;
            }
        }
        Ok(())
    }

    /// Snapshot of all usage records.
    pub async fn records(&self) -> Result<Vec<SpendingUsageRecord>, TokenStoreError> {
        self.store.list_usage().await
    }
}
