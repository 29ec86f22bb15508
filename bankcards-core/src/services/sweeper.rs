//! Expiry sweeper - moves lapsed cards to Expired
//!
//! One pass is a single bulk update in the store: every Active or Blocked
//! card whose validity ended before today becomes Expired, or none does. The
//! pass never touches balances and waits out any transfer holding one of
//! the rows.

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::domain::result::Result;
use crate::domain::CardStatus;
use crate::ports::CardStore;

/// Default period between passes
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

const SWEPT_STATUSES: [CardStatus; 2] = [CardStatus::Active, CardStatus::Blocked];

pub struct ExpirySweeper {
    cards: Arc<dyn CardStore>,
}

impl ExpirySweeper {
    pub fn new(cards: Arc<dyn CardStore>) -> Self {
        Self { cards }
    }

    /// Run one pass as of `today`, returning how many cards expired
    pub fn run_once(&self, today: NaiveDate) -> Result<u64> {
        let expired = self
            .cards
            .bulk_mark_expired(&SWEPT_STATUSES, CardStatus::Expired, today)?;
        if expired > 0 {
            tracing::info!(expired, %today, "expired lapsed cards");
        } else {
            tracing::debug!(%today, "no lapsed cards");
        }
        Ok(expired)
    }

    /// Run a pass every `period` on the blocking pool until the task is aborted.
    /// The first pass runs immediately.
    pub fn spawn(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let sweeper = Arc::clone(&self);
                match tokio::task::spawn_blocking(move || sweeper.run_once(Utc::now().date_naive())).await {
                    Ok(Ok(_)) => {}
                    // A failed pass is retried on the next tick
                    Ok(Err(e)) => tracing::warn!("expiry sweep failed: {}", e),
                    Err(e) => tracing::error!("expiry sweep task panicked: {}", e),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryCardStore;
    use crate::domain::NewCard;
    use crate::ports::CardTransaction;

    fn card(store: &InMemoryCardStore, number: &str, valid_until: NaiveDate) -> i64 {
        store
            .insert(NewCard {
                owner_id: 1,
                number_encrypted: number.to_string(),
                valid_until,
            })
            .unwrap()
            .id
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_run_once_expires_active_and_blocked() {
        let store = Arc::new(InMemoryCardStore::new());
        let today = date(2026, 5, 1);
        let active = card(&store, "a", date(2026, 4, 30));
        let blocked = card(&store, "b", date(2025, 1, 1));
        let fresh = card(&store, "c", date(2026, 5, 1));

        let mut tx = store.begin().unwrap();
        let mut locked = tx.lock_by_id(blocked).unwrap().unwrap();
        locked.status = CardStatus::Blocked;
        tx.save(&locked).unwrap();
        tx.commit().unwrap();

        let sweeper = ExpirySweeper::new(store.clone());
        assert_eq!(sweeper.run_once(today).unwrap(), 2);

        let status = |id| store.find_by_id(id).unwrap().unwrap().status;
        assert_eq!(status(active), CardStatus::Expired);
        assert_eq!(status(blocked), CardStatus::Expired);
        assert_eq!(status(fresh), CardStatus::Active);

        assert_eq!(sweeper.run_once(today).unwrap(), 0);
    }

    #[test]
    fn test_balance_is_untouched() {
        let store = Arc::new(InMemoryCardStore::new());
        let id = card(&store, "a", date(2020, 1, 1));
        let mut tx = store.begin().unwrap();
        let mut locked = tx.lock_by_id(id).unwrap().unwrap();
        locked.balance = rust_decimal::Decimal::new(4200, 2);
        tx.save(&locked).unwrap();
        tx.commit().unwrap();

        ExpirySweeper::new(store.clone()).run_once(date(2026, 1, 1)).unwrap();
        let swept = store.find_by_id(id).unwrap().unwrap();
        assert_eq!(swept.status, CardStatus::Expired);
        assert_eq!(swept.balance, rust_decimal::Decimal::new(4200, 2));
    }

    #[tokio::test]
    async fn test_spawned_sweeper_runs_periodically() {
        let store = Arc::new(InMemoryCardStore::new());
        let id = card(&store, "a", date(2000, 1, 1));

        let handle = Arc::new(ExpirySweeper::new(store.clone())).spawn(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        assert_eq!(store.find_by_id(id).unwrap().unwrap().status, CardStatus::Expired);
    }
}
